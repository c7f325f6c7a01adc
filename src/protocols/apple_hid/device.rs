// SPDX-License-Identifier: GPL-3.0-only
//! Apple HID display device implementation

use anyhow::{Context, Result};
use hidapi::{HidApi, HidDevice};

use crate::protocols::{BrightnessRange, RangeProtocol};

use super::INTERFACE_NUMBER;
use super::models::{ModelSpec, find_model};

/// HID feature report size in bytes
const REPORT_SIZE: usize = 7;

/// HID Report ID for brightness control
const REPORT_ID: u8 = 1;

/// Apple HID display controller
pub struct AppleHidDisplay {
    device: HidDevice,
    serial: String,
    spec: ModelSpec,
}

impl AppleHidDisplay {
    /// Enumerate all connected Apple HID displays
    ///
    /// Displays that are found but cannot be opened are logged and skipped;
    /// this is usually a missing udev rule.
    pub fn enumerate(api: &HidApi) -> Vec<Self> {
        let mut displays = Vec::new();

        for device_info in api.device_list() {
            if device_info.interface_number() != INTERFACE_NUMBER {
                continue;
            }
            let Some(spec) = find_model(device_info.vendor_id(), device_info.product_id()) else {
                continue;
            };

            let serial = device_info.serial_number().unwrap_or("unknown").to_string();
            match device_info.open_device(api) {
                Ok(device) => {
                    debug!("Opened {} (serial: {})", spec.name, serial);
                    displays.push(Self { device, serial, spec });
                }
                Err(e) => {
                    warn!(
                        "Failed to open {} (serial: {}): {}. Check the udev rules for Apple displays.",
                        spec.name, serial, e
                    );
                }
            }
        }

        displays
    }

    pub fn model_name(&self) -> &str {
        self.spec.name
    }
}

impl RangeProtocol for AppleHidDisplay {
    fn description(&self) -> String {
        format!("{} ({})", self.spec.name, self.serial)
    }

    fn read_range(&mut self) -> Result<BrightnessRange> {
        let mut buf = [0u8; REPORT_SIZE];
        buf[0] = REPORT_ID;

        self.device
            .get_feature_report(&mut buf)
            .context("Failed to read HID feature report")?;

        // Bytes 1-4 carry the value, little-endian
        let current = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);

        Ok(BrightnessRange {
            min: self.spec.min_value,
            current: current.clamp(self.spec.min_value, self.spec.max_value),
            max: self.spec.max_value,
        })
    }

    fn write_value(&mut self, value: u32) -> Result<()> {
        let value = value.clamp(self.spec.min_value, self.spec.max_value);

        let mut buf = [0u8; REPORT_SIZE];
        buf[0] = REPORT_ID;
        buf[1..5].copy_from_slice(&value.to_le_bytes());

        self.device
            .send_feature_report(&buf)
            .context("Failed to send HID feature report")?;

        Ok(())
    }
}

impl std::fmt::Debug for AppleHidDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AppleHidDisplay({})", self.description())
    }
}
