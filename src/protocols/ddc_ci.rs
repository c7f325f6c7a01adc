// SPDX-License-Identifier: GPL-3.0-only
//! DDC/CI (Display Data Channel Command Interface) protocol implementation
//!
//! DDC/CI is a standard protocol for controlling monitors over I2C bus.
//! It's supported by most modern external monitors via the video cable.

use std::time::Duration;

use anyhow::{Context, Result};
use ddc_hi::{Ddc, Display};

use super::{BrightnessRange, RangeProtocol};

/// VCP (Virtual Control Panel) code for brightness
const BRIGHTNESS_CODE: u8 = 0x10;

/// Reads attempted before a monitor is considered DDC/CI-incapable
const READ_ATTEMPTS: u64 = 5;

/// DDC/CI display implementation
pub struct DdcCiDisplay {
    display: Display,
}

impl DdcCiDisplay {
    pub fn new(display: Display) -> Self {
        Self { display }
    }

    /// Enumerate all DDC/CI capable buses
    pub fn enumerate() -> Vec<Self> {
        Display::enumerate().into_iter().map(Self::new).collect()
    }

    /// Raw EDID as read over the DDC bus
    pub fn edid(&self) -> Option<&[u8]> {
        self.display.info.edid_data.as_deref()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.display.info.model_name.as_deref()
    }

    fn read_once(&mut self) -> Result<BrightnessRange> {
        let value = self.display.handle.get_vcp_feature(BRIGHTNESS_CODE)?;
        Ok(BrightnessRange {
            min: 0,
            current: u32::from(value.value()),
            max: u32::from(value.maximum()),
        })
    }
}

impl RangeProtocol for DdcCiDisplay {
    fn description(&self) -> String {
        self.model_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("DDC/CI display {}", self.display.info.id))
    }

    /// Monitors often need a few tries right after enumeration or hotplug
    /// before DDC/CI answers, so reads are retried with a growing delay.
    fn read_range(&mut self) -> Result<BrightnessRange> {
        let mut last_error = None;

        for attempt in 1..=READ_ATTEMPTS {
            match self.read_once() {
                Ok(range) => {
                    if attempt > 1 {
                        debug!("DDC/CI display {} answered on attempt {}", self.description(), attempt);
                    }
                    return Ok(range);
                }
                Err(e) => {
                    debug!("DDC/CI attempt {} on {} failed: {}", attempt, self.description(), e);
                    last_error = Some(e);
                    if attempt < READ_ATTEMPTS {
                        // 100ms, 150ms, 200ms, 250ms
                        std::thread::sleep(Duration::from_millis(50 + attempt * 50));
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempt made"));
        Err(err).with_context(|| format!("DDC/CI brightness read failed after {READ_ATTEMPTS} attempts"))
    }

    fn write_value(&mut self, value: u32) -> Result<()> {
        let value = u16::try_from(value).context("brightness value exceeds the VCP range")?;
        self.display
            .handle
            .set_vcp_feature(BRIGHTNESS_CODE, value)
            .context("DDC/CI brightness write failed")?;
        Ok(())
    }
}

impl std::fmt::Debug for DdcCiDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DdcCiDisplay(id: {}, name: {})", self.display.info.id, self.description())
    }
}
