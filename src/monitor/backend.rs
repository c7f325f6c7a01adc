// SPDX-License-Identifier: GPL-3.0-only
//! Probed devices and the candidates they are probed from

use anyhow::Result;

use crate::brightness::{BRIGHTNESS_EPSILON, FULL_BRIGHTNESS};
use crate::protocols::{BrightnessRange, GammaProtocol, GammaRamp, RangeProtocol};

/// Opens the gamma path of a candidate on demand, so outputs that answer a
/// range protocol never touch the DRM node
pub type GammaOpener = Box<dyn FnOnce() -> Result<Box<dyn GammaProtocol>> + Send>;

/// An output or panel that has not been probed yet
pub struct Candidate {
    pub description: String,
    pub range: Option<Box<dyn RangeProtocol>>,
    pub gamma: Option<GammaOpener>,
}

impl Candidate {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            range: None,
            gamma: None,
        }
    }

    pub fn with_range(mut self, range: Box<dyn RangeProtocol>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_gamma(mut self, opener: GammaOpener) -> Self {
        self.gamma = Some(opener);
        self
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("description", &self.description)
            .field("range", &self.range)
            .field("gamma", &self.gamma.is_some())
            .finish()
    }
}

/// How a device is controlled. Fixed when the device is probed.
pub enum DeviceControl {
    /// Hardware brightness with the baseline `{min, current, max}` triple
    HardwareRange {
        handle: Box<dyn RangeProtocol>,
        baseline: BrightnessRange,
    },
    /// Gamma ramp emulation with the ramp found at probe time
    GammaRamp {
        handle: Box<dyn GammaProtocol>,
        baseline: Box<GammaRamp>,
    },
}

/// A device whose control kind is known and whose baseline is recorded.
/// Dropping it releases the underlying OS handle.
pub struct Device {
    description: String,
    control: DeviceControl,
}

impl Device {
    pub fn new(description: String, control: DeviceControl) -> Self {
        Self { description, control }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    #[cfg(test)]
    pub fn control(&self) -> &DeviceControl {
        &self.control
    }

    pub fn is_gamma(&self) -> bool {
        matches!(self.control, DeviceControl::GammaRamp { .. })
    }

    /// Command the device to `fraction` of its baseline
    pub fn set_brightness(&mut self, fraction: f32) -> Result<()> {
        let fraction = fraction.clamp(0.0, FULL_BRIGHTNESS);
        match &mut self.control {
            DeviceControl::HardwareRange { handle, baseline } => {
                handle.write_value(range_value(baseline, fraction))
            }
            DeviceControl::GammaRamp { handle, baseline } => {
                if fraction >= FULL_BRIGHTNESS - BRIGHTNESS_EPSILON {
                    handle.write_ramp(baseline)
                } else {
                    handle.write_ramp(&baseline.scaled(fraction))
                }
            }
        }
    }

    /// One line describing the control kind and baseline
    pub fn configuration(&self) -> String {
        match &self.control {
            DeviceControl::HardwareRange { baseline, .. } => format!(
                "Using hardware brightness for {}, values (current, min, max): ({}, {}, {})",
                self.description, baseline.current, baseline.min, baseline.max
            ),
            DeviceControl::GammaRamp { .. } => format!("Using gamma ramp for {}", self.description),
        }
    }
}

/// Protocol value for `fraction` of the baseline, kept inside the device range
pub fn range_value(baseline: &BrightnessRange, fraction: f32) -> u32 {
    let value = (baseline.current as f32 * fraction).round() as u32;
    value.max(baseline.min).min(baseline.max)
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Device({})", self.configuration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_value_scales_baseline() {
        let baseline = BrightnessRange { min: 0, current: 80, max: 100 };
        assert_eq!(range_value(&baseline, 1.0), 80);
        assert_eq!(range_value(&baseline, 0.5), 40);
        assert_eq!(range_value(&baseline, 0.1), 8);
        assert_eq!(range_value(&baseline, 0.0), 0);
    }

    #[test]
    fn test_range_value_rounds() {
        let baseline = BrightnessRange { min: 0, current: 75, max: 100 };
        // 7.5 rounds up
        assert_eq!(range_value(&baseline, 0.1), 8);
    }

    #[test]
    fn test_range_value_respects_minimum() {
        let baseline = BrightnessRange { min: 400, current: 60000, max: 60000 };
        assert_eq!(range_value(&baseline, 0.0), 400);
        assert_eq!(range_value(&baseline, 0.5), 30000);
    }
}
