// SPDX-License-Identifier: GPL-3.0-only
//! Display brightness control protocols
//!
//! Two kinds of primitives exist. Range protocols expose the brightness as a
//! number between a queryable minimum and maximum (DDC/CI, Apple HID, sysfs
//! backlight). Gamma protocols expose a per-channel lookup table that can be
//! scaled to emulate dimming when no range protocol answers.

pub mod backlight;
pub mod ddc_ci;
pub mod drm;

#[cfg(feature = "apple-hid-displays")]
pub mod apple_hid;

#[cfg(test)]
pub mod testing;

use anyhow::Result;

/// Brightness triple reported by a range protocol, in protocol units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightnessRange {
    pub min: u32,
    pub current: u32,
    pub max: u32,
}

/// Brightness exposed as a numeric range
pub trait RangeProtocol: std::fmt::Debug + Send {
    /// Human-readable name of the device
    fn description(&self) -> String;

    /// Query the minimum, current and maximum brightness
    fn read_range(&mut self) -> Result<BrightnessRange>;

    /// Set the brightness, in protocol units
    fn write_value(&mut self, value: u32) -> Result<()>;
}

/// Number of entries per channel in a gamma ramp
pub const GAMMA_RAMP_SIZE: usize = 256;

/// Per-channel gamma lookup table
#[derive(Clone, PartialEq, Eq)]
pub struct GammaRamp {
    pub red: [u16; GAMMA_RAMP_SIZE],
    pub green: [u16; GAMMA_RAMP_SIZE],
    pub blue: [u16; GAMMA_RAMP_SIZE],
}

impl GammaRamp {
    pub fn zeroed() -> Self {
        Self {
            red: [0; GAMMA_RAMP_SIZE],
            green: [0; GAMMA_RAMP_SIZE],
            blue: [0; GAMMA_RAMP_SIZE],
        }
    }

    /// Linear ramp spanning the full 16-bit range
    #[cfg(test)]
    pub fn identity() -> Self {
        let mut ramp = Self::zeroed();
        for i in 0..GAMMA_RAMP_SIZE {
            let value = (i as u16) * 257;
            ramp.red[i] = value;
            ramp.green[i] = value;
            ramp.blue[i] = value;
        }
        ramp
    }

    /// Dimmed copy of this ramp
    ///
    /// Each entry becomes `i * round(entry * fraction)`, truncated to 16 bits.
    /// The multiplication by the index is applied to the scaled value and not
    /// to the index itself, so the curve keeps the shape of the baseline.
    /// The truncation bands badly at low brightness.
    pub fn scaled(&self, fraction: f32) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut ramp = Self::zeroed();
        scale_channel(&self.red, &mut ramp.red, fraction);
        scale_channel(&self.green, &mut ramp.green, fraction);
        scale_channel(&self.blue, &mut ramp.blue, fraction);
        ramp
    }
}

fn scale_channel(baseline: &[u16; GAMMA_RAMP_SIZE], out: &mut [u16; GAMMA_RAMP_SIZE], fraction: f32) {
    for (i, (value, base)) in out.iter_mut().zip(baseline.iter()).enumerate() {
        let scaled = (f32::from(*base) * fraction).round() as u32;
        *value = (i as u32).wrapping_mul(scaled) as u16;
    }
}

impl std::fmt::Debug for GammaRamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GammaRamp(red: {}..{}, green: {}..{}, blue: {}..{})",
            self.red[0],
            self.red[GAMMA_RAMP_SIZE - 1],
            self.green[0],
            self.green[GAMMA_RAMP_SIZE - 1],
            self.blue[0],
            self.blue[GAMMA_RAMP_SIZE - 1]
        )
    }
}

/// Brightness exposed through a gamma lookup table
pub trait GammaProtocol: std::fmt::Debug + Send {
    /// Human-readable name of the device
    fn description(&self) -> String;

    /// Read the ramp currently loaded in hardware
    fn read_ramp(&mut self) -> Result<GammaRamp>;

    /// Load a ramp into hardware
    fn write_ramp(&mut self, ramp: &GammaRamp) -> Result<()>;
}
