// SPDX-License-Identifier: GPL-3.0-only
//! Flash amount to brightness mapping
//!
//! Converts the game's flash amount (0-255) into the brightness fraction the
//! displays should be commanded to, honouring the configured threshold and
//! brightness floor.

use crate::config::Settings;

/// Highest flash amount the game reports
pub const MAX_FLASH_AMOUNT: u8 = 255;

/// Brightness changes smaller than this are not sent to hardware
pub const BRIGHTNESS_EPSILON: f32 = 0.001;

/// Full brightness
pub const FULL_BRIGHTNESS: f32 = 1.0;

/// Maps flash amounts to brightness fractions
#[derive(Debug, Clone, Copy)]
pub struct BrightnessCalculator {
    threshold: u8,
    floor: f32,
}

impl BrightnessCalculator {
    pub fn new(threshold: u8, floor: f32) -> Self {
        Self {
            threshold,
            floor: floor.clamp(0.0, 1.0),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.minimum_flash_threshold, settings.minimum_brightness)
    }

    /// Brightness fraction wanted for a flash amount
    ///
    /// Flashes at or below the threshold keep full brightness. Above it the
    /// flash is inverted into a recovery signal, rescaled from `[0, 255]` onto
    /// `[threshold, 255]`, converted to a fraction and clamped to the
    /// brightness floor.
    pub fn wanted_brightness(&self, flash_amount: u8) -> f32 {
        if flash_amount <= self.threshold {
            return FULL_BRIGHTNESS;
        }

        let max = u32::from(MAX_FLASH_AMOUNT);
        let flash_brightness = max - u32::from(flash_amount);
        let scaled = map_range(0, max, u32::from(self.threshold), max, flash_brightness);
        let fraction = scaled as f32 / max as f32;

        fraction.max(self.floor)
    }
}

/// Clamp a raw sample from the event source into the valid flash range.
/// The game occasionally reports -1.
pub fn clamp_flash_amount(raw: i64) -> u8 {
    raw.clamp(0, i64::from(MAX_FLASH_AMOUNT)) as u8
}

/// Whether `wanted` differs enough from the committed brightness to be sent
pub fn needs_commit(current: f32, wanted: f32) -> bool {
    (current - wanted).abs() > BRIGHTNESS_EPSILON
}

/// Integer linear rescale of `s` from `[a1, a2]` onto `[b1, b2]`
fn map_range(a1: u32, a2: u32, b1: u32, b2: u32, s: u32) -> u32 {
    b1 + (s - a1) * (b2 - b1) / (a2 - a1)
}
