// SPDX-License-Identifier: GPL-3.0-only
//! Apple HID brightness control protocol
//!
//! This protocol is used by Apple displays that communicate via USB HID:
//! - Apple Studio Display
//! - Apple Pro Display XDR
//! - LG UltraFine 4K/5K (co-developed with Apple)
//!
//! These displays do not answer DDC/CI, but expose their backlight as a
//! feature report with a fixed protocol range.

mod device;
mod models;

pub use device::AppleHidDisplay;

/// USB Interface number for brightness control
pub const INTERFACE_NUMBER: i32 = 0x7;
