// SPDX-License-Identifier: GPL-3.0-only
//! Configuration loading and validation
//!
//! The configuration lives in a small KDL document, one node per setting:
//!
//! ```kdl
//! minimum-flash-threshold 0
//! minimum-brightness 10
//! full-brightness-on-start #true
//! ```
//!
//! [`Config`] is the raw, unvalidated view of that file. [`Config::validate`]
//! turns it into [`Settings`], the read-only view the brightness core uses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlNodeFormat, KdlValue};

use crate::error::{AppError, Result};

pub const APP_NAME: &str = "flashbang-dimmer";
pub const CONFIG_FILE: &str = "config.kdl";

/// Highest flash amount the game reports
pub const MAX_FLASH_AMOUNT: i64 = 255;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Flashes at or below this amount (0-255) do not dim the display
    pub minimum_flash_threshold: i64,
    /// Darkest brightness ever commanded, in percent (0-100)
    pub minimum_brightness: i64,
    /// Raise hardware-range devices to their maximum when probing
    pub full_brightness_on_start: bool,
    /// Try the integrated panel before external displays
    pub prefer_panel: bool,
    pub watchdog_timeout_ms: i64,
    pub watchdog_interval_ms: i64,
    /// Default tracing filter when RUST_LOG is not set
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minimum_flash_threshold: 0,
            minimum_brightness: 10,
            full_brightness_on_start: true,
            prefer_panel: false,
            watchdog_timeout_ms: 2000,
            watchdog_interval_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

/// Validated settings consumed by the brightness core
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Settings {
    pub minimum_flash_threshold: u8,
    /// Brightness floor as a fraction (0.0-1.0)
    pub minimum_brightness: f32,
    pub full_brightness_on_start: bool,
    pub prefer_panel: bool,
    pub watchdog_timeout: Duration,
    pub watchdog_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        // The default config always validates
        Self {
            minimum_flash_threshold: 0,
            minimum_brightness: 0.10,
            full_brightness_on_start: true,
            prefer_panel: false,
            watchdog_timeout: Duration::from_secs(2),
            watchdog_interval: Duration::from_secs(1),
        }
    }
}

/// A configuration as read from disk
///
/// Loading happens before logging is set up, so anything worth reporting is
/// kept here and logged by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Loaded {
    pub config: Config,
    /// Nodes that are not configuration keys, most likely typos
    pub unknown_keys: Vec<String>,
    /// The file did not exist and was written with the defaults
    pub created: bool,
}

impl Loaded {
    pub fn log(&self, path: &Path) {
        if self.created {
            info!("Wrote default configuration to {}", path.display());
        }
        for key in &self.unknown_keys {
            warn!("Ignoring unknown configuration key `{}` in {}", key, path.display());
        }
    }
}

/// Default location: `$XDG_CONFIG_HOME/flashbang-dimmer/config.kdl`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
}

impl Config {
    /// Load the config at `path`, writing the defaults there if it does not exist yet
    pub fn load_or_create(path: &Path) -> Result<Loaded> {
        if !path.exists() {
            let config = Config::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, config.to_kdl())?;
            return Ok(Loaded {
                config,
                unknown_keys: Vec::new(),
                created: true,
            });
        }

        let text = std::fs::read_to_string(path)?;
        let (config, unknown_keys) = Self::from_kdl(&text).map_err(|reason| AppError::ConfigParse {
            path: path.display().to_string(),
            reason,
        })?;
        Ok(Loaded {
            config,
            unknown_keys,
            created: false,
        })
    }

    /// Parse a KDL document. Missing nodes keep their default value; the
    /// names of unknown nodes are returned next to the config.
    pub fn from_kdl(text: &str) -> std::result::Result<(Self, Vec<String>), String> {
        let doc: KdlDocument = text.parse().map_err(|e: kdl::KdlError| e.to_string())?;
        let mut config = Config::default();
        let mut unknown_keys = Vec::new();

        for node in doc.nodes() {
            let name = node.name().value();
            let value = node
                .entries()
                .iter()
                .find(|entry| entry.name().is_none())
                .map(|entry| entry.value());

            let Some(value) = value else {
                return Err(format!("`{name}` needs a value"));
            };

            match name {
                "minimum-flash-threshold" => config.minimum_flash_threshold = integer(name, value)?,
                "minimum-brightness" => config.minimum_brightness = integer(name, value)?,
                "full-brightness-on-start" => config.full_brightness_on_start = boolean(name, value)?,
                "prefer-panel" => config.prefer_panel = boolean(name, value)?,
                "watchdog-timeout-ms" => config.watchdog_timeout_ms = integer(name, value)?,
                "watchdog-interval-ms" => config.watchdog_interval_ms = integer(name, value)?,
                "log-level" => {
                    config.log_level = value
                        .as_string()
                        .ok_or_else(|| format!("`{name}` must be a string"))?
                        .to_string();
                }
                other => unknown_keys.push(other.to_string()),
            }
        }

        Ok((config, unknown_keys))
    }

    pub fn to_kdl(&self) -> String {
        let mut doc = KdlDocument::new();
        let nodes = doc.nodes_mut();
        nodes.push(setting(
            "minimum-flash-threshold",
            i128::from(self.minimum_flash_threshold),
            Some("Flashes at or below this amount (0-255) do not dim the display"),
        ));
        nodes.push(setting(
            "minimum-brightness",
            i128::from(self.minimum_brightness),
            Some("Darkest brightness the dimmer will ever set, in percent (0-100)"),
        ));
        nodes.push(setting(
            "full-brightness-on-start",
            self.full_brightness_on_start,
            Some("Raise displays to their maximum brightness at startup"),
        ));
        nodes.push(setting(
            "prefer-panel",
            self.prefer_panel,
            Some("Try the laptop panel before external displays"),
        ));
        nodes.push(setting("watchdog-timeout-ms", i128::from(self.watchdog_timeout_ms), None));
        nodes.push(setting("watchdog-interval-ms", i128::from(self.watchdog_interval_ms), None));
        nodes.push(setting("log-level", self.log_level.as_str(), None));
        doc.to_string()
    }

    /// Check ranges and convert into [`Settings`]
    pub fn validate(&self) -> Result<Settings> {
        if !(0..=MAX_FLASH_AMOUNT).contains(&self.minimum_flash_threshold) {
            return Err(AppError::Config(format!(
                "minimum-flash-threshold needs to be between 0 and 255, got {}",
                self.minimum_flash_threshold
            )));
        }

        if !(0..=100).contains(&self.minimum_brightness) {
            return Err(AppError::Config(format!(
                "minimum-brightness needs to be between 0 and 100, got {}",
                self.minimum_brightness
            )));
        }

        if self.watchdog_timeout_ms <= 0 || self.watchdog_interval_ms <= 0 {
            return Err(AppError::Config(format!(
                "watchdog timings need to be positive, got timeout {}ms and interval {}ms",
                self.watchdog_timeout_ms, self.watchdog_interval_ms
            )));
        }

        Ok(Settings {
            minimum_flash_threshold: self.minimum_flash_threshold as u8,
            minimum_brightness: self.minimum_brightness as f32 / 100.0,
            full_brightness_on_start: self.full_brightness_on_start,
            prefer_panel: self.prefer_panel,
            watchdog_timeout: Duration::from_millis(self.watchdog_timeout_ms as u64),
            watchdog_interval: Duration::from_millis(self.watchdog_interval_ms as u64),
        })
    }

    pub fn print_information(&self, path: Option<&Path>) {
        match path {
            Some(path) => info!("Settings path: {}", path.display()),
            None => info!("Settings path: none (using defaults)"),
        }
        info!("Minimum flash amount: {}/255", self.minimum_flash_threshold);
        info!("Minimum monitor brightness: {}/100", self.minimum_brightness);
        info!("Full brightness on start: {}", self.full_brightness_on_start);
        info!("Prefer laptop panel: {}", self.prefer_panel);
        info!(
            "Watchdog: restore after {}ms without events, checked every {}ms",
            self.watchdog_timeout_ms, self.watchdog_interval_ms
        );
        info!("Log level: {} (overridden by RUST_LOG)", self.log_level);
    }
}

fn integer(name: &str, value: &KdlValue) -> std::result::Result<i64, String> {
    value
        .as_integer()
        .and_then(|v| i64::try_from(v).ok())
        .ok_or_else(|| format!("`{name}` must be an integer"))
}

fn boolean(name: &str, value: &KdlValue) -> std::result::Result<bool, String> {
    value
        .as_bool()
        .ok_or_else(|| format!("`{name}` must be #true or #false"))
}

/// One `name value` line, optionally preceded by a comment
fn setting(name: &str, value: impl Into<KdlValue>, comment: Option<&str>) -> KdlNode {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    node.set_format(KdlNodeFormat {
        leading: comment.map(|comment| format!("// {comment}\n")).unwrap_or_default(),
        terminator: "\n".to_string(),
        ..KdlNodeFormat::default()
    });
    node
}
