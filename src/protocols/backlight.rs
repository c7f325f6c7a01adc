// SPDX-License-Identifier: GPL-3.0-only
//! Integrated panel backlight through sysfs
//!
//! Laptop panels expose their backlight under `/sys/class/backlight`. The
//! `brightness` file is usually only writable by root, so with the `logind`
//! feature writes fall back to logind's `SetBrightness`, which is allowed for
//! the user owning the active session.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{BrightnessRange, RangeProtocol};

/// Location of backlight devices
pub const BACKLIGHT_PATH: &str = "/sys/class/backlight";

const FILE_MAX_BRIGHTNESS: &str = "max_brightness";
/// `actual_brightness` uses a different scale on amdgpu, so the requested
/// level is read back from `brightness` instead
const FILE_BRIGHTNESS: &str = "brightness";
const FILE_TYPE: &str = "type";

/// One backlight device
pub struct BacklightPanel {
    name: String,
    path: PathBuf,
    #[cfg(feature = "logind")]
    logind: Option<zbus::blocking::Connection>,
}

impl BacklightPanel {
    fn new(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            #[cfg(feature = "logind")]
            logind: None,
        }
    }

    /// The preferred backlight device of this machine, if any
    pub fn discover() -> Option<Self> {
        Self::discover_in(Path::new(BACKLIGHT_PATH))
    }

    /// Pick the preferred device under `root`
    ///
    /// Firmware interfaces are preferred over platform drivers, which are
    /// preferred over raw GPU registers; ties are broken by name.
    pub fn discover_in(root: &Path) -> Option<Self> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}", root.display(), e);
                return None;
            }
        };

        let mut devices: Vec<(u8, String, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                let kind = fs::read_to_string(path.join(FILE_TYPE)).unwrap_or_default();
                (type_priority(kind.trim()), name, path)
            })
            .collect();
        devices.sort();

        devices
            .into_iter()
            .next()
            .map(|(_, name, path)| Self::new(name, path))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this process can write the sysfs brightness file directly
    pub fn is_writable(&self) -> bool {
        fs::OpenOptions::new()
            .write(true)
            .open(self.path.join(FILE_BRIGHTNESS))
            .is_ok()
    }

    fn read_value(&self, file: &str) -> Result<u32> {
        let path = self.path.join(file);
        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        text.trim()
            .parse()
            .with_context(|| format!("Unexpected content in {}: {:?}", path.display(), text.trim()))
    }

    #[cfg(feature = "logind")]
    fn write_through_logind(&mut self, value: u32) -> Result<()> {
        if self.logind.is_none() {
            let connection = zbus::blocking::Connection::system().context("Failed to connect to the system bus")?;
            self.logind = Some(connection);
        }
        let connection = self.logind.as_ref().context("no system bus connection")?;

        connection
            .call_method(
                Some("org.freedesktop.login1"),
                "/org/freedesktop/login1/session/auto",
                Some("org.freedesktop.login1.Session"),
                "SetBrightness",
                &("backlight", self.name.as_str(), value),
            )
            .context("logind SetBrightness failed")?;
        Ok(())
    }
}

fn type_priority(kind: &str) -> u8 {
    match kind {
        "firmware" => 0,
        "platform" => 1,
        "raw" => 2,
        _ => 3,
    }
}

impl RangeProtocol for BacklightPanel {
    fn description(&self) -> String {
        format!("Integrated panel ({})", self.name)
    }

    fn read_range(&mut self) -> Result<BrightnessRange> {
        let max = self.read_value(FILE_MAX_BRIGHTNESS)?;
        let current = self.read_value(FILE_BRIGHTNESS)?;
        if max == 0 {
            anyhow::bail!("backlight reports a maximum brightness of 0");
        }
        Ok(BrightnessRange { min: 0, current: current.min(max), max })
    }

    fn write_value(&mut self, value: u32) -> Result<()> {
        let path = self.path.join(FILE_BRIGHTNESS);
        match fs::write(&path, value.to_string()) {
            Ok(()) => Ok(()),
            #[cfg(feature = "logind")]
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                debug!("{} not writable, using logind", path.display());
                self.write_through_logind(value)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to write {}", path.display())),
        }
    }
}

impl std::fmt::Debug for BacklightPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BacklightPanel({})", self.path.display())
    }
}
