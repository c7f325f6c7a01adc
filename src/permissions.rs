// SPDX-License-Identifier: GPL-3.0-only
//! Access checks reported when no device can be controlled

use std::fs;
use std::path::{Path, PathBuf};

use crate::protocols::backlight::BacklightPanel;
use crate::protocols::drm::DRM_DEV_PATH;

#[derive(Debug, Clone)]
pub struct PermissionCheckResult {
    pub requirements: Vec<PermissionRequirement>,
}

#[derive(Debug, Clone)]
pub struct PermissionRequirement {
    pub name: String,
    pub description: String,
    pub status: RequirementStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequirementStatus {
    Met,
    NotMet,
    NotApplicable,
    /// Some access but not all, the device may still work
    Partial,
}

impl PermissionRequirement {
    fn new(name: &str, description: impl Into<String>, status: RequirementStatus) -> Self {
        Self {
            name: name.to_string(),
            description: description.into(),
            status,
        }
    }
}

impl PermissionCheckResult {
    pub fn has_issues(&self) -> bool {
        self.requirements.iter().any(|r| r.status == RequirementStatus::NotMet)
    }

    pub fn summary(&self) -> String {
        let not_met = self
            .requirements
            .iter()
            .filter(|r| r.status == RequirementStatus::NotMet)
            .count();

        if not_met == 0 {
            let met_count = self.requirements.iter().filter(|r| r.status == RequirementStatus::Met).count();
            format!("All {} requirements met", met_count)
        } else {
            format!("{} requirement(s) not met", not_met)
        }
    }

    /// Write every requirement to the log, unmet ones as warnings
    pub fn log(&self, family: &str) {
        if self.has_issues() {
            warn!("Access checks for {}: {}", family, self.summary());
        } else {
            info!("Access checks for {}: {}", family, self.summary());
        }
        for requirement in &self.requirements {
            match requirement.status {
                RequirementStatus::NotMet => warn!("  {}: {}", requirement.name, requirement.description),
                RequirementStatus::Partial => info!("  {}: {}", requirement.name, requirement.description),
                RequirementStatus::Met | RequirementStatus::NotApplicable => {
                    debug!("  {}: {}", requirement.name, requirement.description)
                }
            }
        }
    }
}

/// Requirements for controlling external displays
pub fn check_external_access() -> PermissionCheckResult {
    let mut requirements = Vec::new();

    let i2c_devices = find_devices(Path::new("/dev"), "i2c-");
    requirements.push(device_presence("I2C devices", "/dev/i2c-*", &i2c_devices));
    requirements.push(device_access("I2C read/write access", &i2c_devices));

    let in_i2c_group = is_in_group("i2c");
    requirements.push(PermissionRequirement::new(
        "i2c group",
        if in_i2c_group {
            "User is in i2c group"
        } else {
            "User not in i2c group"
        },
        if in_i2c_group {
            RequirementStatus::Met
        } else {
            RequirementStatus::NotMet
        },
    ));

    let i2c_rules_exist = udev_rule_exists("45-i2c-permissions.rules");
    requirements.push(PermissionRequirement::new(
        "udev rules (I2C)",
        if i2c_rules_exist {
            "I2C udev rules installed"
        } else {
            "I2C udev rules not found"
        },
        if i2c_rules_exist {
            RequirementStatus::Met
        } else {
            RequirementStatus::NotMet
        },
    ));

    let drm_nodes = find_devices(Path::new(DRM_DEV_PATH), "card");
    requirements.push(device_access("DRM device access (gamma ramp)", &drm_nodes));

    #[cfg(feature = "apple-hid-displays")]
    {
        let apple_rules_exist = udev_rule_exists("99-apple-displays.rules");
        requirements.push(PermissionRequirement::new(
            "udev rules (Apple)",
            if apple_rules_exist {
                "Apple udev rules installed"
            } else {
                "Apple udev rules not found, only needed for Apple and LG UltraFine displays"
            },
            if apple_rules_exist {
                RequirementStatus::Met
            } else {
                RequirementStatus::NotApplicable
            },
        ));
    }

    PermissionCheckResult { requirements }
}

/// Requirements for controlling the integrated panel
pub fn check_panel_access() -> PermissionCheckResult {
    let mut requirements = Vec::new();

    let panel = BacklightPanel::discover();
    requirements.push(PermissionRequirement::new(
        "Backlight device",
        match &panel {
            Some(panel) => format!("Found {}", panel.name()),
            None => "No device under /sys/class/backlight".to_string(),
        },
        if panel.is_some() {
            RequirementStatus::Met
        } else {
            RequirementStatus::NotMet
        },
    ));

    if let Some(panel) = &panel {
        let writable = panel.is_writable();
        let (description, status) = match (writable, cfg!(feature = "logind")) {
            (true, _) => ("Brightness file is writable", RequirementStatus::Met),
            (false, true) => (
                "Brightness file is read-only, logind SetBrightness will be used",
                RequirementStatus::Partial,
            ),
            (false, false) => ("Brightness file is read-only", RequirementStatus::NotMet),
        };
        requirements.push(PermissionRequirement::new("Backlight write access", description, status));

        let in_video_group = is_in_group("video");
        requirements.push(PermissionRequirement::new(
            "video group",
            if in_video_group {
                "User is in video group"
            } else {
                "User not in video group"
            },
            if in_video_group || writable {
                RequirementStatus::Met
            } else {
                RequirementStatus::Partial
            },
        ));
    }

    let drm_nodes = find_devices(Path::new(DRM_DEV_PATH), "card");
    requirements.push(device_access("DRM device access (gamma ramp)", &drm_nodes));

    PermissionCheckResult { requirements }
}

fn device_presence(name: &str, pattern: &str, devices: &[PathBuf]) -> PermissionRequirement {
    if devices.is_empty() {
        PermissionRequirement::new(name, format!("No {} devices found", pattern), RequirementStatus::NotMet)
    } else {
        PermissionRequirement::new(
            name,
            format!("Found {} device(s)", devices.len()),
            RequirementStatus::Met,
        )
    }
}

fn device_access(name: &str, devices: &[PathBuf]) -> PermissionRequirement {
    let accessible_count = devices.iter().filter(|d| can_write(d)).count();

    if devices.is_empty() {
        PermissionRequirement::new(name, "N/A", RequirementStatus::NotApplicable)
    } else if accessible_count == devices.len() {
        PermissionRequirement::new(
            name,
            format!("Can access all {} device(s)", accessible_count),
            RequirementStatus::Met,
        )
    } else if accessible_count > 0 {
        PermissionRequirement::new(
            name,
            format!("Can access {}/{} device(s)", accessible_count, devices.len()),
            RequirementStatus::Partial,
        )
    } else {
        PermissionRequirement::new(name, "Cannot access any device", RequirementStatus::NotMet)
    }
}

/// Device nodes in `dir` whose name starts with `prefix`, sorted
fn find_devices(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut devices: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect();
    devices.sort();
    devices
}

fn udev_rule_exists(file: &str) -> bool {
    ["/etc/udev/rules.d", "/usr/lib/udev/rules.d"]
        .iter()
        .any(|dir| Path::new(dir).join(file).exists())
}

/// Check if we can write to a device
fn can_write(path: &Path) -> bool {
    fs::OpenOptions::new().write(true).open(path).is_ok()
}

/// Check if the current user is in `group`
fn is_in_group(group: &str) -> bool {
    use std::process::Command;

    match Command::new("groups").output() {
        Ok(output) => match String::from_utf8(output.stdout) {
            Ok(groups) => {
                debug!("Groups output: '{}'", groups.trim());
                groups.split_whitespace().any(|g| g == group)
            }
            Err(e) => {
                debug!("Failed to parse groups output: {}", e);
                false
            }
        },
        Err(e) => {
            debug!("Failed to run groups command: {}", e);
            false
        }
    }
}
