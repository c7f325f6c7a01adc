// SPDX-License-Identifier: GPL-3.0-only
//! Brightness control strategies
//!
//! A strategy owns every device of one control family and commands them as
//! a group. Two families exist: external displays and the integrated panel.

pub mod chooser;

#[cfg(test)]
pub mod testing;

use std::time::{Duration, Instant};

use crate::brightness::FULL_BRIGHTNESS;
use crate::error::AppError;
use crate::monitor::{
    BaselinePolicy, Candidate, Device, ProbeMode, discover_external, discover_panel, probe_candidate,
};
use crate::permissions::{self, PermissionCheckResult};

pub use chooser::{ActiveStrategy, choose_strategy};

/// Uniform control over one family of devices
pub trait BrightnessStrategy: Send {
    fn name(&self) -> &str;

    /// Probe devices, returns whether at least one is usable
    fn initialize(&mut self) -> bool;

    /// Command every device to `fraction` of its baseline
    ///
    /// Failures are logged per device and do not stop the remaining devices.
    /// Returns true only if every device accepted the command.
    fn set_brightness(&mut self, fraction: f32) -> bool;

    /// Log why each device of this family is or is not controllable
    fn diagnose(&mut self);

    /// Log the chosen control kind and baseline of each device
    fn print_configuration(&self);

    /// Dim fully and restore, returns the time the round trip took
    fn test_responsiveness(&mut self) -> Duration;

    /// Release every device and probe again
    fn refresh(&mut self) -> bool;

    /// Release every device. Calling it again does nothing.
    fn dispose(&mut self);

    fn works(&self) -> bool;
}

/// Where the candidates of a strategy come from
pub trait DeviceFamily: Send {
    fn name(&self) -> &'static str;

    fn discover(&self) -> Vec<Candidate>;

    fn check_access(&self) -> PermissionCheckResult;

    /// Common reasons a device of this family rejects control
    fn probable_causes(&self) -> &'static [&'static str];
}

/// Connected monitors, driven over DDC/CI, Apple HID or their CRTC gamma ramp
#[derive(Debug, Default)]
pub struct ExternalDisplays;

impl DeviceFamily for ExternalDisplays {
    fn name(&self) -> &'static str {
        "external displays"
    }

    fn discover(&self) -> Vec<Candidate> {
        discover_external()
    }

    fn check_access(&self) -> PermissionCheckResult {
        permissions::check_external_access()
    }

    fn probable_causes(&self) -> &'static [&'static str] {
        &[
            "the monitor does not implement DDC/CI, or it is disabled in its on-screen menu (common on TVs)",
            "another program is using the I2C bus, or the compositor holds DRM master and rejects gamma writes",
            "the GPU or docking station driver does not expose DDC/CI or gamma for this output (e.g. DisplayLink)",
        ]
    }
}

/// The built-in laptop panel, driven by its backlight or its gamma ramp
#[derive(Debug, Default)]
pub struct IntegratedPanel;

impl DeviceFamily for IntegratedPanel {
    fn name(&self) -> &'static str {
        "integrated panel"
    }

    fn discover(&self) -> Vec<Candidate> {
        discover_panel()
    }

    fn check_access(&self) -> PermissionCheckResult {
        permissions::check_panel_access()
    }

    fn probable_causes(&self) -> &'static [&'static str] {
        &[
            "this machine has no built-in panel",
            "the backlight driver is missing, e.g. the kernel was booted with acpi_backlight=none",
            "the brightness file is not writable and logind is not reachable",
        ]
    }
}

/// Strategy over the devices one family yields after probing
pub struct ProbedStrategy<F: DeviceFamily> {
    family: F,
    policy: BaselinePolicy,
    devices: Vec<Device>,
}

pub type ExternalDisplayStrategy = ProbedStrategy<ExternalDisplays>;
pub type PanelStrategy = ProbedStrategy<IntegratedPanel>;

impl<F: DeviceFamily> ProbedStrategy<F> {
    pub fn new(family: F, policy: BaselinePolicy) -> Self {
        Self {
            family,
            policy,
            devices: Vec::new(),
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }
}

impl<F: DeviceFamily> BrightnessStrategy for ProbedStrategy<F> {
    fn name(&self) -> &str {
        self.family.name()
    }

    fn initialize(&mut self) -> bool {
        self.dispose();

        for candidate in self.family.discover() {
            match probe_candidate(candidate, ProbeMode::Initialize(self.policy)) {
                Ok(device) => {
                    let kind = if device.is_gamma() { "gamma ramp" } else { "hardware brightness" };
                    info!("Adopted {} ({})", device.description(), kind);
                    self.devices.push(device);
                }
                Err(rejection) => {
                    warn!(
                        device = %rejection.description,
                        "Device rejected brightness control: hardware brightness: {}; gamma ramp: {}",
                        rejection.range_error,
                        rejection.gamma_error
                    );
                }
            }
        }

        info!("{}: {} usable device(s)", self.family.name(), self.devices.len());
        self.works()
    }

    fn set_brightness(&mut self, fraction: f32) -> bool {
        if self.devices.is_empty() {
            debug!("{}: no devices to command", self.family.name());
            return false;
        }

        let mut all_ok = true;
        for device in &mut self.devices {
            if let Err(source) = device.set_brightness(fraction) {
                let err = AppError::Device {
                    device: device.description().to_string(),
                    source,
                };
                error!("Failed to set brightness: {:#}", err);
                all_ok = false;
            }
        }
        all_ok
    }

    fn diagnose(&mut self) {
        let name = self.family.name();
        info!("Diagnosing {}", name);

        let candidates = self.family.discover();
        if candidates.is_empty() {
            warn!("No {} found", name);
        }

        let mut rejected = 0;
        for candidate in candidates {
            match probe_candidate(candidate, ProbeMode::Inspect) {
                Ok(device) => info!("{}: controllable. {}", name, device.configuration()),
                Err(rejection) => {
                    rejected += 1;
                    warn!("{}: {}", name, rejection);
                }
            }
        }

        if rejected > 0 || !self.works() {
            warn!("Probable causes for {}:", name);
            for cause in self.family.probable_causes() {
                warn!("  - {}", cause);
            }
        }

        self.family.check_access().log(name);
    }

    fn print_configuration(&self) {
        for device in &self.devices {
            info!("{}", device.configuration());
        }
    }

    fn test_responsiveness(&mut self) -> Duration {
        let start = Instant::now();
        let dimmed = self.set_brightness(0.0);
        let restored = self.set_brightness(FULL_BRIGHTNESS);
        let elapsed = start.elapsed();

        if dimmed && restored {
            info!("{}: dim and restore took {} ms", self.family.name(), elapsed.as_millis());
        } else {
            warn!(
                "{}: responsiveness test had failures, took {} ms",
                self.family.name(),
                elapsed.as_millis()
            );
        }
        elapsed
    }

    fn refresh(&mut self) -> bool {
        info!("Re-enumerating {}", self.family.name());
        self.initialize()
    }

    fn dispose(&mut self) {
        if !self.devices.is_empty() {
            debug!("{}: releasing {} device(s)", self.family.name(), self.devices.len());
            self.devices.clear();
        }
    }

    fn works(&self) -> bool {
        !self.devices.is_empty()
    }
}

impl<F: DeviceFamily> Drop for ProbedStrategy<F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::protocols::testing::{MockGamma, MockRange, SharedLog};
    use crate::protocols::{BrightnessRange, GammaRamp};

    /// Family that hands out prepared candidates, one batch per discovery
    struct MockFamily {
        batches: Mutex<Vec<Vec<Candidate>>>,
    }

    impl MockFamily {
        fn new(mut batches: Vec<Vec<Candidate>>) -> Self {
            batches.reverse();
            Self {
                batches: Mutex::new(batches),
            }
        }
    }

    impl DeviceFamily for MockFamily {
        fn name(&self) -> &'static str {
            "mock displays"
        }

        fn discover(&self) -> Vec<Candidate> {
            self.batches.lock().unwrap().pop().unwrap_or_default()
        }

        fn check_access(&self) -> PermissionCheckResult {
            PermissionCheckResult { requirements: Vec::new() }
        }

        fn probable_causes(&self) -> &'static [&'static str] {
            &["mocked"]
        }
    }

    fn range_candidate(name: &str, current: u32) -> (Candidate, SharedLog) {
        let (handle, log) = MockRange::new(name, BrightnessRange { min: 0, current, max: 100 });
        (Candidate::new(name).with_range(handle), log)
    }

    fn strategy(batches: Vec<Vec<Candidate>>) -> ProbedStrategy<MockFamily> {
        ProbedStrategy::new(MockFamily::new(batches), BaselinePolicy::KeepCurrent)
    }

    #[test]
    fn test_initialize_without_devices() {
        let mut strategy = strategy(vec![]);
        assert!(!strategy.initialize());
        assert!(!strategy.works());
        assert!(!strategy.set_brightness(0.5));
    }

    #[test]
    fn test_drops_unusable_devices() {
        let (good, _) = range_candidate("good", 80);
        let (bad_handle, bad_log) = MockRange::failing("bad");
        let bad = Candidate::new("bad").with_range(bad_handle);

        let mut strategy = strategy(vec![vec![bad, good]]);
        assert!(strategy.initialize());
        assert_eq!(strategy.devices().len(), 1);
        assert_eq!(strategy.devices()[0].description(), "good");
        assert!(bad_log.lock().unwrap().released);
    }

    #[test]
    fn test_set_brightness_is_best_effort() {
        let (first, first_log) = range_candidate("first", 80);
        let (second, second_log) = range_candidate("second", 60);
        let mut strategy = strategy(vec![vec![first, second]]);
        assert!(strategy.initialize());

        first_log.lock().unwrap().fail_writes = true;
        assert!(!strategy.set_brightness(0.5));
        assert_eq!(second_log.lock().unwrap().values.last(), Some(&30));

        first_log.lock().unwrap().fail_writes = false;
        assert!(strategy.set_brightness(0.5));
        assert_eq!(first_log.lock().unwrap().values.last(), Some(&40));
    }

    #[test]
    fn test_full_brightness_twice_is_stable() {
        let (gamma, gamma_log) = MockGamma::new("crtc", GammaRamp::identity());
        let candidate = Candidate::new("gamma").with_gamma(Box::new(move || Ok(gamma)));
        let mut strategy = strategy(vec![vec![candidate]]);
        assert!(strategy.initialize());
        gamma_log.lock().unwrap().ramps.clear();

        assert!(strategy.set_brightness(FULL_BRIGHTNESS));
        assert!(strategy.set_brightness(FULL_BRIGHTNESS));
        let log = gamma_log.lock().unwrap();
        assert_eq!(log.ramps.len(), 2);
        assert!(log.ramps.iter().all(|ramp| *ramp == GammaRamp::identity()));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (candidate, log) = range_candidate("display", 80);
        let mut strategy = strategy(vec![vec![candidate]]);
        assert!(strategy.initialize());

        strategy.dispose();
        assert!(log.lock().unwrap().released);
        assert!(!strategy.works());
        strategy.dispose();
        assert!(!strategy.works());
    }

    #[test]
    fn test_refresh_releases_old_devices() {
        let (old, old_log) = range_candidate("old", 80);
        let (new, new_log) = range_candidate("new", 50);
        let mut strategy = strategy(vec![vec![old], vec![new]]);
        assert!(strategy.initialize());

        assert!(strategy.refresh());
        assert!(old_log.lock().unwrap().released);
        assert_eq!(strategy.devices()[0].description(), "new");
        assert!(!new_log.lock().unwrap().released);
    }

    #[test]
    fn test_responsiveness_dims_then_restores() {
        let (candidate, log) = range_candidate("display", 80);
        let mut strategy = strategy(vec![vec![candidate]]);
        assert!(strategy.initialize());

        strategy.test_responsiveness();
        assert_eq!(log.lock().unwrap().values, vec![80, 0, 80]);
    }

    #[test]
    fn test_diagnose_only_reads() {
        let (candidate, log) = range_candidate("display", 80);
        let mut strategy = strategy(vec![vec![candidate]]);
        strategy.diagnose();
        assert!(log.lock().unwrap().values.is_empty());
        assert!(!strategy.works());
    }
}
