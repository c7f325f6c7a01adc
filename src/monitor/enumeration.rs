// SPDX-License-Identifier: GPL-3.0-only
//! Device discovery and capability probing
//!
//! Discovery builds one [`Candidate`] per output. Range protocols (DDC/CI,
//! Apple HID) are claimed by connectors through their EDID, or by monitor
//! name when the EDID is not available over the bus. Probing then decides
//! whether the candidate is driven by its range protocol or by the gamma
//! ramp of its CRTC.

use std::fmt;

use anyhow::Context;

use crate::protocols::backlight::BacklightPanel;
use crate::protocols::ddc_ci::DdcCiDisplay;
use crate::protocols::drm::{self, Connector, DrmGammaCrtc};
use crate::protocols::{GammaProtocol, RangeProtocol};

#[cfg(feature = "apple-hid-displays")]
use crate::protocols::apple_hid::AppleHidDisplay;

use super::backend::{Candidate, Device, DeviceControl, GammaOpener};

/// Words that appear in vendor strings but not in EDID monitor names
const VENDOR_WORDS: &[&str] = &["inc", "inc.", "computer", "corp", "corp.", "ltd", "ltd.", "apple", "dell", "lg", "samsung"];

/// Shortest normalized name allowed to match as a prefix
const MIN_PARTIAL_NAME: usize = 6;

/// What the baseline of a hardware range is set to when a device is adopted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselinePolicy {
    /// Raise the device to its maximum and use that as full brightness
    FullBrightness,
    /// Keep the brightness the device had when probed
    KeepCurrent,
}

impl BaselinePolicy {
    pub fn from_setting(full_brightness_on_start: bool) -> Self {
        if full_brightness_on_start {
            Self::FullBrightness
        } else {
            Self::KeepCurrent
        }
    }
}

/// Whether a probe may write to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Record the baseline and push it to the device
    Initialize(BaselinePolicy),
    /// Only read, used by diagnostics
    Inspect,
}

/// A candidate that could not be controlled, with the reason per path
#[derive(Debug, Clone)]
pub struct Rejection {
    pub description: String,
    pub range_error: String,
    pub gamma_error: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: hardware brightness: {}; gamma ramp: {}",
            self.description, self.range_error, self.gamma_error
        )
    }
}

/// Decide how a candidate is controlled
///
/// The range protocol is tried first. If it does not answer, its handle is
/// released before the gamma path is opened; if neither path works, every
/// handle is released and the candidate is rejected.
pub fn probe_candidate(candidate: Candidate, mode: ProbeMode) -> Result<Device, Rejection> {
    let Candidate {
        description,
        range,
        gamma,
    } = candidate;

    let range_error = match range {
        Some(handle) => match adopt_range(handle, mode) {
            Ok(control) => return Ok(Device::new(description, control)),
            Err(e) => {
                debug!("{}: hardware brightness unavailable: {:#}", description, e);
                format!("{e:#}")
            }
        },
        None => "no DDC/CI or HID brightness control found".to_string(),
    };

    let gamma_error = match gamma {
        Some(open) => match adopt_gamma(open, mode) {
            Ok(control) => {
                info!("{}: falling back to the gamma ramp", description);
                return Ok(Device::new(description, control));
            }
            Err(e) => {
                debug!("{}: gamma ramp unavailable: {:#}", description, e);
                format!("{e:#}")
            }
        },
        None => "no CRTC gamma ramp for this output".to_string(),
    };

    Err(Rejection {
        description,
        range_error,
        gamma_error,
    })
}

fn adopt_range(mut handle: Box<dyn RangeProtocol>, mode: ProbeMode) -> anyhow::Result<DeviceControl> {
    let mut baseline = handle.read_range()?;
    if baseline.max == 0 || baseline.max < baseline.min {
        anyhow::bail!("device reports an unusable range {}..{}", baseline.min, baseline.max);
    }

    if let ProbeMode::Initialize(policy) = mode {
        if policy == BaselinePolicy::FullBrightness {
            baseline.current = baseline.max;
        } else if baseline.current <= baseline.min {
            warn!(
                "{} reports minimum brightness; dimming will have no visible effect",
                handle.description()
            );
        }
        // Also confirms that the device accepts writes
        handle.write_value(baseline.current)?;
    }

    Ok(DeviceControl::HardwareRange { handle, baseline })
}

fn adopt_gamma(open: GammaOpener, mode: ProbeMode) -> anyhow::Result<DeviceControl> {
    let mut handle = open()?;
    let baseline = handle
        .read_ramp()
        .with_context(|| format!("failed to read the gamma ramp of {}", handle.description()))?;
    // Reading works without DRM master, writing does not
    if let ProbeMode::Initialize(_) = mode {
        handle.write_ramp(&baseline)?;
    }
    Ok(DeviceControl::GammaRamp {
        handle,
        baseline: Box::new(baseline),
    })
}

/// A range protocol waiting to be claimed by a connector
pub struct RangeSource {
    pub edid: Option<Vec<u8>>,
    pub name: Option<String>,
    pub protocol: Box<dyn RangeProtocol>,
}

/// Lowercase alphanumerics of a model name, vendor words removed
pub fn normalize_model(name: &str) -> String {
    name.split_whitespace()
        .filter(|word| !VENDOR_WORDS.contains(&word.to_lowercase().as_str()))
        .flat_map(|word| word.chars())
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Whether two model names refer to the same monitor, e.g.
/// "Apple Inc. Studio Display" and "StudioDisplay"
pub fn names_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_model(a), normalize_model(b));
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (short, long) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
    short.len() >= MIN_PARTIAL_NAME && long.starts_with(short.as_str())
}

/// Take the source that belongs to `connector` out of `pool`
///
/// EDID identity wins over name similarity.
pub fn claim_source(pool: &mut Vec<RangeSource>, connector: &Connector) -> Option<RangeSource> {
    let by_edid = pool.iter().position(|source| {
        source
            .edid
            .as_deref()
            .is_some_and(|edid| drm::edid_matches(edid, &connector.edid))
    });

    let index = by_edid.or_else(|| {
        let monitor_name = connector.monitor_name()?;
        pool.iter().position(|source| {
            source
                .name
                .as_deref()
                .is_some_and(|name| names_match(name, &monitor_name))
        })
    })?;

    Some(pool.remove(index))
}

/// Pair each connector with its range source
///
/// Sources claimed by internal connectors are dropped, since the panel is
/// handled by its own family. Unclaimed sources are returned last.
pub fn assign_sources(
    connectors: Vec<Connector>,
    mut pool: Vec<RangeSource>,
) -> (Vec<(Connector, Option<RangeSource>)>, Vec<RangeSource>) {
    let mut external = Vec::new();

    for connector in connectors {
        let source = claim_source(&mut pool, &connector);
        if connector.is_internal() {
            if let Some(source) = source {
                debug!(
                    "Ignoring {} on internal connector {}",
                    source.protocol.description(),
                    connector.name
                );
            }
            continue;
        }
        external.push((connector, source));
    }

    (external, pool)
}

fn gamma_opener(connector: Connector) -> GammaOpener {
    Box::new(move || {
        let crtc = DrmGammaCrtc::open(&connector)?;
        Ok(Box::new(crtc) as Box<dyn GammaProtocol>)
    })
}

fn range_sources() -> Vec<RangeSource> {
    let mut pool: Vec<RangeSource> = DdcCiDisplay::enumerate()
        .into_iter()
        .map(|display| RangeSource {
            edid: display.edid().map(<[u8]>::to_vec),
            name: display.model_name().map(str::to_string),
            protocol: Box::new(display),
        })
        .collect();
    debug!("Found {} DDC/CI display(s)", pool.len());

    #[cfg(feature = "apple-hid-displays")]
    {
        match hidapi::HidApi::new() {
            Ok(api) => {
                for hid_display in AppleHidDisplay::enumerate(&api) {
                    debug!("Found Apple HID display {}", hid_display.description());
                    pool.push(RangeSource {
                        edid: None,
                        name: Some(hid_display.model_name().to_string()),
                        protocol: Box::new(hid_display),
                    });
                }
            }
            Err(e) => warn!("Failed to initialize HID API: {e}"),
        }
    }

    pool
}

/// Candidates for every connected external display
pub fn discover_external() -> Vec<Candidate> {
    let connectors = drm::connected_connectors();
    let (matched, unclaimed) = assign_sources(connectors, range_sources());

    let mut candidates = Vec::new();
    for (connector, source) in matched {
        let mut candidate = Candidate::new(connector.description());
        if let Some(source) = source {
            candidate = candidate.with_range(source.protocol);
        }
        candidates.push(candidate.with_gamma(gamma_opener(connector)));
    }

    // Displays without a DRM connector, e.g. on drivers that do not expose sysfs
    for source in unclaimed {
        candidates.push(Candidate::new(source.protocol.description()).with_range(source.protocol));
    }

    info!("Found {} external display candidate(s)", candidates.len());
    candidates
}

/// The integrated panel, as at most one candidate
pub fn discover_panel() -> Vec<Candidate> {
    let backlight = BacklightPanel::discover();
    let connector = drm::connected_connectors().into_iter().find(Connector::is_internal);

    let description = match (&connector, &backlight) {
        (Some(connector), _) => connector.description(),
        (None, Some(backlight)) => backlight.description(),
        (None, None) => {
            info!("No integrated panel found");
            return Vec::new();
        }
    };

    let mut candidate = Candidate::new(description);
    if let Some(backlight) = backlight {
        candidate = candidate.with_range(Box::new(backlight));
    }
    if let Some(connector) = connector {
        candidate = candidate.with_gamma(gamma_opener(connector));
    }
    vec![candidate]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brightness::FULL_BRIGHTNESS;
    use crate::protocols::testing::{MockGamma, MockRange};
    use crate::protocols::{BrightnessRange, GammaRamp};

    fn range(min: u32, current: u32, max: u32) -> BrightnessRange {
        BrightnessRange { min, current, max }
    }

    fn connector(name: &str, monitor: Option<&str>, serial: u8) -> Connector {
        let mut edid = vec![0u8; 128];
        edid[12] = serial;
        if let Some(monitor) = monitor {
            edid[72..77].copy_from_slice(&[0, 0, 0, 0xFC, 0]);
            let mut text = [b' '; 13];
            text[..monitor.len()].copy_from_slice(monitor.as_bytes());
            if monitor.len() < text.len() {
                text[monitor.len()] = b'\n';
            }
            edid[77..90].copy_from_slice(&text);
        }
        Connector {
            card: "card0".to_string(),
            name: name.to_string(),
            connector_id: None,
            edid,
        }
    }

    fn source(name: &str, edid: Option<Vec<u8>>) -> RangeSource {
        let (protocol, _) = MockRange::new(name, range(0, 50, 100));
        RangeSource {
            edid,
            name: Some(name.to_string()),
            protocol,
        }
    }

    #[test]
    fn test_range_probe_full_brightness_policy() {
        let (handle, log) = MockRange::new("DDC", range(0, 40, 100));
        let candidate = Candidate::new("Monitor").with_range(handle);

        let device = probe_candidate(candidate, ProbeMode::Initialize(BaselinePolicy::FullBrightness)).unwrap();
        match device.control() {
            DeviceControl::HardwareRange { baseline, .. } => assert_eq!(*baseline, range(0, 100, 100)),
            DeviceControl::GammaRamp { .. } => panic!("expected hardware range"),
        }
        assert_eq!(log.lock().unwrap().values, vec![100]);
    }

    #[test]
    fn test_range_probe_keep_current_policy() {
        let (handle, log) = MockRange::new("DDC", range(0, 40, 100));
        let mut device = probe_candidate(
            Candidate::new("Monitor").with_range(handle),
            ProbeMode::Initialize(BaselinePolicy::KeepCurrent),
        )
        .unwrap();

        device.set_brightness(0.5).unwrap();
        device.set_brightness(FULL_BRIGHTNESS).unwrap();
        assert_eq!(log.lock().unwrap().values, vec![40, 20, 40]);
    }

    #[test]
    fn test_inspect_does_not_write() {
        let (handle, log) = MockRange::new("DDC", range(0, 40, 100));
        probe_candidate(Candidate::new("Monitor").with_range(handle), ProbeMode::Inspect).unwrap();
        assert!(log.lock().unwrap().values.is_empty());
    }

    #[test]
    fn test_falls_back_to_gamma_and_releases_range() {
        let (range_handle, range_log) = MockRange::failing("DDC");
        let (gamma_handle, gamma_log) = MockGamma::new("CRTC", GammaRamp::identity());
        let candidate = Candidate::new("Monitor")
            .with_range(range_handle)
            .with_gamma(Box::new(move || Ok(gamma_handle)));

        let mut device = probe_candidate(candidate, ProbeMode::Initialize(BaselinePolicy::FullBrightness)).unwrap();
        assert!(device.is_gamma());
        assert!(range_log.lock().unwrap().released);

        device.set_brightness(FULL_BRIGHTNESS).unwrap();
        assert_eq!(gamma_log.lock().unwrap().ramps.last(), Some(&GammaRamp::identity()));

        device.set_brightness(0.5).unwrap();
        assert_eq!(
            gamma_log.lock().unwrap().ramps.last(),
            Some(&GammaRamp::identity().scaled(0.5))
        );

        drop(device);
        assert!(gamma_log.lock().unwrap().released);
    }

    #[test]
    fn test_rejects_when_nothing_answers() {
        let (range_handle, range_log) = MockRange::failing("DDC");
        let (gamma_handle, gamma_log) = MockGamma::new("CRTC", GammaRamp::identity());
        gamma_log.lock().unwrap().fail_reads = true;
        let candidate = Candidate::new("Monitor")
            .with_range(range_handle)
            .with_gamma(Box::new(move || Ok(gamma_handle)));

        let rejection = probe_candidate(candidate, ProbeMode::Inspect).unwrap_err();
        assert_eq!(rejection.description, "Monitor");
        assert!(rejection.range_error.contains("no answer"));
        assert!(rejection.gamma_error.contains("unavailable"));
        assert!(range_log.lock().unwrap().released);
        assert!(gamma_log.lock().unwrap().released);
    }

    #[test]
    fn test_rejects_zero_maximum() {
        let (handle, _) = MockRange::new("DDC", range(0, 0, 0));
        assert!(probe_candidate(Candidate::new("Monitor").with_range(handle), ProbeMode::Inspect).is_err());
    }

    #[test]
    fn test_failed_baseline_write_uses_gamma() {
        let (range_handle, range_log) = MockRange::new("DDC", range(0, 40, 100));
        range_log.lock().unwrap().fail_writes = true;
        let (gamma_handle, _) = MockGamma::new("CRTC", GammaRamp::identity());
        let candidate = Candidate::new("Monitor")
            .with_range(range_handle)
            .with_gamma(Box::new(move || Ok(gamma_handle)));

        let device = probe_candidate(candidate, ProbeMode::Initialize(BaselinePolicy::KeepCurrent)).unwrap();
        assert!(device.is_gamma());
    }

    #[test]
    fn test_names_match() {
        assert!(names_match("Apple Inc. Studio Display", "StudioDisplay"));
        assert!(names_match("DELL U2720Q", "Dell U2720Q"));
        assert!(names_match("LG UltraFine", "LG UltraFine 5K"));
        assert!(!names_match("StudioDisplay", "Display"));
        assert!(!names_match("", "Display"));
    }

    #[test]
    fn test_assign_prefers_edid() {
        let dp1 = connector("DP-1", Some("DELL U2720Q"), 1);
        let dp2 = connector("DP-2", Some("DELL U2720Q"), 2);
        let pool = vec![
            source("DELL U2720Q", Some(dp2.edid.clone())),
            source("DELL U2720Q", Some(dp1.edid.clone())),
        ];

        let (matched, unclaimed) = assign_sources(vec![dp1.clone(), dp2.clone()], pool);
        assert!(unclaimed.is_empty());
        for (connector, source) in matched {
            assert_eq!(source.unwrap().edid.unwrap(), connector.edid);
        }
    }

    #[test]
    fn test_assign_by_name_and_internal() {
        let edp = connector("eDP-1", Some("Panel"), 1);
        let hdmi = connector("HDMI-A-1", Some("StudioDisplay"), 2);
        let unknown = connector("DP-3", None, 3);
        let pool = vec![
            source("Apple Studio Display", None),
            source("Built-in", Some(edp.edid.clone())),
            source("Projector", None),
        ];

        let (matched, unclaimed) = assign_sources(vec![edp, hdmi, unknown], pool);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].0.name, "HDMI-A-1");
        assert_eq!(matched[0].1.as_ref().unwrap().name.as_deref(), Some("Apple Studio Display"));
        assert_eq!(matched[1].0.name, "DP-3");
        assert!(matched[1].1.is_none());
        assert_eq!(unclaimed.len(), 1);
        assert_eq!(unclaimed[0].name.as_deref(), Some("Projector"));
    }

    #[test]
    fn test_baseline_policy_from_setting() {
        assert_eq!(BaselinePolicy::from_setting(true), BaselinePolicy::FullBrightness);
        assert_eq!(BaselinePolicy::from_setting(false), BaselinePolicy::KeepCurrent);
    }
}
