// SPDX-License-Identifier: GPL-3.0-only
//! DRM/KMS connectors and CRTC gamma ramps
//!
//! Connected outputs are discovered through `/sys/class/drm`, which also
//! carries each connector's EDID. The gamma fallback talks to the DRM device
//! node directly: connector -> encoder -> CRTC, then the CRTC's gamma LUT.
//! Writing a LUT requires DRM master, which a running compositor usually
//! holds, so reads may succeed where writes later fail.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use super::{GAMMA_RAMP_SIZE, GammaProtocol, GammaRamp};

/// Location of DRM connectors in sysfs
pub const DRM_SYSFS_PATH: &str = "/sys/class/drm";

/// Directory holding DRM device nodes
pub const DRM_DEV_PATH: &str = "/dev/dri";

/// Connector name prefixes of built-in panels
const INTERNAL_PREFIXES: &[&str] = &["eDP", "LVDS", "DSI"];

/// Size of the EDID base block
const EDID_BLOCK_SIZE: usize = 128;

/// A connected DRM connector
#[derive(Debug, Clone)]
pub struct Connector {
    /// Card the connector belongs to, e.g. `card0`
    pub card: String,
    /// Connector name, e.g. `DP-1`
    pub name: String,
    /// KMS object id, if the kernel exposes it
    pub connector_id: Option<u32>,
    pub edid: Vec<u8>,
}

impl Connector {
    /// Built-in laptop panel connector
    pub fn is_internal(&self) -> bool {
        INTERNAL_PREFIXES.iter().any(|prefix| self.name.starts_with(prefix))
    }

    /// Monitor name from the EDID descriptor, if present
    pub fn monitor_name(&self) -> Option<String> {
        edid_monitor_name(&self.edid)
    }

    pub fn description(&self) -> String {
        let name = self.monitor_name().unwrap_or_else(|| "Unknown display".to_string());
        format!("{} ({})", name, self.name)
    }

    pub fn device_node(&self) -> PathBuf {
        Path::new(DRM_DEV_PATH).join(&self.card)
    }
}

/// All connected connectors, sorted by card and name
pub fn connected_connectors() -> Vec<Connector> {
    connected_connectors_in(Path::new(DRM_SYSFS_PATH))
}

pub fn connected_connectors_in(root: &Path) -> Vec<Connector> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut connectors: Vec<Connector> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            // Connector directories look like `card0-DP-1`; `card0` itself is the device
            let (card, name) = dir_name.split_once('-')?;
            if !card.starts_with("card") {
                return None;
            }

            let path = entry.path();
            let status = fs::read_to_string(path.join("status")).ok()?;
            if status.trim() != "connected" {
                return None;
            }

            let connector_id = fs::read_to_string(path.join("connector_id"))
                .ok()
                .and_then(|id| id.trim().parse().ok());
            let edid = fs::read(path.join("edid")).unwrap_or_default();

            Some(Connector {
                card: card.to_string(),
                name: name.to_string(),
                connector_id,
                edid,
            })
        })
        .collect();

    connectors.sort_by(|a, b| (&a.card, &a.name).cmp(&(&b.card, &b.name)));
    connectors
}

/// Monitor name stored in the EDID display descriptors (tag 0xFC)
pub fn edid_monitor_name(edid: &[u8]) -> Option<String> {
    if edid.len() < EDID_BLOCK_SIZE {
        return None;
    }

    edid[54..126].chunks_exact(18).find_map(|descriptor| {
        if descriptor[..3] != [0, 0, 0] || descriptor[3] != 0xFC {
            return None;
        }
        let text = &descriptor[5..];
        let end = text.iter().position(|&b| b == b'\n').unwrap_or(text.len());
        let name = String::from_utf8_lossy(&text[..end]).trim().to_string();
        (!name.is_empty()).then_some(name)
    })
}

/// Whether two EDIDs describe the same monitor
pub fn edid_matches(a: &[u8], b: &[u8]) -> bool {
    a.len() >= EDID_BLOCK_SIZE && b.len() >= EDID_BLOCK_SIZE && a[..EDID_BLOCK_SIZE] == b[..EDID_BLOCK_SIZE]
}

const fn drm_iowr(nr: u32, size: usize) -> u64 {
    // _IOC(_IOC_READ | _IOC_WRITE, 'd', nr, size)
    ((3u64) << 30) | ((size as u64) << 16) | ((b'd' as u64) << 8) | nr as u64
}

#[repr(C)]
#[derive(Debug, Default)]
struct DrmModeGetConnector {
    encoders_ptr: u64,
    modes_ptr: u64,
    props_ptr: u64,
    prop_values_ptr: u64,
    count_modes: u32,
    count_props: u32,
    count_encoders: u32,
    encoder_id: u32,
    connector_id: u32,
    connector_type: u32,
    connector_type_id: u32,
    connection: u32,
    mm_width: u32,
    mm_height: u32,
    subpixel: u32,
    pad: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DrmModeGetEncoder {
    encoder_id: u32,
    encoder_type: u32,
    crtc_id: u32,
    possible_crtcs: u32,
    possible_clones: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DrmModeModeInfo {
    clock: u32,
    hdisplay: u16,
    hsync_start: u16,
    hsync_end: u16,
    htotal: u16,
    hskew: u16,
    vdisplay: u16,
    vsync_start: u16,
    vsync_end: u16,
    vtotal: u16,
    vscan: u16,
    vrefresh: u32,
    flags: u32,
    kind: u32,
    name: [u8; 32],
}

#[repr(C)]
#[derive(Debug, Default)]
struct DrmModeCrtc {
    set_connectors_ptr: u64,
    count_connectors: u32,
    crtc_id: u32,
    fb_id: u32,
    x: u32,
    y: u32,
    gamma_size: u32,
    mode_valid: u32,
    mode: DrmModeModeInfo,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DrmModeCrtcLut {
    crtc_id: u32,
    gamma_size: u32,
    red: u64,
    green: u64,
    blue: u64,
}

const DRM_IOCTL_MODE_GETCRTC: u64 = drm_iowr(0xA1, std::mem::size_of::<DrmModeCrtc>());
const DRM_IOCTL_MODE_GETGAMMA: u64 = drm_iowr(0xA4, std::mem::size_of::<DrmModeCrtcLut>());
const DRM_IOCTL_MODE_SETGAMMA: u64 = drm_iowr(0xA5, std::mem::size_of::<DrmModeCrtcLut>());
const DRM_IOCTL_MODE_GETENCODER: u64 = drm_iowr(0xA6, std::mem::size_of::<DrmModeGetEncoder>());
const DRM_IOCTL_MODE_GETCONNECTOR: u64 = drm_iowr(0xA7, std::mem::size_of::<DrmModeGetConnector>());

fn drm_ioctl<T>(card: &File, request: u64, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` is the #[repr(C)] struct the request was sized for and
        // outlives the call; the fd stays open while `card` is borrowed
        let ret = unsafe { libc::ioctl(card.as_raw_fd(), request as _, arg as *mut T) };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
            _ => return Err(err),
        }
    }
}

/// Gamma LUT of the CRTC driving one connector
pub struct DrmGammaCrtc {
    card: File,
    crtc_id: u32,
    description: String,
}

impl DrmGammaCrtc {
    /// Resolve the CRTC behind `connector` and check its LUT size
    pub fn open(connector: &Connector) -> Result<Self> {
        let connector_id = connector
            .connector_id
            .context("kernel does not expose connector_id in sysfs")?;

        let node = connector.device_node();
        let card = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&node)
            .with_context(|| format!("Failed to open {}", node.display()))?;

        let mut conn = DrmModeGetConnector { connector_id, ..Default::default() };
        drm_ioctl(&card, DRM_IOCTL_MODE_GETCONNECTOR, &mut conn).context("DRM GETCONNECTOR failed")?;
        if conn.encoder_id == 0 {
            bail!("connector {} has no active encoder", connector.name);
        }

        let mut encoder = DrmModeGetEncoder { encoder_id: conn.encoder_id, ..Default::default() };
        drm_ioctl(&card, DRM_IOCTL_MODE_GETENCODER, &mut encoder).context("DRM GETENCODER failed")?;
        if encoder.crtc_id == 0 {
            bail!("connector {} is not driven by a CRTC", connector.name);
        }

        let mut crtc = DrmModeCrtc { crtc_id: encoder.crtc_id, ..Default::default() };
        drm_ioctl(&card, DRM_IOCTL_MODE_GETCRTC, &mut crtc).context("DRM GETCRTC failed")?;
        if crtc.gamma_size as usize != GAMMA_RAMP_SIZE {
            bail!(
                "CRTC {} has a {}-entry gamma LUT, expected {}",
                crtc.crtc_id,
                crtc.gamma_size,
                GAMMA_RAMP_SIZE
            );
        }

        Ok(Self {
            card,
            crtc_id: crtc.crtc_id,
            description: connector.description(),
        })
    }
}

impl GammaProtocol for DrmGammaCrtc {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn read_ramp(&mut self) -> Result<GammaRamp> {
        let mut ramp = GammaRamp::zeroed();
        let mut lut = DrmModeCrtcLut {
            crtc_id: self.crtc_id,
            gamma_size: GAMMA_RAMP_SIZE as u32,
            red: ramp.red.as_mut_ptr() as u64,
            green: ramp.green.as_mut_ptr() as u64,
            blue: ramp.blue.as_mut_ptr() as u64,
        };
        drm_ioctl(&self.card, DRM_IOCTL_MODE_GETGAMMA, &mut lut).context("DRM GETGAMMA failed")?;
        Ok(ramp)
    }

    fn write_ramp(&mut self, ramp: &GammaRamp) -> Result<()> {
        let mut lut = DrmModeCrtcLut {
            crtc_id: self.crtc_id,
            gamma_size: GAMMA_RAMP_SIZE as u32,
            red: ramp.red.as_ptr() as u64,
            green: ramp.green.as_ptr() as u64,
            blue: ramp.blue.as_ptr() as u64,
        };
        drm_ioctl(&self.card, DRM_IOCTL_MODE_SETGAMMA, &mut lut)
            .context("DRM SETGAMMA failed (another process may be DRM master)")?;
        Ok(())
    }
}

impl std::fmt::Debug for DrmGammaCrtc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DrmGammaCrtc(crtc: {}, {})", self.crtc_id, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edid_with_name(name: &str) -> Vec<u8> {
        let mut edid = vec![0u8; EDID_BLOCK_SIZE];
        edid[..8].copy_from_slice(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
        // Second descriptor slot
        let offset = 54 + 18;
        edid[offset + 3] = 0xFC;
        let mut text = [b' '; 13];
        text[..name.len()].copy_from_slice(name.as_bytes());
        if name.len() < 13 {
            text[name.len()] = b'\n';
        }
        edid[offset + 5..offset + 18].copy_from_slice(&text);
        edid
    }

    #[test]
    fn test_edid_monitor_name() {
        assert_eq!(edid_monitor_name(&edid_with_name("DELL U2720Q")), Some("DELL U2720Q".to_string()));
        assert_eq!(edid_monitor_name(&[0u8; 10]), None);
        assert_eq!(edid_monitor_name(&vec![0u8; EDID_BLOCK_SIZE]), None);
    }

    #[test]
    fn test_edid_matches_base_block_only() {
        let a = edid_with_name("LG HDR 4K");
        let mut b = a.clone();
        b.extend_from_slice(&[1, 2, 3]);
        assert!(edid_matches(&a, &b));
        assert!(!edid_matches(&a, &edid_with_name("LG HDR 5K")));
        assert!(!edid_matches(&[], &a));
    }

    #[test]
    fn test_internal_connectors() {
        let connector = |name: &str| Connector {
            card: "card0".into(),
            name: name.into(),
            connector_id: None,
            edid: Vec::new(),
        };
        assert!(connector("eDP-1").is_internal());
        assert!(connector("LVDS-1").is_internal());
        assert!(!connector("DP-2").is_internal());
        assert!(!connector("HDMI-A-1").is_internal());
        assert_eq!(connector("HDMI-A-1").description(), "Unknown display (HDMI-A-1)");
    }

    #[test]
    fn test_connected_connectors_from_sysfs() {
        let root = std::env::temp_dir().join(format!("flashbang-dimmer-{}-drm", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        for (dir, status) in [("card0-DP-1", "connected"), ("card0-HDMI-A-1", "disconnected"), ("card0-eDP-1", "connected")] {
            fs::create_dir_all(root.join(dir)).unwrap();
            fs::write(root.join(dir).join("status"), format!("{status}\n")).unwrap();
        }
        fs::write(root.join("card0-DP-1").join("connector_id"), "95\n").unwrap();
        fs::write(root.join("card0-DP-1").join("edid"), edid_with_name("DELL U2720Q")).unwrap();
        fs::create_dir_all(root.join("card0")).unwrap();

        let connectors = connected_connectors_in(&root);
        assert_eq!(connectors.len(), 2);
        assert_eq!(connectors[0].name, "DP-1");
        assert_eq!(connectors[0].connector_id, Some(95));
        assert_eq!(connectors[0].description(), "DELL U2720Q (DP-1)");
        assert_eq!(connectors[1].name, "eDP-1");
        assert!(connectors[1].is_internal());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_ioctl_numbers() {
        // Values from the kernel UAPI headers on 64-bit targets
        assert_eq!(DRM_IOCTL_MODE_GETGAMMA, 0xC02064A4);
        assert_eq!(DRM_IOCTL_MODE_SETGAMMA, 0xC02064A5);
        assert_eq!(DRM_IOCTL_MODE_GETCRTC, 0xC06864A1);
        assert_eq!(DRM_IOCTL_MODE_GETENCODER, 0xC01464A6);
        assert_eq!(DRM_IOCTL_MODE_GETCONNECTOR, 0xC05064A7);
    }
}
