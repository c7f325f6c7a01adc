// SPDX-License-Identifier: GPL-3.0-only
use std::os::fd::AsRawFd;

use tokio::sync::mpsc;

/// How long a poll waits before checking whether anyone still listens
const POLL_TIMEOUT_MS: i32 = 1000;

/// Watches udev for DRM connector changes
///
/// Runs on a dedicated thread because `udev::MonitorSocket` is not Send.
pub struct UdevMonitor {
    socket: udev::MonitorSocket,
}

impl UdevMonitor {
    /// Only `drm_minor` devices are watched; connector status changes are
    /// reported as a change event on the card
    pub fn new() -> Result<Self, std::io::Error> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem_devtype("drm", "drm_minor")?
            .listen()?;

        Ok(Self { socket })
    }

    /// Forward a notification for every display event until `notify` is
    /// closed or polling fails
    pub fn run(self, notify: mpsc::Sender<()>) -> std::io::Result<()> {
        info!("Display hotplug monitoring started");
        let fd = self.socket.as_raw_fd();

        while !notify.is_closed() {
            let mut poll_fd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };

            // SAFETY: `poll_fd` is a valid pollfd for the duration of the call
            let poll_result = unsafe { libc::poll(&mut poll_fd, 1, POLL_TIMEOUT_MS) };
            if poll_result < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if poll_result == 0 {
                continue;
            }

            for event in self.socket.iter() {
                match event.event_type() {
                    udev::EventType::Add | udev::EventType::Remove | udev::EventType::Change => {
                        debug!("Display event: {:?} at {:?}", event.event_type(), event.syspath());
                        match notify.try_send(()) {
                            Ok(()) => {}
                            // A re-enumeration is already pending
                            Err(mpsc::error::TrySendError::Full(())) => {}
                            Err(mpsc::error::TrySendError::Closed(())) => return Ok(()),
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}
