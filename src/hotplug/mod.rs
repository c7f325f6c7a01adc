// SPDX-License-Identifier: GPL-3.0-only
//! Re-enumeration of devices when displays are plugged or unplugged
//!
//! A udev thread reports DRM changes over a channel. Bursts are collapsed
//! and re-enumerations are rate limited, then the controller probes its
//! devices again.

mod udev_monitor;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::controller::FlashController;
use crate::strategy::BrightnessStrategy;

use udev_monitor::UdevMonitor;

/// Pending notifications; more are dropped since one re-enumeration covers them
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct Debounce {
    /// Minimum time between two re-enumerations
    pub min_interval: Duration,
    /// Delay for DDC/CI to come up after the last event of a burst
    pub settle: Duration,
}

impl Default for Debounce {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1500),
            settle: Duration::from_millis(1000),
        }
    }
}

pub struct HotplugWatcher {
    handle: JoinHandle<()>,
}

impl HotplugWatcher {
    /// Watch for display changes and refresh the devices of `controller`
    pub fn spawn<S>(controller: FlashController<S>) -> Self
    where
        S: BrightnessStrategy + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        std::thread::spawn(move || {
            let monitor = match UdevMonitor::new() {
                Ok(monitor) => monitor,
                Err(e) => {
                    error!("Failed to initialize display hotplug monitoring: {}", e);
                    return;
                }
            };
            if let Err(e) = monitor.run(tx) {
                error!("Display hotplug monitoring stopped: {}", e);
            }
        });

        let handle = tokio::spawn(run_debounced(rx, Debounce::default(), move || {
            let controller = controller.clone();
            async move {
                if let Err(e) = tokio::task::spawn_blocking(move || controller.refresh_devices()).await {
                    error!("Re-enumeration failed: {e}");
                }
            }
        }));

        Self { handle }
    }

    /// Stop reacting to hotplug events. A re-enumeration in progress runs
    /// to completion on its blocking thread.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// Call `on_settled` once per burst of notifications
async fn run_debounced<F, Fut>(mut rx: mpsc::Receiver<()>, timing: Debounce, mut on_settled: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut last_run: Option<Instant> = None;

    while rx.recv().await.is_some() {
        if let Some(last_run) = last_run {
            let elapsed = last_run.elapsed();
            if elapsed < timing.min_interval {
                tokio::time::sleep(timing.min_interval - elapsed).await;
            }
        }
        tokio::time::sleep(timing.settle).await;

        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!("Collapsed {} additional hotplug events", drained);
        }

        info!("Displays changed, re-enumerating");
        on_settled().await;
        last_run = Some(Instant::now());
    }

    debug!("Hotplug channel closed");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast() -> Debounce {
        Debounce {
            min_interval: Duration::from_millis(60),
            settle: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_burst_triggers_one_refresh() {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        for _ in 0..5 {
            tx.send(()).await.unwrap();
        }
        drop(tx);

        run_debounced(rx, fast(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_separate_bursts_are_rate_limited() {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let times = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = times.clone();

        let task = tokio::spawn(run_debounced(rx, fast(), move || {
            recorded.lock().unwrap().push(Instant::now());
            async {}
        }));

        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(()).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let times = times.lock().unwrap();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= fast().min_interval);
    }
}
