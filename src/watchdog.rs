// SPDX-License-Identifier: GPL-3.0-only
//! Periodic check that restores brightness when the event source goes quiet

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::controller::FlashController;
use crate::error::Result;
use crate::strategy::BrightnessStrategy;

pub struct Watchdog {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub fn spawn<S>(controller: FlashController<S>, interval: Duration) -> Self
    where
        S: BrightnessStrategy + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let controller = controller.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || controller.watchdog_tick()).await {
                            error!("Watchdog tick failed: {e}");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("Watchdog stopped");
        });

        Self { stop, handle }
    }

    /// Stop ticking. Returns once no tick can run anymore.
    pub async fn stop(self) -> Result<()> {
        // The task may already be gone if it panicked; the join reports that
        let _ = self.stop.send(true);
        self.handle.await?;
        Ok(())
    }
}
