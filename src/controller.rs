// SPDX-License-Identifier: GPL-3.0-only
//! Flash driven brightness state machine
//!
//! Event callbacks and the watchdog both go through [`FlashController`]. The
//! state and the strategy share one mutex, so the mapping and the hardware
//! commit for a sample happen before the next sample is looked at.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::brightness::{BrightnessCalculator, FULL_BRIGHTNESS, clamp_flash_amount, needs_commit};
use crate::config::Settings;
use crate::strategy::BrightnessStrategy;

/// Working set of the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessState {
    pub current_flash_amount: u8,
    /// Last brightness the strategy accepted
    pub current_brightness: f32,
    pub last_event: Instant,
}

impl BrightnessState {
    fn new(now: Instant) -> Self {
        Self {
            current_flash_amount: 0,
            current_brightness: FULL_BRIGHTNESS,
            last_event: now,
        }
    }
}

struct Inner<S> {
    state: BrightnessState,
    /// Player whose samples are authoritative
    provider: Option<String>,
    calculator: BrightnessCalculator,
    watchdog_timeout: Duration,
    strategy: S,
    disposed: bool,
}

impl<S: BrightnessStrategy> Inner<S> {
    fn set_flash_amount(&mut self, amount: u8) {
        self.state.current_flash_amount = amount;
        self.update_brightness();
    }

    fn update_brightness(&mut self) {
        let wanted = self.calculator.wanted_brightness(self.state.current_flash_amount);
        if !needs_commit(self.state.current_brightness, wanted) {
            return;
        }

        debug!(
            "Flash amount {} -> brightness {:.3}",
            self.state.current_flash_amount, wanted
        );
        if self.strategy.set_brightness(wanted) {
            self.state.current_brightness = wanted;
        } else {
            warn!("Could not change brightness to {:.3}, will retry on the next event", wanted);
        }
    }

    fn reset(&mut self, reason: &str) {
        if self.state.current_flash_amount != 0 {
            info!("{}, restoring brightness", reason);
        }
        self.set_flash_amount(0);
    }
}

/// Shared handle on the state machine and the active strategy
pub struct FlashController<S> {
    inner: Arc<Mutex<Inner<S>>>,
}

impl<S> Clone for FlashController<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: BrightnessStrategy> FlashController<S> {
    /// Take ownership of an initialized strategy, whose devices sit at full
    /// brightness
    pub fn new(strategy: S, settings: &Settings) -> Self {
        let inner = Inner {
            state: BrightnessState::new(Instant::now()),
            provider: None,
            calculator: BrightnessCalculator::from_settings(settings),
            watchdog_timeout: settings.watchdog_timeout,
            strategy,
            disposed: false,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// A poisoned lock still holds consistent state: every mutation is a
    /// plain field store
    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for an event, `None` once shut down
    fn lock_live(&self) -> Option<MutexGuard<'_, Inner<S>>> {
        let inner = self.lock();
        if inner.disposed {
            debug!("Ignoring event after shutdown");
            return None;
        }
        Some(inner)
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> BrightnessState {
        self.lock().state
    }

    #[cfg(test)]
    pub fn provider(&self) -> Option<String> {
        self.lock().provider.clone()
    }

    /// Liveness heartbeat, sent for every message of the event source
    pub fn on_any_message(&self) {
        self.on_any_message_at(Instant::now());
    }

    pub fn on_any_message_at(&self, now: Instant) {
        if let Some(mut inner) = self.lock_live() {
            inner.state.last_event = now;
        }
    }

    /// New flash amount for `player_id`. Out of range values are clamped,
    /// samples of other players are ignored.
    pub fn on_flash_amount_sample(&self, player_id: &str, raw_amount: i64) {
        let Some(mut inner) = self.lock_live() else {
            return;
        };

        match inner.provider.as_deref() {
            Some(provider) if provider == player_id => {}
            Some(_) => {
                debug!("Ignoring flash sample from {}", player_id);
                return;
            }
            None => {
                debug!("Ignoring flash sample from {}, no provider yet", player_id);
                return;
            }
        }

        let amount = clamp_flash_amount(raw_amount);
        if i64::from(amount) != raw_amount {
            debug!("Clamped flash amount {} to {}", raw_amount, amount);
        }
        inner.set_flash_amount(amount);
    }

    /// The spectated or playing player changed
    pub fn on_provider_changed(&self, player_id: &str) {
        let Some(mut inner) = self.lock_live() else {
            return;
        };

        if inner.provider.as_deref() != Some(player_id) {
            info!("Following flashes of player {}", player_id);
            inner.provider = Some(player_id.to_string());
        }
        inner.reset("Provider changed");
    }

    /// New round or game over
    pub fn on_round_reset(&self) {
        if let Some(mut inner) = self.lock_live() {
            inner.reset("Round reset");
        }
    }

    pub fn on_player_died(&self, player_id: &str) {
        self.reset_for_player(player_id, "Player died");
    }

    pub fn on_player_disconnected(&self, player_id: &str) {
        self.reset_for_player(player_id, "Player disconnected");
    }

    fn reset_for_player(&self, player_id: &str, reason: &str) {
        let Some(mut inner) = self.lock_live() else {
            return;
        };
        if inner.provider.as_deref() == Some(player_id) {
            inner.reset(reason);
        }
    }

    pub fn watchdog_tick(&self) -> bool {
        self.watchdog_tick_at(Instant::now())
    }

    /// Clear a flash nobody has talked about for longer than the watchdog
    /// timeout. A restore that failed earlier is retried on every tick of
    /// the silence. Returns whether it fired.
    pub fn watchdog_tick_at(&self, now: Instant) -> bool {
        let Some(mut inner) = self.lock_live() else {
            return false;
        };

        let silence = now.saturating_duration_since(inner.state.last_event);
        if silence <= inner.watchdog_timeout {
            return false;
        }

        if inner.state.current_flash_amount != 0 {
            warn!("No game events for {} ms", silence.as_millis());
            inner.reset("Event source went silent");
            return true;
        }

        let wanted = inner.calculator.wanted_brightness(0);
        if needs_commit(inner.state.current_brightness, wanted) {
            info!("Retrying brightness restore");
            inner.update_brightness();
            return true;
        }

        false
    }

    /// Probe devices again after a display was added or removed
    ///
    /// Devices go back to full brightness first so the new baseline is not
    /// taken from a dimmed screen; the wanted brightness is applied again
    /// afterwards.
    pub fn refresh_devices(&self) {
        let Some(mut inner) = self.lock_live() else {
            return;
        };

        if inner.state.current_brightness < FULL_BRIGHTNESS && !inner.strategy.set_brightness(FULL_BRIGHTNESS) {
            warn!("Could not restore brightness before re-enumeration");
        }

        if !inner.strategy.refresh() {
            warn!("No usable devices after re-enumeration, waiting for the next hotplug event");
        }
        inner.strategy.print_configuration();

        inner.state.current_brightness = FULL_BRIGHTNESS;
        inner.update_brightness();
    }

    /// Restore full brightness and release every device. Later events are
    /// ignored.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.disposed {
            return;
        }

        if inner.strategy.set_brightness(FULL_BRIGHTNESS) {
            inner.state.current_brightness = FULL_BRIGHTNESS;
            info!("Brightness restored");
        } else {
            error!("Could not restore full brightness on exit");
        }

        inner.strategy.dispose();
        inner.disposed = true;
    }
}
