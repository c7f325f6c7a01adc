// SPDX-License-Identifier: GPL-3.0-only
//! Selection of the single active strategy

use std::time::Duration;

use crate::error::{AppError, Result};

use super::{BrightnessStrategy, ExternalDisplayStrategy, PanelStrategy};

/// The strategy that won selection. Fixed for the process lifetime.
#[derive(Debug)]
pub enum Chosen<E, P> {
    External(E),
    Panel(P),
}

pub type ActiveStrategy = Chosen<ExternalDisplayStrategy, PanelStrategy>;

macro_rules! delegate {
    ($self:ident, $strategy:ident => $call:expr) => {
        match $self {
            Chosen::External($strategy) => $call,
            Chosen::Panel($strategy) => $call,
        }
    };
}

impl<E: BrightnessStrategy, P: BrightnessStrategy> BrightnessStrategy for Chosen<E, P> {
    fn name(&self) -> &str {
        delegate!(self, s => s.name())
    }

    fn initialize(&mut self) -> bool {
        delegate!(self, s => s.initialize())
    }

    fn set_brightness(&mut self, fraction: f32) -> bool {
        delegate!(self, s => s.set_brightness(fraction))
    }

    fn diagnose(&mut self) {
        delegate!(self, s => s.diagnose())
    }

    fn print_configuration(&self) {
        delegate!(self, s => s.print_configuration())
    }

    fn test_responsiveness(&mut self) -> Duration {
        delegate!(self, s => s.test_responsiveness())
    }

    fn refresh(&mut self) -> bool {
        delegate!(self, s => s.refresh())
    }

    fn dispose(&mut self) {
        delegate!(self, s => s.dispose())
    }

    fn works(&self) -> bool {
        delegate!(self, s => s.works())
    }
}

fn try_strategy(strategy: &mut impl BrightnessStrategy) -> bool {
    info!("Trying {}", strategy.name());
    let usable = strategy.initialize();
    if !usable {
        info!("{} unusable", strategy.name());
        strategy.dispose();
    }
    usable
}

/// Adopt the first strategy that reports a usable device
///
/// External displays are tried first unless `prefer_panel` is set. The
/// losing strategy is never initialized when the first one works. When
/// neither works, both are diagnosed and [`AppError::NoUsableStrategy`] is
/// returned.
pub fn choose_strategy<E, P>(mut external: E, mut panel: P, prefer_panel: bool) -> Result<Chosen<E, P>>
where
    E: BrightnessStrategy,
    P: BrightnessStrategy,
{
    if prefer_panel {
        if try_strategy(&mut panel) {
            return Ok(Chosen::Panel(panel));
        }
        if try_strategy(&mut external) {
            return Ok(Chosen::External(external));
        }
    } else {
        if try_strategy(&mut external) {
            return Ok(Chosen::External(external));
        }
        if try_strategy(&mut panel) {
            return Ok(Chosen::Panel(panel));
        }
    }

    error!("No brightness control method works on this machine");
    external.diagnose();
    panel.diagnose();
    Err(AppError::NoUsableStrategy)
}
