// SPDX-License-Identifier: GPL-3.0-only
//! Game events read from stdin
//!
//! A game-state bridge writes one JSON object per line, tagged by `event`:
//!
//! ```text
//! {"event":"provider","player":"76561197960287930"}
//! {"event":"flash","player":"76561197960287930","amount":212}
//! {"event":"round-reset"}
//! ```
//!
//! Every line counts as a heartbeat, even when it cannot be parsed.

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::controller::FlashController;
use crate::error::{AppError, Result};
use crate::strategy::BrightnessStrategy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GameEvent {
    /// Flash amount of a player; the game may send values outside 0-255
    Flash { player: String, amount: i64 },
    /// The player whose view is on screen changed
    Provider { player: String },
    RoundReset,
    GameOver,
    PlayerDied { player: String },
    PlayerDisconnected { player: String },
    Heartbeat,
}

impl GameEvent {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Apply one line of input to the controller
pub fn dispatch<S: BrightnessStrategy>(controller: &FlashController<S>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    controller.on_any_message();

    let event = match GameEvent::parse(line) {
        Ok(event) => event,
        Err(e) => {
            debug!("Unrecognized event {:?}: {}", line, e);
            return;
        }
    };

    match event {
        GameEvent::Flash { player, amount } => controller.on_flash_amount_sample(&player, amount),
        GameEvent::Provider { player } => controller.on_provider_changed(&player),
        GameEvent::RoundReset | GameEvent::GameOver => controller.on_round_reset(),
        GameEvent::PlayerDied { player } => controller.on_player_died(&player),
        GameEvent::PlayerDisconnected { player } => controller.on_player_disconnected(&player),
        GameEvent::Heartbeat => {}
    }
}

/// Read events from stdin until it is closed
///
/// Each event is applied on the blocking pool and awaited before the next
/// line is read, so brightness commands follow the order of the input.
pub async fn run_stdin<S>(controller: FlashController<S>) -> Result<()>
where
    S: BrightnessStrategy + 'static,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Event source closed");
                return Ok(());
            }
            Err(e) => return Err(AppError::EventSource(e.to_string())),
        };

        let controller = controller.clone();
        tokio::task::spawn_blocking(move || dispatch(&controller, &line)).await?;
    }
}
