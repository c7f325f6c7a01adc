// SPDX-License-Identifier: GPL-3.0-only
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use crate::config::Config;
use crate::controller::FlashController;
use crate::error::{AppError, Result};
use crate::monitor::BaselinePolicy;
use crate::strategy::{
    ActiveStrategy, BrightnessStrategy, ExternalDisplayStrategy, ExternalDisplays, IntegratedPanel,
    PanelStrategy, choose_strategy,
};
use crate::watchdog::Watchdog;

#[macro_use]
extern crate tracing;

mod brightness;
mod config;
mod controller;
mod error;
mod events;
#[cfg(feature = "hotplug")]
mod hotplug;
mod monitor;
mod permissions;
mod protocols;
mod strategy;
mod watchdog;

const USAGE: &str = "\
Usage: flashbang-dimmer [OPTIONS]

Dims the display while the game reports a flash. Game events are read from
stdin as JSON lines.

Options:
  --config <PATH>          Use this configuration file
  --diagnose               Report which displays can be controlled and exit
  --test-responsiveness    Dim and restore once after startup and log the time it took
  -h, --help               Print this help";

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    diagnose: bool,
    test_responsiveness: bool,
    help: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> std::result::Result<Args, String> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().ok_or("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--diagnose" => parsed.diagnose = true,
            "--test-responsiveness" => parsed.test_responsiveness = true,
            "-h" | "--help" => parsed.help = true,
            other => return Err(format!("unknown argument `{other}`")),
        }
    }

    Ok(parsed)
}

fn setup_logs(default_filter: &str) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Ok(journal_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(journal_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }
}

/// Grace period for blocking tasks when the runtime shuts down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    if args.help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let path = args.config.clone().or_else(config::default_path);
    let loaded = match &path {
        Some(path) => Config::load_or_create(path).map(Some),
        None => Ok(None),
    };

    let log_level = match &loaded {
        Ok(Some(loaded)) => loaded.config.log_level.clone(),
        _ => Config::default().log_level,
    };
    setup_logs(&log_level);

    let result = loaded.and_then(|loaded| {
        let config = match (loaded, &path) {
            (Some(loaded), Some(path)) => {
                loaded.log(path);
                loaded.config
            }
            _ => Config::default(),
        };

        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        let result = runtime.block_on(run(args, config, path));
        // The stdin reader blocks in a read that cannot be cancelled
        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        result
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args, config: Config, path: Option<PathBuf>) -> Result<()> {
    config.print_information(path.as_deref());
    let settings = config.validate()?;

    let policy = BaselinePolicy::from_setting(settings.full_brightness_on_start);
    let mut external = ExternalDisplayStrategy::new(ExternalDisplays, policy);
    let mut panel = PanelStrategy::new(IntegratedPanel, policy);

    if args.diagnose {
        return tokio::task::spawn_blocking(move || {
            external.diagnose();
            panel.diagnose();
        })
        .await
        .map_err(AppError::from);
    }

    let test_responsiveness = args.test_responsiveness;
    let strategy = tokio::task::spawn_blocking(move || {
        let mut strategy = choose_strategy(external, panel, settings.prefer_panel)?;
        info!("Brightness control: {}", strategy.name());
        strategy.print_configuration();
        if test_responsiveness {
            strategy.test_responsiveness();
        }
        Ok::<ActiveStrategy, AppError>(strategy)
    })
    .await??;

    let controller = FlashController::new(strategy, &settings);
    let watchdog = Watchdog::spawn(controller.clone(), settings.watchdog_interval);
    #[cfg(feature = "hotplug")]
    let hotplug = hotplug::HotplugWatcher::spawn(controller.clone());

    info!("Reading game events from stdin");
    let outcome = tokio::select! {
        result = events::run_stdin(controller.clone()) => result,
        signal = shutdown_signal() => signal.map_err(AppError::from),
    };

    // No tick or re-enumeration may run once devices are released
    #[cfg(feature = "hotplug")]
    hotplug.stop().await;
    watchdog.stop().await?;
    tokio::task::spawn_blocking(move || controller.shutdown()).await?;

    outcome
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    info!("Shutdown requested");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> std::result::Result<Args, String> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(args(&[]).unwrap(), Args::default());
        let parsed = args(&["--config", "/tmp/dimmer.kdl", "--test-responsiveness"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/dimmer.kdl")));
        assert!(parsed.test_responsiveness);
        assert!(!parsed.diagnose);
        assert!(args(&["--diagnose"]).unwrap().diagnose);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(args(&["--config"]).is_err());
        assert!(args(&["--verbose"]).is_err());
    }
}
