//! Recording scheduler daemon: watches configured shows and runs them
//! through capture sources into storage.

mod config;
mod drivers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use permanence_core::model::Configuration;
use permanence_core::Recorder;
use tracing::{error, info, warn};

use config::ConfigManager;

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Command-line arguments for the daemon.
#[derive(Parser, Debug)]
#[command(name = "permanence")]
#[command(about = "Recording scheduler daemon for periodic broadcast capture", long_about = None)]
struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config: PathBuf,

    /// Override the scheduling leeway, in seconds, from the config file.
    #[arg(long = "leeway", value_name = "SECS")]
    leeway: Option<i64>,

    /// Override the hook worker pool size from the config file.
    #[arg(long = "hook-pool-size", value_name = "N")]
    hook_pool_size: Option<usize>,

    /// Override the tick interval, in seconds, from the config file.
    #[arg(long = "check-interval", value_name = "SECS")]
    check_interval: Option<f64>,
}

fn apply_overrides(mut config: Configuration, cli: &CliArgs) -> Configuration {
    if let Some(leeway) = cli.leeway {
        info!(leeway, "overriding leeway_seconds from command line");
        config.options.leeway_seconds = leeway;
    }
    if let Some(hook_pool_size) = cli.hook_pool_size {
        info!(hook_pool_size, "overriding hook_pool_size from command line");
        config.options.hook_pool_size = hook_pool_size;
    }
    if let Some(check_interval) = cli.check_interval {
        info!(check_interval, "overriding check_interval from command line");
        config.options.check_interval = Duration::from_secs_f64(check_interval);
    }
    config
}

fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "permanence.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("permanence=info,permanence_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!(config = %cli_args.config.display(), "permanence starting up");

    let recorder = Recorder::new(2).context("failed to initialize recorder")?;

    let mut config_manager = ConfigManager::new(cli_args.config.clone(), recorder.process_monitor.clone());
    let initial = config_manager
        .load()
        .context("failed to load initial configuration")?;
    let initial = apply_overrides(initial, &cli_args);
    recorder
        .apply_configuration(initial)
        .context("failed to apply initial configuration")?;

    let tick_recorder = recorder.clone();
    let tick_thread = std::thread::Builder::new()
        .name("tick".to_string())
        .spawn(move || tick_recorder.run())
        .context("failed to spawn tick thread")?;

    let poll_recorder = recorder.clone();
    std::thread::Builder::new()
        .name("config-poll".to_string())
        .spawn(move || config_poll_loop(config_manager, poll_recorder, cli_args))
        .context("failed to spawn config poll thread")?;

    let stop_recorder = recorder.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        stop_recorder.stop();
        std::process::exit(0);
    })
    .context("failed to install signal handler")?;

    if let Err(error) = tick_thread.join() {
        error!(?error, "tick thread panicked");
    }

    Ok(())
}

fn config_poll_loop(mut config_manager: ConfigManager, recorder: Arc<Recorder>, cli_args: CliArgs) {
    while recorder.is_active() {
        std::thread::sleep(CONFIG_POLL_INTERVAL);
        match config_manager.reload_if_changed() {
            Ok(Some(config)) => {
                let config = apply_overrides(config, &cli_args);
                if let Err(error) = recorder.apply_configuration(config) {
                    warn!(%error, "failed to apply reloaded configuration");
                }
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "failed to check configuration for changes"),
        }
    }
}
