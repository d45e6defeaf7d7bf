//! Command-line entry point.
//!
//! ## Command line flags
//!
//! - `--config PATH`: load `AppConfig` from a specific YAML file instead of the
//!   platform default.
//! - `--controller-dir PATH`: override where controller descriptors are loaded from.
//! - `--log-level LEVEL`: override `AppConfig::log_level` (`trace`/`debug`/`info`/
//!   `warn`/`error`).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pitchgrid_mapper::config::AppConfig;
use pitchgrid_mapper::coordinator::Coordinator;
use pitchgrid_mapper::midi::connection;

struct CliArgs {
    config: Option<PathBuf>,
    controller_dir: Option<PathBuf>,
    log_level: Option<String>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs { config: None, controller_dir: None, log_level: None };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                cli.config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--controller-dir" if i + 1 < args.len() => {
                cli.controller_dir = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--log-level" if i + 1 < args.len() => {
                cli.log_level = Some(args[i + 1].clone());
                i += 2;
            }
            other => {
                eprintln!("ignoring unrecognized argument `{other}`");
                i += 1;
            }
        }
    }
    cli
}

fn main() -> anyhow::Result<()> {
    let cli = parse_args();

    let config_path = cli.config.clone().or_else(pitchgrid_mapper::config::default_config_path);
    let mut config = AppConfig::load(config_path.as_deref());
    if let Some(dir) = cli.controller_dir {
        config.controller_config_dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .format_timestamp_millis()
        .init();

    log::info!("pitchgrid-mapper starting up");
    log::info!("loading controller descriptors from {}", config.controller_config_dir.display());
    let discovery_interval = Duration::from_secs_f64(config.discovery_interval_seconds.max(0.1));

    let mut coordinator = Coordinator::new(config);
    if coordinator.descriptors().is_empty() {
        log::warn!("no controller descriptors loaded; waiting for one to appear in the config directory");
    } else {
        try_connect_known_controller(&mut coordinator);
    }

    let running = Arc::new(AtomicBool::new(true));
    let ctrlc_running = running.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        ctrlc_running.store(false, Ordering::Relaxed);
    })?;

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(discovery_interval);
        try_connect_known_controller(&mut coordinator);
    }

    log::info!("pitchgrid-mapper shutting down");
    Ok(())
}

/// Discovery pass: detect a disappeared controller port first (§5 "Discovery thread"),
/// then, if nothing is connected, look for an available input port matching one of the
/// loaded descriptors and switch to it. Cheap enough to run on every tick since
/// descriptor and port counts are both small.
fn try_connect_known_controller(coordinator: &mut Coordinator) {
    let Ok(available_ports) = connection::list_input_ports() else {
        return;
    };

    coordinator.check_port_liveness(&available_ports);
    if coordinator.is_controller_connected() {
        return;
    }

    for descriptor in coordinator.descriptors().to_vec() {
        let matched = available_ports
            .iter()
            .any(|port| pitchgrid_mapper::midi::ports::port_matches(port, None, &descriptor.midi_device_name));
        if matched {
            log::info!("found controller `{}`", descriptor.device_name);
            if let Err(e) = coordinator.switch_controller(&descriptor.device_name) {
                log::error!("failed to switch to controller `{}`: {e}", descriptor.device_name);
            }
            return;
        }
    }
}
