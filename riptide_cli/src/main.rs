mod tracker;

use riptide_core::config::MutatorConfig;
use riptide_core::signal::write_signal;
use tracker::PlateauTracker;

use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Fuzzer stats file, or the output directory containing one.
    #[clap(long)]
    stats: Option<PathBuf>,
    /// Path the plateau signal is written to.
    #[clap(long)]
    signal: Option<PathBuf>,
    #[clap(long)]
    check_interval_secs: Option<u64>,
    #[clap(long)]
    window_secs: Option<u64>,
    #[clap(long)]
    min_paths_delta: Option<u64>,
    /// Run a single check and exit instead of watching continuously.
    #[clap(long)]
    once: bool,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match cli.config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            MutatorConfig::load_from_file(&config_path)?
        }
        None => {
            // No config file specified via CLI, load default
            let default_config_path = PathBuf::from("riptide.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}",
                );
                MutatorConfig::load_from_file(&default_config_path)?
            } else {
                println!(
                    "No config file specified and default 'riptide.toml' not found, using built-in defaults."
                );
                MutatorConfig::default()
            }
        }
    };

    if let Some(stats) = cli.stats {
        config.sidecar.stats_file = Some(stats);
    }
    if let Some(signal) = cli.signal {
        config.sidecar.signal_file = Some(signal);
    }
    if let Some(secs) = cli.check_interval_secs {
        config.sidecar.check_interval_secs = secs;
    }
    if let Some(secs) = cli.window_secs {
        config.sidecar.window_secs = secs;
    }
    if let Some(delta) = cli.min_paths_delta {
        config.sidecar.min_paths_delta = delta;
    }

    let stats_path = config.sidecar.stats_file.clone().ok_or_else(|| {
        anyhow::anyhow!("No stats file configured; pass --stats or set sidecar.stats-file")
    })?;
    let stats_path = tracker::resolve_stats_path(stats_path);
    let signal_path = config.sidecar.signal_file.clone().ok_or_else(|| {
        anyhow::anyhow!("No signal file configured; pass --signal or set sidecar.signal-file")
    })?;
    let check_interval = Duration::from_secs(config.sidecar.check_interval_secs.max(1));
    let window = Duration::from_secs(config.sidecar.window_secs);
    let min_delta = config.sidecar.min_paths_delta;

    println!(
        "Watching {stats_path:?} every {check_interval:?} (window {window:?}, minimum delta {min_delta}), signalling to {signal_path:?}"
    );

    let mut tracker = PlateauTracker::new(window, min_delta);
    let mut last_signal: Option<bool> = None;

    loop {
        let plateau = match std::fs::read_to_string(&stats_path) {
            Ok(contents) => match tracker::parse_paths_total(&contents) {
                Some(paths) => tracker.observe(Instant::now(), paths),
                None => {
                    log::warn!("Stats file {stats_path:?} has no usable path counter");
                    false
                }
            },
            Err(err) => {
                log::warn!("Stats file {stats_path:?} unreadable: {err}");
                false
            }
        };

        write_signal(&signal_path, plateau)?;
        if last_signal != Some(plateau) {
            println!(
                "Plateau signal now {plateau} ({} paths at last check)",
                tracker.latest().unwrap_or(0)
            );
            last_signal = Some(plateau);
        } else {
            log::debug!("Plateau signal unchanged at {plateau}");
        }

        if cli.once {
            break;
        }
        thread::sleep(check_interval);
    }

    Ok(())
}
