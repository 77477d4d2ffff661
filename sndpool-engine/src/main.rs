//! sndpool - play WAV assets through the engine on a simulated coprocessor
//!
//! Loads every file given on the command line, starts them together and
//! prints a JSON status line at a fixed cadence until everything has
//! finished or the process is interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

use sndpool_engine::audio::AssetSource;
use sndpool_engine::hardware::SimulatedHardware;
use sndpool_engine::playback::EngineStats;
use sndpool_engine::{AudioEngine, Handle, PlaybackInfo, TomlConfig};

/// Simulated time advances in steps of this size
const SIM_STEP: Duration = Duration::from_millis(10);

/// Command-line arguments for sndpool
#[derive(Parser, Debug)]
#[command(name = "sndpool")]
#[command(about = "Play WAV assets through the sndpool engine on a simulated sound coprocessor")]
#[command(version)]
struct Args {
    /// Configuration file (overrides SNDPOOL_CONFIG and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Poller interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Playback volume (0-255)
    #[arg(long, default_value_t = 255)]
    volume: u8,

    /// Pan position (0 = left, 128 = centre, 255 = right)
    #[arg(long, default_value_t = 128)]
    pan: u8,

    /// Loop every asset
    #[arg(long = "loop")]
    looping: bool,

    /// Loop start in samples
    #[arg(long, default_value_t = 0)]
    loop_offset: u32,

    /// Start streamed assets from this sample
    #[arg(long, default_value_t = 0)]
    seek: u32,

    /// Status report interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    status_ms: u64,

    /// WAV files to play
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Serialize)]
struct AssetStatus<'a> {
    file: &'a str,
    handle: Handle,
    info: Option<PlaybackInfo>,
}

#[derive(Serialize)]
struct StatusReport<'a> {
    stats: EngineStats,
    assets: Vec<AssetStatus<'a>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(ms) = args.poll_interval_ms {
        config.engine.poll_interval_ms = ms;
    }
    sndpool_common::init_tracing(&config.logging);

    info!("Starting sndpool v{}", env!("CARGO_PKG_VERSION"));

    let hw = SimulatedHardware::new(config.engine.hardware_channels, config.simulator.pool_bytes);
    let engine = Arc::new(
        AudioEngine::new(config.engine.clone(), hw.clone())
            .context("Failed to initialize audio engine")?,
    );

    let mut loaded: Vec<(String, Handle)> = Vec::new();
    for path in &args.files {
        let name = path.to_string_lossy().to_string();
        let handle = match engine.load(&name, AssetSource::File(path.clone()), args.seek) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                continue;
            }
        };
        engine
            .play(handle, args.volume, args.pan, args.pan, args.looping, args.loop_offset)
            .with_context(|| format!("Failed to start {}", name))?;
        info!("Playing {} as {}", name, handle);
        loaded.push((name, handle));
    }
    if loaded.is_empty() {
        bail!("No playable files");
    }

    engine.start_poller().context("Failed to start playback poller")?;

    let mut sim_tick = tokio::time::interval(SIM_STEP);
    let mut status_tick = tokio::time::interval(Duration::from_millis(args.status_ms.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = sim_tick.tick() => {
                let now = Instant::now();
                hw.advance_for(now - last);
                last = now;
            }
            _ = status_tick.tick() => {
                let report = StatusReport {
                    stats: engine.stats(),
                    assets: loaded
                        .iter()
                        .map(|(file, handle)| AssetStatus {
                            file: file.as_str(),
                            handle: *handle,
                            info: engine.query_info(*handle),
                        })
                        .collect(),
                };
                println!("{}", serde_json::to_string(&report).context("Failed to encode status")?);

                let finished = report
                    .assets
                    .iter()
                    .all(|a| !a.info.as_ref().is_some_and(|i| i.playing));
                if finished {
                    info!("All assets finished");
                    break;
                }
            }
        }
    }

    engine.shutdown();
    info!("sndpool shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
