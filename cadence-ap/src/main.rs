//! Cadence Audio Player (cadence-ap) - Main entry point
//!
//! Plays a list of local files or URLs through the adaptive pipeline and logs
//! what the pipeline reports until the list is exhausted or the process is
//! signalled.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_ap::audio::{Deck, OutputDevice};
use cadence_ap::backend::{DeviceBackend, SourceFetcher};
use cadence_ap::config::{ConfigOverrides, Settings};
use cadence_ap::pipeline::transcode::{
    FfmpegExecutor, FfprobeProber, LocalResourceScheme, TempFileRegistry,
};
use cadence_ap::pipeline::{
    Backends, Collaborators, DirectResolver, LoggingMetadataSink, Playlist, SiblingLrcSource,
};
use cadence_ap::PlayerHandle;
use cadence_common::config::TomlConfig;
use cadence_common::human_time::{format_progress, format_track_time};
use cadence_common::{BackendKind, PlaybackMode, PlayerEvent, Track};
use clap::Parser;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for cadence-ap
#[derive(Parser, Debug)]
#[command(name = "cadence-ap")]
#[command(about = "Adaptive audio player with transcode fallback")]
#[command(version)]
struct Args {
    /// Configuration file (overrides CADENCE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CADENCE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Initial volume (0.0-1.0)
    #[arg(long)]
    volume: Option<f32>,

    /// Playback mode: sequential, shuffle or repeat-one
    #[arg(short, long, default_value = "sequential")]
    mode: PlaybackMode,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Files or URLs to play
    tracks: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    let settings = Settings::from_toml(
        &toml,
        ConfigOverrides {
            log_level: args.log_level.clone(),
            device: args.device.clone(),
            volume: args.volume,
        },
    );

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cadence_ap={}", settings.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        for name in OutputDevice::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    if args.tracks.is_empty() {
        anyhow::bail!("Nothing to play: pass at least one file or URL");
    }

    info!("Starting Cadence Audio Player");
    info!("Temp directory: {}", settings.transcode.temp_dir.display());

    let registry = TempFileRegistry::new(
        settings.transcode.temp_dir.clone(),
        settings.transcode.file_prefix.clone(),
    );
    let scheme = LocalResourceScheme::new(registry.clone());

    let native_deck = Deck::shared();
    let transcoded_deck = Deck::shared();
    let device = OutputDevice::open(
        settings.output_device.as_deref(),
        vec![Arc::clone(&native_deck), Arc::clone(&transcoded_deck)],
    )
    .context("Failed to open audio output")?;

    let fetcher = Arc::new(SourceFetcher::new(scheme));
    let (backend_tx, backend_rx) = mpsc::unbounded_channel();
    let backends = Backends {
        native: Box::new(DeviceBackend::new(
            BackendKind::Native,
            native_deck,
            device.sample_rate(),
            Arc::clone(&fetcher),
            backend_tx.clone(),
        )
        .with_output(device.control())),
        transcoded: Box::new(DeviceBackend::new(
            BackendKind::Transcoded,
            transcoded_deck,
            device.sample_rate(),
            fetcher,
            backend_tx,
        )
        .with_output(device.control())),
        events: backend_rx,
    };

    let collaborators = Collaborators {
        resolver: Arc::new(DirectResolver),
        prober: Arc::new(FfprobeProber::new(settings.transcode.clone())),
        executor: Arc::new(FfmpegExecutor::new(settings.transcode.clone())),
        metadata: Arc::new(LoggingMetadataSink),
        lyrics: Arc::new(SiblingLrcSource),
        playlist: Box::new(Playlist::default()),
    };

    let player = PlayerHandle::spawn(settings.pipeline.clone(), registry, collaborators, backends);
    let mut events = player.subscribe();

    player.set_playlist(tracks_from_args(&args.tracks)).await?;
    player.set_mode(args.mode).await?;
    player.next().await?;
    player.play().await?;

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = log_events(&mut events) => {
            info!("Playlist finished");
        }
    }

    player.shutdown().await?;
    drop(device);
    info!("Shutdown complete");
    Ok(())
}

fn tracks_from_args(locations: &[String]) -> Vec<Track> {
    locations
        .iter()
        .enumerate()
        .map(|(index, location)| {
            let path = location.split(['?', '#']).next().unwrap_or(location);
            let filename = path.rsplit(['/', '\\']).next().unwrap_or(path);
            Track::new((index + 1).to_string(), filename, 0, location.clone())
        })
        .collect()
}

/// Log pipeline events; returns once playback stops
async fn log_events(events: &mut broadcast::Receiver<PlayerEvent>) {
    let mut duration = None;
    loop {
        match events.recv().await {
            Ok(PlayerEvent::TrackLoaded { track_id, filename }) => {
                duration = None;
                info!("Now playing [{}] {}", track_id, filename);
            }
            Ok(PlayerEvent::BackendChanged { backend, .. }) => {
                info!("Playing through {} backend", backend);
            }
            Ok(PlayerEvent::DurationKnown { duration_secs, .. }) => {
                duration = Some(duration_secs);
                info!("Duration {}", format_track_time(duration_secs));
            }
            Ok(PlayerEvent::PositionChanged { position_secs, .. }) => {
                info!("{}", format_progress(position_secs, duration));
            }
            Ok(PlayerEvent::TranscodeProgress { percent, .. }) => {
                info!("Transcoding {:.0}%", percent);
            }
            Ok(PlayerEvent::LyricLineChanged { text: Some(text), .. }) => {
                info!("♪ {}", text);
            }
            Ok(PlayerEvent::TrackFailed { track_id, reason }) => {
                warn!("Track {} failed: {}", track_id, reason);
            }
            Ok(PlayerEvent::Stopped) => return,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Event log lagged, {} events dropped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Graceful shutdown signal handler
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
            Ok(mut stream) => {
                stream.recv().await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_tracks_from_args() {
        let tracks = tracks_from_args(&[
            "/music/a/Song One.flac".to_string(),
            "https://cdn.example/x/track.ape?sig=abc".to_string(),
        ]);
        assert_eq!(tracks[0].id.as_str(), "1");
        assert_eq!(tracks[0].filename, "Song One.flac");
        assert_eq!(tracks[1].filename, "track.ape");
        assert_eq!(tracks[1].location, "https://cdn.example/x/track.ape?sig=abc");
    }

    #[test]
    fn test_args_parse_mode() {
        let args = Args::parse_from(["cadence-ap", "--mode", "shuffle", "a.mp3"]);
        assert_eq!(args.mode, PlaybackMode::Shuffle);
        assert_eq!(args.tracks, vec!["a.mp3".to_string()]);
    }

    #[test]
    #[serial]
    fn test_log_level_from_env() {
        std::env::set_var("CADENCE_LOG_LEVEL", "trace");
        let from_env = Args::parse_from(["cadence-ap", "a.mp3"]);
        let from_flag = Args::parse_from(["cadence-ap", "--log-level", "warn", "a.mp3"]);
        std::env::remove_var("CADENCE_LOG_LEVEL");

        assert_eq!(from_env.log_level.as_deref(), Some("trace"));
        assert_eq!(from_flag.log_level.as_deref(), Some("warn"));
    }

    #[test]
    #[serial]
    fn test_log_level_unset() {
        std::env::remove_var("CADENCE_LOG_LEVEL");
        let args = Args::parse_from(["cadence-ap", "a.mp3"]);
        assert_eq!(args.log_level, None);
    }
}
