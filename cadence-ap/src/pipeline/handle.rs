//! Public handle to the playback controller
//!
//! Cheap to clone. Every method enqueues a command; the controller applies
//! commands in the order they were sent.

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::pipeline::controller::{Backends, Collaborators, Command, PlaybackController, PlayerStatus};
use crate::pipeline::transcode::TempFileRegistry;
use cadence_common::{PlaybackMode, PlayerEvent, Track};
use tokio::sync::{broadcast, mpsc, oneshot};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerHandle {
    /// Start the controller task on the current tokio runtime
    pub fn spawn(
        config: PipelineConfig,
        registry: TempFileRegistry,
        collaborators: Collaborators,
        backends: Backends,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let controller = PlaybackController::new(
            config,
            registry,
            collaborators,
            backends,
            command_rx,
            event_tx.clone(),
        );
        tokio::spawn(controller.run());

        Self {
            commands: command_tx,
            events: event_tx,
        }
    }

    /// Receive every [`PlayerEvent`] published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub async fn load_track(&self, track: Track) -> Result<()> {
        self.send(Command::LoadTrack(track)).await
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn seek(&self, position_secs: f64) -> Result<()> {
        self.send(Command::Seek(position_secs)).await
    }

    /// Volume in 0.0-1.0; out-of-range values are clamped
    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        self.send(Command::SetVolume(volume)).await
    }

    /// Silence output without losing the volume
    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.send(Command::SetMuted(muted)).await
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        self.send(Command::ToggleMute).await
    }

    pub async fn next(&self) -> Result<()> {
        self.send(Command::Next).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.send(Command::Previous).await
    }

    pub async fn set_playlist(&self, tracks: Vec<Track>) -> Result<()> {
        self.send(Command::SetPlaylist(tracks)).await
    }

    pub async fn set_mode(&self, mode: PlaybackMode) -> Result<()> {
        self.send(Command::SetMode(mode)).await
    }

    pub async fn status(&self) -> Result<PlayerStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx)).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("status reply dropped".to_string()))
    }

    /// Stop playback, cancel listeners and delete every temp file.
    ///
    /// Returns once the controller has finished cleaning up.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("shutdown acknowledgement dropped".to_string()))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed("playback controller is not running".to_string()))
    }
}
