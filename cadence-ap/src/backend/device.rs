//! Device-backed playback backend
//!
//! Fetches the whole source, decodes and resamples it off the async runtime,
//! and plays it through a [`Deck`](crate::audio::Deck) of the shared output
//! device. The native and the transcoded backend are two instances of this
//! type; only the sources they accept differ.
//!
//! Buffers replaced in a deck are dropped after the deck lock is released.

use super::{AudioBackend, BackendEvent, BackendSignal, MediaErrorCode, SinkTicket, SourceDescriptor};
use crate::audio::{DecodeFailure, OutputControl, Resampler, SharedDeck, SimpleDecoder};
use crate::error::{Error, Result};
use crate::pipeline::transcode::LocalResourceScheme;
use cadence_common::track::extension_of;
use cadence_common::BackendKind;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often a playing deck reports its position
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Reads source bytes for a backend
pub struct SourceFetcher {
    client: reqwest::Client,
    scheme: LocalResourceScheme,
}

impl SourceFetcher {
    pub fn new(scheme: LocalResourceScheme) -> Self {
        Self {
            client: reqwest::Client::new(),
            scheme,
        }
    }

    pub async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<u8>> {
        match source {
            SourceDescriptor::Remote(url) => match url.strip_prefix("file://") {
                Some(path) => tokio::fs::read(path)
                    .await
                    .map_err(|e| Error::Fetch(format!("Failed to read {}: {}", path, e))),
                None => {
                    let response = self
                        .client
                        .get(url)
                        .send()
                        .await
                        .map_err(|e| Error::Fetch(format!("Request failed: {}", e)))?
                        .error_for_status()
                        .map_err(|e| Error::Fetch(format!("Server refused: {}", e)))?;
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| Error::Fetch(format!("Download interrupted: {}", e)))?;
                    Ok(bytes.to_vec())
                }
            },
            SourceDescriptor::Local(resource) => self.scheme.read(resource).await,
        }
    }
}

/// Extension hint for the decoder, ignoring any query string
fn source_extension(source: &SourceDescriptor) -> Option<String> {
    let text = source.to_string();
    let path = text.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or(path);
    extension_of(name)
}

fn error_code(failure: &DecodeFailure) -> MediaErrorCode {
    match failure {
        DecodeFailure::Unsupported(_) => MediaErrorCode::SrcNotSupported,
        DecodeFailure::Corrupt(_) => MediaErrorCode::Decode,
    }
}

pub struct DeviceBackend {
    kind: BackendKind,
    deck: SharedDeck,
    output_rate: u32,
    fetcher: Arc<SourceFetcher>,
    events: mpsc::UnboundedSender<BackendEvent>,
    /// Ticket of the load the deck belongs to
    current: Arc<Mutex<Option<SinkTicket>>>,
    loader: Option<JoinHandle<()>>,
    ticker: JoinHandle<()>,
    /// Rebuilds a failed device stream on the next play
    output: Option<OutputControl>,
}

impl DeviceBackend {
    /// Must be called inside a tokio runtime
    pub fn new(
        kind: BackendKind,
        deck: SharedDeck,
        output_rate: u32,
        fetcher: Arc<SourceFetcher>,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> Self {
        let current = Arc::new(Mutex::new(None));
        let ticker = tokio::spawn(report_progress(
            Arc::clone(&deck),
            Arc::clone(&current),
            output_rate,
            events.clone(),
        ));
        Self {
            kind,
            deck,
            output_rate,
            fetcher,
            events,
            current,
            loader: None,
            ticker,
            output: None,
        }
    }

    /// Recover the shared device stream when playback resumes after an error
    pub fn with_output(mut self, output: OutputControl) -> Self {
        self.output = Some(output);
        self
    }

    fn ticket(&self) -> Option<SinkTicket> {
        *self.current.lock()
    }

    fn abort_loader(&mut self) {
        if let Some(loader) = self.loader.take() {
            loader.abort();
        }
    }
}

impl AudioBackend for DeviceBackend {
    fn load(&mut self, source: &SourceDescriptor, ticket: SinkTicket) -> Result<()> {
        if source.kind() != self.kind {
            return Err(Error::Backend(format!(
                "{} backend cannot play {}",
                self.kind, source
            )));
        }

        self.abort_loader();
        let retired = {
            let mut current = self.current.lock();
            *current = Some(ticket);
            self.deck.lock().clear()
        };
        drop(retired);

        debug!(%ticket, source = %source, "Loading source");
        self.loader = Some(tokio::spawn(load_source(
            source.clone(),
            ticket,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.deck),
            Arc::clone(&self.current),
            self.output_rate,
            self.events.clone(),
        )));
        Ok(())
    }

    fn clear(&mut self) {
        self.abort_loader();
        let retired = {
            let mut current = self.current.lock();
            *current = None;
            self.deck.lock().clear()
        };
        drop(retired);
    }

    fn play(&mut self) {
        if let Some(output) = &self.output {
            if output.recover_if_failed() {
                info!(kind = %self.kind, "Output stream failed earlier, rebuilding before play");
            }
        }
        self.deck.lock().set_playing(true);
    }

    fn pause(&mut self) {
        self.deck.lock().set_playing(false);
        if let Some(ticket) = self.ticket() {
            let _ = self.events.send(BackendEvent {
                ticket,
                signal: BackendSignal::Paused,
            });
        }
    }

    fn seek(&mut self, position_secs: f64) {
        let frame = (position_secs.max(0.0) * self.output_rate as f64) as usize;
        self.deck.lock().seek_frame(frame);
    }

    fn set_volume(&mut self, volume: f32) {
        self.deck.lock().set_volume(volume);
    }

    fn volume(&self) -> f32 {
        self.deck.lock().volume()
    }
}

impl Drop for DeviceBackend {
    fn drop(&mut self) {
        self.abort_loader();
        self.ticker.abort();
    }
}

async fn load_source(
    source: SourceDescriptor,
    ticket: SinkTicket,
    fetcher: Arc<SourceFetcher>,
    deck: SharedDeck,
    current: Arc<Mutex<Option<SinkTicket>>>,
    output_rate: u32,
    events: mpsc::UnboundedSender<BackendEvent>,
) {
    let send = |signal: BackendSignal| {
        let _ = events.send(BackendEvent { ticket, signal });
    };

    let bytes = match fetcher.fetch(&source).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%ticket, error = %e, "Source fetch failed");
            send(BackendSignal::Error(MediaErrorCode::Network));
            return;
        }
    };

    let extension = source_extension(&source);
    let decoded = tokio::task::spawn_blocking(move || {
        let audio = SimpleDecoder::decode_bytes(bytes, extension.as_deref())?;
        Resampler::resample(&audio.samples, audio.sample_rate, output_rate)
            .map_err(|e| DecodeFailure::Corrupt(e.to_string()))
    })
    .await;

    let samples = match decoded {
        Ok(Ok(samples)) => samples,
        Ok(Err(failure)) => {
            warn!(%ticket, error = %failure, "Source could not be decoded");
            send(BackendSignal::Error(error_code(&failure)));
            return;
        }
        Err(e) => {
            warn!(%ticket, error = %e, "Decode task failed");
            send(BackendSignal::Error(MediaErrorCode::Decode));
            return;
        }
    };

    let (duration_secs, retired) = {
        let current = current.lock();
        if *current != Some(ticket) {
            debug!(%ticket, "Load superseded, discarding decoded audio");
            return;
        }
        let mut deck = deck.lock();
        let retired = deck.install(samples);
        (deck.duration_secs(output_rate), retired)
    };
    drop(retired);

    info!(%ticket, duration_secs, "Source ready");
    send(BackendSignal::MetadataLoaded { duration_secs });
    send(BackendSignal::Ready);
}

async fn report_progress(
    deck: SharedDeck,
    current: Arc<Mutex<Option<SinkTicket>>>,
    output_rate: u32,
    events: mpsc::UnboundedSender<BackendEvent>,
) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        interval.tick().await;

        let Some(ticket) = *current.lock() else {
            continue;
        };

        let signal = {
            let mut deck = deck.lock();
            if deck.take_interrupted() {
                Some(BackendSignal::Paused)
            } else if deck.take_finished() {
                Some(BackendSignal::Ended)
            } else if deck.is_playing() {
                Some(BackendSignal::TimeUpdate(deck.position_secs(output_rate)))
            } else {
                None
            }
        };

        if let Some(signal) = signal {
            if events.send(BackendEvent { ticket, signal }).is_err() {
                return;
            }
        }
    }
}
