//! Audio output using cpal
//!
//! One device stream mixes every [`Deck`]. Each playback backend owns one
//! deck; a cleared deck contributes silence.
//!
//! The cpal stream is not `Send`, so it lives on a dedicated thread for as
//! long as the [`OutputDevice`] exists. A stream error marks the stream
//! failed; the next [`OutputControl::recover_if_failed`] makes that thread
//! rebuild it.

use super::CHANNELS;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Preferred device rate
pub const PREFERRED_SAMPLE_RATE: u32 = 44100;

/// Errors tolerated on a named device before switching to the default one
pub const MAX_ERRORS_BEFORE_FALLBACK: u32 = 3;

/// PCM loaded into one sink plus its transport state
#[derive(Debug, Default)]
pub struct Deck {
    /// Interleaved stereo at the device rate
    samples: Arc<Vec<f32>>,
    frame: usize,
    playing: bool,
    volume: f32,
    finished: bool,
    interrupted: bool,
}

pub type SharedDeck = Arc<Mutex<Deck>>;

impl Deck {
    pub fn shared() -> SharedDeck {
        Arc::new(Mutex::new(Deck {
            volume: 1.0,
            ..Deck::default()
        }))
    }

    /// Replace the content; playback starts paused at frame 0
    ///
    /// Returns the previous buffer. Callers drop it after releasing the deck
    /// lock so the audio callback never waits on a large free.
    pub fn install(&mut self, samples: Vec<f32>) -> Arc<Vec<f32>> {
        self.frame = 0;
        self.playing = false;
        self.finished = false;
        self.interrupted = false;
        std::mem::replace(&mut self.samples, Arc::new(samples))
    }

    /// Drop the content, keeping the volume; returns the previous buffer
    pub fn clear(&mut self) -> Arc<Vec<f32>> {
        self.install(Vec::new())
    }

    pub fn is_loaded(&self) -> bool {
        !self.samples.is_empty()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing && self.is_loaded() && !self.at_end();
        if self.playing {
            self.interrupted = false;
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    pub fn seek_frame(&mut self, frame: usize) {
        self.frame = frame.min(self.frames());
        self.finished = false;
    }

    pub fn position_secs(&self, sample_rate: u32) -> f64 {
        self.frame as f64 / sample_rate.max(1) as f64
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.frames() as f64 / sample_rate.max(1) as f64
    }

    /// True once after playback ran off the end
    pub fn take_finished(&mut self) -> bool {
        std::mem::take(&mut self.finished)
    }

    /// True once after the device stopped under a playing deck
    pub fn take_interrupted(&mut self) -> bool {
        std::mem::take(&mut self.interrupted)
    }

    /// Device failure: stop without reaching the end
    pub fn interrupt(&mut self) {
        if self.playing {
            self.playing = false;
            self.interrupted = true;
        }
    }

    fn at_end(&self) -> bool {
        self.frame >= self.frames()
    }

    /// Add this deck's next frames into a device buffer of `channels` channels
    pub fn mix_into(&mut self, output: &mut [f32], channels: usize) {
        if !self.playing || channels == 0 {
            return;
        }
        let total = self.frames();
        for out in output.chunks_mut(channels) {
            if self.frame >= total {
                self.playing = false;
                self.finished = true;
                break;
            }
            let left = self.samples[self.frame * CHANNELS] * self.volume;
            let right = self.samples[self.frame * CHANNELS + 1] * self.volume;
            if channels == 1 {
                out[0] += (left + right) * 0.5;
            } else {
                out[0] += left;
                out[1] += right;
            }
            self.frame += 1;
        }
    }
}

/// Error state shared by the stream callbacks and the audio thread
#[derive(Debug, Default)]
pub struct StreamHealth {
    failed: AtomicBool,
    error_count: AtomicU32,
}

impl StreamHealth {
    /// Flag the stream as failed; returns the errors seen since the last rebuild
    pub(crate) fn record_error(&self) -> u32 {
        self.failed.store(true, Ordering::SeqCst);
        self.error_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn has_error(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    fn clear_error(&self) {
        self.failed.store(false, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamCommand {
    Recover,
    Stop,
}

/// Cloneable handle for asking the audio thread to rebuild its stream
#[derive(Debug, Clone)]
pub struct OutputControl {
    commands: mpsc::Sender<StreamCommand>,
    health: Arc<StreamHealth>,
}

impl OutputControl {
    pub(crate) fn new(commands: mpsc::Sender<StreamCommand>, health: Arc<StreamHealth>) -> Self {
        Self { commands, health }
    }

    /// Request a rebuild if the stream reported an error
    ///
    /// Returns true when a request was sent. Healthy streams are left alone.
    pub fn recover_if_failed(&self) -> bool {
        if !self.health.has_error() {
            return false;
        }
        self.commands.send(StreamCommand::Recover).is_ok()
    }

    pub fn health(&self) -> &StreamHealth {
        &self.health
    }
}

/// Device the stream is (re)built on
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamTarget {
    requested: Option<String>,
}

impl StreamTarget {
    /// Device name to rebuild on; gives up on a named device after repeated errors
    fn for_recovery(&mut self, error_count: u32) -> Option<&str> {
        if error_count > MAX_ERRORS_BEFORE_FALLBACK && self.requested.is_some() {
            warn!("Multiple errors detected, attempting fallback to default device");
            self.requested = None;
        }
        self.requested.as_deref()
    }
}

/// Running output stream
pub struct OutputDevice {
    sample_rate: u32,
    control: OutputControl,
    thread: Option<JoinHandle<()>>,
}

impl OutputDevice {
    /// Names of the available output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open a device (default when `device_name` is `None` or not found) and
    /// start mixing `decks` into it.
    pub fn open(device_name: Option<&str>, decks: Vec<SharedDeck>) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (command_tx, command_rx) = mpsc::channel::<StreamCommand>();
        let health = Arc::new(StreamHealth::default());
        let mut target = StreamTarget {
            requested: device_name.map(str::to_string),
        };

        let thread_health = Arc::clone(&health);
        let thread = std::thread::Builder::new()
            .name("cadence-audio".to_string())
            .spawn(move || {
                let health = thread_health;
                let (stream, sample_rate) =
                    match start_stream(target.requested.as_deref(), decks.clone(), &health, None) {
                        Ok(started) => started,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = ready_tx.send(Ok(sample_rate));

                let mut stream = Some(stream);
                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Stop => break,
                        // Duplicate requests after a rebuild find a healthy stream
                        StreamCommand::Recover if !health.has_error() => {}
                        StreamCommand::Recover => {
                            drop(stream.take());
                            stream = recover(&mut target, &decks, &health, sample_rate).ok();
                        }
                    }
                }
                drop(stream);
                debug!("Audio stream closed");
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn audio thread: {}", e)))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Audio thread exited during startup".to_string()))??;

        Ok(Self {
            sample_rate,
            control: OutputControl::new(command_tx, health),
            thread: Some(thread),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Handle for backends to request stream recovery
    pub fn control(&self) -> OutputControl {
        self.control.clone()
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        let _ = self.control.commands.send(StreamCommand::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio thread panicked");
            }
        }
    }
}

/// Rebuild the stream after an error, keeping the rate the decks were resampled for
fn recover(
    target: &mut StreamTarget,
    decks: &[SharedDeck],
    health: &Arc<StreamHealth>,
    sample_rate: u32,
) -> Result<Stream> {
    let error_count = health.error_count();
    warn!("Attempting audio stream recovery (error count: {})", error_count);

    let device_name = target.for_recovery(error_count).map(str::to_string);
    match start_stream(device_name.as_deref(), decks.to_vec(), health, Some(sample_rate)) {
        Ok((stream, rate)) => {
            if rate != sample_rate {
                warn!(
                    "Recovered stream runs at {}Hz but audio was prepared for {}Hz",
                    rate, sample_rate
                );
            }
            health.clear_error();
            info!("Audio stream recovery successful");
            Ok(stream)
        }
        Err(e) => {
            health.record_error();
            error!("Audio stream recovery failed: {}", e);
            Err(e)
        }
    }
}

fn select_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Using audio device: {}", name);
            return Ok(device);
        }
        warn!("Requested device '{}' not found, falling back to default device", name);
    }

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
    info!(
        "Using default audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok(device)
}

/// Prefers stereo f32 at `rate`, otherwise the device default
fn best_config(device: &Device, rate: u32) -> Result<(StreamConfig, SampleFormat)> {
    let mut supported = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

    let preferred = supported.find(|config| {
        config.channels() == 2
            && config.min_sample_rate().0 <= rate
            && config.max_sample_rate().0 >= rate
            && config.sample_format() == SampleFormat::F32
    });
    if let Some(config) = preferred {
        return Ok((
            config.with_sample_rate(cpal::SampleRate(rate)).config(),
            SampleFormat::F32,
        ));
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
    Ok((fallback.config(), fallback.sample_format()))
}

/// Build and start a stream; `rate` pins the sample rate on a rebuild
fn start_stream(
    device_name: Option<&str>,
    decks: Vec<SharedDeck>,
    health: &Arc<StreamHealth>,
    rate: Option<u32>,
) -> Result<(Stream, u32)> {
    let device = select_device(device_name)?;
    let (config, sample_format) = best_config(&device, rate.unwrap_or(PREFERRED_SAMPLE_RATE))?;
    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}",
        config.sample_rate.0, config.channels, sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, decks, health)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, decks, health)?,
        SampleFormat::I32 => build_stream::<i32>(&device, &config, decks, health)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, decks, health)?,
        other => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
    info!("Audio stream started at {}Hz", config.sample_rate.0);
    Ok((stream, config.sample_rate.0))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    decks: Vec<SharedDeck>,
    health: &Arc<StreamHealth>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let error_decks = decks.clone();
    let health = Arc::clone(health);
    let mut mix: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mix.clear();
                mix.resize(data.len(), 0.0);
                for deck in &decks {
                    deck.lock().mix_into(&mut mix, channels);
                }
                for (out, sample) in data.iter_mut().zip(mix.iter().copied()) {
                    *out = T::from_sample(sample.clamp(-1.0, 1.0));
                }
            },
            move |err| {
                let count = health.record_error();
                error!("Audio stream error ({} since last rebuild): {}", count, err);
                for deck in &error_decks {
                    deck.lock().interrupt();
                }
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}
