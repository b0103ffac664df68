//! ffmpeg / ffprobe integration
//!
//! [`FfmpegExecutor`] converts a remote stream into a WAV temp file and
//! reports progress parsed from ffmpeg's `-progress` output. [`FfprobeProber`]
//! asks ffprobe for the codec of the first audio stream; it is only used to
//! make fallback logs more useful.

use crate::config::TranscodeSettings;
use crate::error::{Error, Result};
use crate::pipeline::collab::{
    CodecProber, ExecutorEvent, ExecutorEvents, TranscodeExecutor, TranscodeRequest,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Percent reported while ffmpeg is still running never exceeds this
const MAX_RUNNING_PERCENT: f32 = 99.0;

/// Runs ffmpeg as a child process per request
pub struct FfmpegExecutor {
    settings: TranscodeSettings,
}

impl FfmpegExecutor {
    pub fn new(settings: TranscodeSettings) -> Self {
        Self { settings }
    }

    /// Full ffmpeg argument list for a request
    pub fn arguments(&self, request: &TranscodeRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-nostdin",
            "-y",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();

        args.push(OsString::from(&request.source_url));
        args.extend(
            [
                "-vn".to_string(),
                "-acodec".to_string(),
                "pcm_s16le".to_string(),
                "-ar".to_string(),
                self.settings.sample_rate.to_string(),
                "-ac".to_string(),
                self.settings.channels.to_string(),
                "-b:a".to_string(),
                format!("{}k", self.settings.bitrate_kbps),
                "-f".to_string(),
                "wav".to_string(),
                "-progress".to_string(),
                "pipe:1".to_string(),
                "-nostats".to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(request.output_path.clone().into_os_string());
        args
    }
}

impl TranscodeExecutor for FfmpegExecutor {
    fn spawn(&self, request: TranscodeRequest, events: ExecutorEvents) -> Result<()> {
        debug!(
            track_id = %request.correlation_id,
            ffmpeg = %self.settings.ffmpeg_path.display(),
            "Launching ffmpeg"
        );

        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(self.arguments(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Transcode(format!(
                    "Failed to launch {}: {}",
                    self.settings.ffmpeg_path.display(),
                    e
                ))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::spawn(supervise(child, stdout, stderr, request, events));
        Ok(())
    }
}

/// Follow one ffmpeg process to its exit and emit the terminal event
async fn supervise(
    mut child: Child,
    stdout: Option<impl AsyncRead + Unpin + Send + 'static>,
    stderr: Option<impl AsyncRead + Unpin + Send + 'static>,
    request: TranscodeRequest,
    events: ExecutorEvents,
) {
    let (duration_tx, duration_rx) = watch::channel(None::<f64>);

    // stderr: banner with the input duration, then error messages
    let stderr_task = tokio::spawn(async move {
        let mut last_line = String::new();
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(total) = parse_duration_line(&line) {
                    let _ = duration_tx.send(Some(total));
                }
                if !line.trim().is_empty() {
                    last_line = line.trim().to_string();
                }
            }
        }
        last_line
    });

    // stdout: key=value progress blocks
    if let Some(stdout) = stdout {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(elapsed) = parse_progress_line(&line) else {
                continue;
            };
            let total = *duration_rx.borrow();
            if let Some(percent) = total.and_then(|total| progress_percent(elapsed, total)) {
                let _ = events.send(ExecutorEvent::Progress {
                    correlation_id: request.correlation_id.clone(),
                    percent,
                });
            }
        }
    }

    let last_stderr = stderr_task.await.unwrap_or_default();
    let outcome = match child.wait().await {
        Ok(status) if status.success() => {
            info!(track_id = %request.correlation_id, "ffmpeg finished");
            Ok(request.output_path.clone())
        }
        Ok(status) => {
            let reason = if last_stderr.is_empty() {
                format!("ffmpeg exited with {}", status)
            } else {
                format!("ffmpeg exited with {}: {}", status, last_stderr)
            };
            warn!(track_id = %request.correlation_id, reason = %reason, "ffmpeg failed");
            Err(reason)
        }
        Err(e) => Err(format!("Failed to wait for ffmpeg: {}", e)),
    };

    let _ = events.send(ExecutorEvent::Terminal {
        correlation_id: request.correlation_id,
        outcome,
    });
}

/// Total input duration from ffmpeg's banner line
/// (`  Duration: 00:03:25.47, start: 0.000000, bitrate: 1411 kb/s`)
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let stamp = rest.split(',').next()?.trim();
    parse_timestamp(stamp)
}

/// `HH:MM:SS.ss` to seconds
fn parse_timestamp(stamp: &str) -> Option<f64> {
    let mut parts = stamp.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Elapsed output time from a `-progress` line, in seconds
///
/// Both `out_time_us` and `out_time_ms` carry microseconds.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => {
            let micros: i64 = value.trim().parse().ok()?;
            (micros >= 0).then(|| micros as f64 / 1_000_000.0)
        }
        _ => None,
    }
}

/// Percent done, capped below 100 until the process has exited
pub fn progress_percent(elapsed_secs: f64, total_secs: f64) -> Option<f32> {
    if !(total_secs.is_finite() && total_secs > 0.0 && elapsed_secs.is_finite()) {
        return None;
    }
    let percent = (elapsed_secs / total_secs * 100.0) as f32;
    Some(percent.clamp(0.0, MAX_RUNNING_PERCENT))
}

/// Codec probing through ffprobe
pub struct FfprobeProber {
    settings: TranscodeSettings,
}

impl FfprobeProber {
    pub fn new(settings: TranscodeSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl CodecProber for FfprobeProber {
    async fn probe(&self, url: &str) -> Option<String> {
        let run = Command::new(&self.settings.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                url,
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.settings.probe_timeout, run).await {
            Ok(Ok(output)) if output.status.success() => parse_codec_name(&output.stdout),
            Ok(Ok(output)) => {
                debug!(status = %output.status, "ffprobe failed");
                None
            }
            Ok(Err(e)) => {
                debug!(error = %e, "ffprobe could not be launched");
                None
            }
            Err(_) => {
                debug!(timeout = ?self.settings.probe_timeout, "ffprobe timed out");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
}

/// Codec of the first audio stream in `ffprobe -print_format json` output
pub fn parse_codec_name(json: &[u8]) -> Option<String> {
    let output: ProbeOutput = serde_json::from_slice(json).ok()?;
    output
        .streams
        .into_iter()
        .find(|stream| stream.codec_type.as_deref() == Some("audio"))
        .and_then(|stream| stream.codec_name)
}
