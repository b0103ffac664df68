//! Human-readable track time formatting
//!
//! Used for log lines and status output. Positions and durations are plain
//! `f64` seconds throughout the pipeline.

/// Seconds in one hour; at or above this the hour field is shown
const HOUR: u64 = 3600;

/// Placeholder for unknown or invalid times
const UNKNOWN: &str = "--:--";

/// Format a track position or duration.
///
/// - Under one hour: `M:SS`
/// - One hour or more: `H:MM:SS`
/// - Negative, NaN or infinite: `--:--`
///
/// Fractions are truncated, matching what a player display shows.
///
/// # Examples
///
/// ```
/// use cadence_common::human_time::format_track_time;
///
/// assert_eq!(format_track_time(0.0), "0:00");
/// assert_eq!(format_track_time(205.9), "3:25");
/// assert_eq!(format_track_time(3661.0), "1:01:01");
/// assert_eq!(format_track_time(f64::NAN), "--:--");
/// ```
pub fn format_track_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return UNKNOWN.to_string();
    }

    let total = seconds as u64;
    let hours = total / HOUR;
    let minutes = (total % HOUR) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Format an optional time, `--:--` when unknown.
pub fn format_track_time_opt(seconds: Option<f64>) -> String {
    match seconds {
        Some(seconds) => format_track_time(seconds),
        None => UNKNOWN.to_string(),
    }
}

/// Format `position / duration` for status lines.
pub fn format_progress(position: f64, duration: Option<f64>) -> String {
    format!(
        "{} / {}",
        format_track_time(position),
        format_track_time_opt(duration)
    )
}
