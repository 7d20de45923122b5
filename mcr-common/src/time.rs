//! Frame and time conversion helpers
//!
//! Positions inside the sound engine are counted in sample frames (one sample
//! per channel). These helpers convert between frames, seconds and
//! milliseconds at a given sample rate.

use std::time::Duration;

/// Convert a frame count to seconds at `sample_rate`
///
/// Returns 0.0 for a zero sample rate rather than dividing by zero.
pub fn frames_to_seconds(frames: i64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / sample_rate as f64
}

/// Convert seconds to the nearest frame at `sample_rate`
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> i64 {
    (seconds * sample_rate as f64).round() as i64
}

/// Convert milliseconds to the nearest frame at `sample_rate`
pub fn millis_to_frames(millis: i64, sample_rate: u32) -> i64 {
    (millis as i128 * sample_rate as i128 / 1000) as i64
}

/// Wall-clock duration of `frames` at `sample_rate`
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / sample_rate as f64)
}

/// Frames elapsed at `sample_rate` during `duration`
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> i64 {
    (duration.as_secs_f64() * sample_rate as f64) as i64
}
