use crate::config::effective_fps;
use crate::error::{PoseError, PoseResult};

/// Highest rate whose frame interval is still at least one millisecond.
pub const MAX_SAMPLE_FPS: f64 = 1000.0;

/// Upper bound on timestamps per batch, a little over four days at 30 fps.
pub const MAX_SAMPLE_COUNT: u64 = 12_000_000;

/// Computes the timestamps (ms) to sample from a video of the given duration.
///
/// The i-th timestamp is `i / fps` seconds truncated to whole milliseconds,
/// emitted while that time is strictly before `duration_secs`. Offsets come
/// from the index, never from a running sum. A non-positive or NaN `fps`
/// falls back to 30 fps; rates above 1000 fps would collide at millisecond
/// resolution and are rejected.
pub fn generate_timestamps(duration_secs: f64, fps: f64) -> PoseResult<Vec<u64>> {
    if !duration_secs.is_finite() || duration_secs < 0.0 {
        return Err(PoseError::Configuration(format!(
            "Video duration must be a finite non-negative number, got {}",
            duration_secs
        )));
    }

    let rate = effective_fps(Some(fps));
    if rate > MAX_SAMPLE_FPS {
        return Err(PoseError::Configuration(format!(
            "Sample rate {} fps exceeds the maximum of {} fps",
            rate, MAX_SAMPLE_FPS
        )));
    }

    let count = (duration_secs * rate).ceil();
    if count > MAX_SAMPLE_COUNT as f64 {
        return Err(PoseError::Configuration(format!(
            "Sampling {}s at {} fps exceeds the limit of {} frames",
            duration_secs, rate, MAX_SAMPLE_COUNT
        )));
    }

    let mut timestamps = Vec::with_capacity(count as usize);
    let mut index: u64 = 0;
    loop {
        let time_secs = index as f64 / rate;
        if time_secs >= duration_secs {
            break;
        }
        let timestamp_ms = (index as f64 * 1000.0 / rate).floor() as u64;
        timestamps.push(timestamp_ms);
        index += 1;
    }

    Ok(timestamps)
}
