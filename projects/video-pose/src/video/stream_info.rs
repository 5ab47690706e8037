// Container metadata shared by the video readers: duration, start offset and
// display orientation.
#![cfg_attr(not(any(feature = "ffmpeg", feature = "opencv")), allow(dead_code))]

use crate::error::{PoseError, PoseResult};
use image::{imageops, RgbImage};

/// Duration from a reported frame count and frame rate.
///
/// Backends report 0 or a negative value when they do not know either one.
/// That is a fatal open error, not a zero-length video.
pub fn duration_from_frames(frame_count: f64, fps: f64, path: &str) -> PoseResult<f64> {
    if frame_count.is_finite() && fps.is_finite() && frame_count > 0.0 && fps > 0.0 {
        Ok(frame_count / fps)
    } else {
        Err(PoseError::FatalOpen(format!(
            "Unknown duration for {} (frames={}, fps={})",
            path, frame_count, fps
        )))
    }
}

/// Duration in seconds from a tick count, or `None` when the count is
/// missing or not positive.
pub fn duration_from_ticks(ticks: Option<i64>, secs_per_tick: f64) -> Option<f64> {
    let secs = ticks? as f64 * secs_per_tick;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

/// Milliseconds between the container's zero and its first presentable
/// frame. Streams without a start time start at 0.
pub fn start_offset_ms(start_ticks: Option<i64>, secs_per_tick: f64) -> f64 {
    start_ticks
        .map(|t| t as f64 * secs_per_tick * 1000.0)
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .unwrap_or(0.0)
}

/// Position of a presentation timestamp relative to the first frame.
pub fn relative_frame_ms(pts: i64, secs_per_tick: f64, start_offset_ms: f64) -> f64 {
    pts as f64 * secs_per_tick * 1000.0 - start_offset_ms
}

/// Absolute seek target in microseconds for a timestamp measured from the
/// first frame.
pub fn seek_target_us(timestamp_ms: u64, start_offset_ms: f64) -> i64 {
    ((timestamp_ms as f64 + start_offset_ms) * 1000.0).round() as i64
}

/// Clockwise rotation to apply to decoded frames so they come out upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// From a display matrix angle, which is counterclockwise in degrees.
    /// Angles are snapped to the nearest quarter turn.
    pub fn from_display_degrees(degrees: f64) -> Self {
        if !degrees.is_finite() {
            return Rotation::None;
        }
        let clockwise = (-degrees).rem_euclid(360.0);
        match ((clockwise / 90.0).round() as i64) % 4 {
            1 => Rotation::Cw90,
            2 => Rotation::Cw180,
            3 => Rotation::Cw270,
            _ => Rotation::None,
        }
    }

    pub fn apply(self, image: RgbImage) -> RgbImage {
        match self {
            Rotation::None => image,
            Rotation::Cw90 => imageops::rotate90(&image),
            Rotation::Cw180 => imageops::rotate180(&image),
            Rotation::Cw270 => imageops::rotate270(&image),
        }
    }
}
