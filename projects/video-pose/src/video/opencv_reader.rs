use super::stream_info::duration_from_frames;
use super::{DecodedFrame, FrameSource};
use crate::error::{PoseError, PoseResult};
use image::RgbImage;
use opencv::{
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_HW_ACCELERATION,
        CAP_PROP_ORIENTATION_AUTO, CAP_PROP_POS_MSEC, VIDEO_ACCELERATION_ANY,
    },
};
use std::path::Path;

pub struct OpencvReader {
    capture: VideoCapture,
    duration_secs: f64,
}

fn decode_error(timestamp_ms: u64, e: impl std::fmt::Display) -> PoseError {
    PoseError::Decode {
        timestamp_ms,
        message: e.to_string(),
    }
}

impl OpencvReader {
    pub fn new(path: &Path) -> PoseResult<Self> {
        let path_str = path.to_string_lossy();
        let mut capture = VideoCapture::from_file(&path_str, CAP_ANY)
            .map_err(|e| PoseError::FatalOpen(format!("{}: {}", path_str, e)))?;
        if !capture.is_opened().unwrap_or(false) {
            return Err(PoseError::FatalOpen(format!(
                "Failed to open video file: {}",
                path_str
            )));
        }

        // Try to enable hardware acceleration (VideoToolbox on macOS, VA-API on Linux, etc.)
        match capture.set(CAP_PROP_HW_ACCELERATION, VIDEO_ACCELERATION_ANY as f64) {
            Ok(true) => tracing::debug!("OpencvReader: hardware acceleration enabled"),
            _ => tracing::debug!("OpencvReader: hardware acceleration not available"),
        }

        // Frames come out upright per the container's display matrix.
        if !capture.set(CAP_PROP_ORIENTATION_AUTO, 1.0).unwrap_or(false) {
            tracing::debug!("OpencvReader: orientation auto-correction not supported");
        }

        let fps = capture.get(CAP_PROP_FPS).unwrap_or(0.0);
        let raw_count = capture.get(CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
        let duration_secs = duration_from_frames(raw_count, fps, &path_str)?;

        tracing::info!(
            "OpencvReader: opened {}, duration={:.2}s, fps={:.2}, stream_frames={}",
            path_str,
            duration_secs,
            fps,
            raw_count
        );

        Ok(Self {
            capture,
            duration_secs,
        })
    }
}

impl FrameSource for OpencvReader {
    fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn decode_at(&mut self, timestamp_ms: u64) -> PoseResult<DecodedFrame> {
        self.capture
            .set(CAP_PROP_POS_MSEC, timestamp_ms as f64)
            .map_err(|e| decode_error(timestamp_ms, e))?;

        let mut frame = opencv::core::Mat::default();
        let success = self
            .capture
            .read(&mut frame)
            .map_err(|e| decode_error(timestamp_ms, e))?;
        if !success || frame.empty() {
            return Err(decode_error(timestamp_ms, "no frame at requested position"));
        }

        let image = mat_to_rgb_image(&frame).map_err(|e| decode_error(timestamp_ms, e))?;
        Ok(DecodedFrame::new(image))
    }
}

/// Convert an OpenCV Mat (BGR) to an RGB image buffer.
fn mat_to_rgb_image(mat: &opencv::core::Mat) -> anyhow::Result<RgbImage> {
    let mut rgb_mat = opencv::core::Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    if !rgb_mat.is_continuous() {
        anyhow::bail!("Mat is not continuous");
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    RgbImage::from_vec(size.width as u32, size.height as u32, buffer)
        .ok_or_else(|| anyhow::anyhow!("Failed to create image buffer from Mat data"))
}
