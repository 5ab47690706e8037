#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_reader;
#[cfg(feature = "opencv")]
pub mod opencv_reader;
pub mod sampler;
pub mod stream_info;

use crate::error::{PoseError, PoseResult};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A decoded RGB frame. Lives only for the duration of one detection.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub image: RgbImage,
}

impl DecodedFrame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Loads a still image from disk for single-image and live-stream detection.
    pub fn open(path: &Path) -> PoseResult<Self> {
        let image = image::open(path).map_err(|e| {
            PoseError::FatalOpen(format!("Failed to load image {}: {}", path.display(), e))
        })?;
        Ok(Self::new(image.to_rgb8()))
    }
}

/// An opened video that can decode the frame at any timestamp.
pub trait FrameSource: Send {
    fn duration_secs(&self) -> f64;
    fn decode_at(&mut self, timestamp_ms: u64) -> PoseResult<DecodedFrame>;
}

/// Decoder implementation used to open videos.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VideoBackend {
    #[default]
    Opencv,
    Ffmpeg,
}

impl VideoBackend {
    pub fn open(&self, path: &Path) -> PoseResult<Box<dyn FrameSource>> {
        if !path.exists() {
            return Err(PoseError::FatalOpen(format!(
                "Video file not found: {}",
                path.display()
            )));
        }

        match self {
            #[cfg(feature = "opencv")]
            VideoBackend::Opencv => Ok(Box::new(opencv_reader::OpencvReader::new(path)?)),
            #[cfg(feature = "ffmpeg")]
            VideoBackend::Ffmpeg => Ok(Box::new(ffmpeg_reader::FfmpegReader::new(path)?)),
            #[allow(unreachable_patterns)]
            other => Err(PoseError::FatalOpen(format!(
                "Unsupported or disabled backend: {:?}",
                other
            ))),
        }
    }
}

/// Opens video files with a fixed backend.
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path) -> PoseResult<Box<dyn FrameSource>>;
}

impl VideoOpener for VideoBackend {
    fn open(&self, path: &Path) -> PoseResult<Box<dyn FrameSource>> {
        VideoBackend::open(self, path)
    }
}
