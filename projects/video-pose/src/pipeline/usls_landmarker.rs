use crate::config::{Delegate, DetectorOptions, RunningMode};
use crate::error::{PoseError, PoseResult};
use crate::pipeline::detection::{LandmarkerFactory, PoseLandmarker};
use crate::pipeline::types::{Landmark, Pose};
use crate::video::DecodedFrame;
use image::DynamicImage;
use usls::models::RTMO;
use usls::{Config, Image};

/// A wrapper around the USLS RTMO multi-person pose model.
///
/// RTMO is stateless, so video and live-stream modes only differ by the
/// timestamp checks done in `PoseDetector`.
pub struct UslsLandmarker {
    model: RTMO,
}

impl UslsLandmarker {
    pub fn new(options: &DetectorOptions) -> PoseResult<Self> {
        let config = Config::rtmo_s();
        let config = if options.model.is_empty() {
            config
        } else {
            config.with_model_file(&options.model)
        };

        let config = match options.delegate {
            Delegate::Cpu => config.with_model_device(usls::Device::Cpu(0)),
            #[cfg(target_os = "macos")]
            Delegate::Gpu => config.with_model_device(usls::Device::CoreMl),
            #[cfg(not(target_os = "macos"))]
            Delegate::Gpu => config.with_model_device(usls::Device::Cuda(0)),
        };

        for name in options.ignored_by_stateless_backend() {
            tracing::warn!("RTMO is stateless and has no mask output; ignoring {}", name);
        }

        let config = config
            .commit()
            .map_err(|e| PoseError::DetectorInit(e.to_string()))?;
        let model = RTMO::new(config).map_err(|e| PoseError::DetectorInit(e.to_string()))?;
        Ok(Self { model })
    }
}

impl PoseLandmarker for UslsLandmarker {
    fn detect(&mut self, frame: &DecodedFrame, _timestamp_ms: u64) -> PoseResult<Vec<Pose>> {
        let width = frame.width().max(1) as f32;
        let height = frame.height().max(1) as f32;
        let input = Image::from(DynamicImage::ImageRgb8(frame.image.clone()));

        let ys = self
            .model
            .forward(&[input])
            .map_err(|e| PoseError::Inference(e.to_string()))?;

        let poses = ys
            .into_iter()
            .next()
            .map(|y| {
                y.keypointss
                    .into_iter()
                    .map(|keypoints| {
                        let landmarks = keypoints
                            .iter()
                            .map(|kp| {
                                Landmark::new(
                                    kp.x() / width,
                                    kp.y() / height,
                                    kp.confidence().unwrap_or(0.0),
                                )
                            })
                            .collect();
                        Pose::from_landmarks(landmarks)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(poses)
    }
}

pub struct UslsFactory;

impl LandmarkerFactory for UslsFactory {
    fn create(
        &self,
        options: &DetectorOptions,
        mode: RunningMode,
    ) -> PoseResult<Box<dyn PoseLandmarker>> {
        tracing::info!(
            "Loading RTMO pose model for {} mode (delegate={:?})",
            mode.name(),
            options.delegate
        );
        Ok(Box::new(UslsLandmarker::new(options)?))
    }
}
