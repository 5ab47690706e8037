use crate::config::{DetectorOptions, RunningMode};
use crate::error::{PoseError, PoseResult};
use crate::pipeline::types::{Pose, PoseDetectionResult};
use crate::video::DecodedFrame;
use std::time::Instant;

/// Raw pose-estimation backend. Returns every pose it finds; filtering by the
/// configured thresholds happens in [`PoseDetector`].
pub trait PoseLandmarker: Send {
    fn detect(&mut self, frame: &DecodedFrame, timestamp_ms: u64) -> PoseResult<Vec<Pose>>;
}

/// Blanket implementation so closures can stand in for a model.
impl<F> PoseLandmarker for F
where
    F: FnMut(&DecodedFrame, u64) -> PoseResult<Vec<Pose>> + Send,
{
    fn detect(&mut self, frame: &DecodedFrame, timestamp_ms: u64) -> PoseResult<Vec<Pose>> {
        self(frame, timestamp_ms)
    }
}

/// Builds landmarkers for a given configuration and running mode.
pub trait LandmarkerFactory: Send + Sync {
    fn create(
        &self,
        options: &DetectorOptions,
        mode: RunningMode,
    ) -> PoseResult<Box<dyn PoseLandmarker>>;
}

/// A configured detector: a landmarker plus its options, running mode and
/// timestamp bookkeeping.
pub struct PoseDetector {
    landmarker: Box<dyn PoseLandmarker>,
    options: DetectorOptions,
    mode: RunningMode,
    last_timestamp_ms: Option<u64>,
}

impl PoseDetector {
    pub fn create(
        factory: &dyn LandmarkerFactory,
        options: DetectorOptions,
        mode: RunningMode,
    ) -> PoseResult<Self> {
        options.validate()?;
        let landmarker = factory.create(&options, mode)?;
        tracing::debug!(
            "Created {} detector (numPoses={}, model='{}')",
            mode.name(),
            options.num_poses,
            options.model
        );
        Ok(Self::new(landmarker, options, mode))
    }

    pub fn new(
        landmarker: Box<dyn PoseLandmarker>,
        options: DetectorOptions,
        mode: RunningMode,
    ) -> Self {
        Self {
            landmarker,
            options,
            mode,
            last_timestamp_ms: None,
        }
    }

    pub fn mode(&self) -> RunningMode {
        self.mode
    }

    /// Runs detection on one frame.
    ///
    /// Video and live-stream detectors reject a timestamp earlier than the
    /// previous accepted one with [`PoseError::TimestampOrder`] without
    /// calling the landmarker.
    pub fn detect(
        &mut self,
        frame: &DecodedFrame,
        timestamp_ms: u64,
    ) -> PoseResult<PoseDetectionResult> {
        if self.mode.is_streaming() {
            if let Some(last) = self.last_timestamp_ms {
                if timestamp_ms < last {
                    return Err(PoseError::TimestampOrder {
                        last,
                        got: timestamp_ms,
                    });
                }
            }
            self.last_timestamp_ms = Some(timestamp_ms);
        }

        let start_inst = Instant::now();
        let raw = self.landmarker.detect(frame, timestamp_ms)?;
        let inference_time = start_inst.elapsed().as_secs_f64() * 1000.0;

        Ok(PoseDetectionResult {
            poses: apply_thresholds(raw, &self.options),
            input_image_width: frame.width(),
            input_image_height: frame.height(),
            inference_time,
        })
    }
}

/// Drops low-confidence poses, keeps the best `num_poses`, hides landmarks
/// below the presence threshold and strips masks unless requested.
fn apply_thresholds(poses: Vec<Pose>, options: &DetectorOptions) -> Vec<Pose> {
    let mut kept: Vec<Pose> = poses
        .into_iter()
        .filter(|p| p.score >= options.min_pose_detection_confidence)
        .collect();

    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.truncate(options.num_poses as usize);

    for pose in &mut kept {
        for landmark in &mut pose.landmarks {
            if landmark.presence < options.min_pose_presence_confidence {
                landmark.visibility = 0.0;
            }
        }
        if !options.should_output_segmentation_masks {
            pose.segmentation_mask = None;
        }
    }

    kept
}

/// Factory used when no inference backend is compiled in.
pub struct UnavailableFactory;

impl LandmarkerFactory for UnavailableFactory {
    fn create(
        &self,
        _options: &DetectorOptions,
        _mode: RunningMode,
    ) -> PoseResult<Box<dyn PoseLandmarker>> {
        Err(PoseError::DetectorInit(
            "no inference backend compiled in (enable the `usls` feature)".to_string(),
        ))
    }
}

/// Default factory for this build.
pub fn default_factory() -> Box<dyn LandmarkerFactory> {
    #[cfg(feature = "usls")]
    {
        Box::new(crate::pipeline::usls_landmarker::UslsFactory)
    }
    #[cfg(not(feature = "usls"))]
    {
        Box::new(UnavailableFactory)
    }
}
