// Video batch runner: samples a video at a fixed rate and runs pose detection
// on every sampled frame.
//
// Per-frame decode and inference failures are folded into the result as
// failure records; only opening the video, an invalid configuration or
// failing to create the detector aborts the whole call.

use crate::config::{effective_fps, DetectorOptions, RunningMode};
use crate::error::PoseResult;
use crate::pipeline::detection::{LandmarkerFactory, PoseDetector};
use crate::pipeline::types::{BatchResult, DetectionOutcome, FrameRecord};
use crate::video::sampler::generate_timestamps;
use crate::video::{FrameSource, VideoOpener};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Instant;

/// Receives every record as soon as it is produced.
pub trait BatchObserver {
    fn on_record(&mut self, record: &FrameRecord, total: usize);
}

/// Blanket implementation so any closure with the right signature
/// automatically implements BatchObserver.
impl<F> BatchObserver for F
where
    F: FnMut(&FrameRecord, usize),
{
    fn on_record(&mut self, record: &FrameRecord, total: usize) {
        self(record, total)
    }
}

/// Observer that ignores progress.
pub fn no_progress(_: &FrameRecord, _: usize) {}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VideoBatchRequest {
    pub video_path: PathBuf,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub options: DetectorOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub frames: usize,
    pub detected: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn of(result: &[FrameRecord]) -> Self {
        let failed = result.iter().filter(|r| r.outcome.is_failure()).count();
        Self {
            frames: result.len(),
            detected: result.len() - failed,
            failed,
        }
    }
}

/// Opens the requested video and runs a full batch over it.
pub fn detect_pose_on_video<O: BatchObserver>(
    opener: &dyn VideoOpener,
    factory: &dyn LandmarkerFactory,
    request: &VideoBatchRequest,
    observer: O,
) -> PoseResult<BatchResult> {
    request.options.validate()?;

    let mut source = opener.open(&request.video_path)?;
    tracing::info!(
        "Opened {} for pose detection ({:.2}s)",
        request.video_path.display(),
        source.duration_secs()
    );

    run_batch(
        source.as_mut(),
        factory,
        &request.options,
        effective_fps(request.fps),
        observer,
    )
}

/// Runs detection over every sampled timestamp of an opened video.
///
/// The returned result holds exactly one record per sampled timestamp, in
/// sampling order.
pub fn run_batch<O: BatchObserver>(
    source: &mut dyn FrameSource,
    factory: &dyn LandmarkerFactory,
    options: &DetectorOptions,
    fps: f64,
    mut observer: O,
) -> PoseResult<BatchResult> {
    let timestamps = generate_timestamps(source.duration_secs(), fps)?;
    let total = timestamps.len();

    // One detector for the whole batch; timestamps are generated in increasing
    // order, which is what video mode requires.
    let mut detector = PoseDetector::create(factory, options.clone(), RunningMode::Video)?;

    let start_time = Instant::now();
    let mut results = Vec::with_capacity(total);

    for (frame_index, &timestamp_ms) in timestamps.iter().enumerate() {
        let outcome = detect_frame(source, &mut detector, timestamp_ms);
        if let Some(error) = outcome.error() {
            tracing::warn!(
                "Frame {} ({}ms) failed: {}",
                frame_index,
                timestamp_ms,
                error
            );
        } else {
            tracing::debug!("Frame {} ({}ms) processed", frame_index, timestamp_ms);
        }

        let record = FrameRecord {
            frame_index,
            timestamp_ms,
            outcome,
        };
        observer.on_record(&record, total);
        results.push(record);
    }

    let summary = BatchSummary::of(&results);
    tracing::info!(
        "Batch finished: {} frames, {} detected, {} failed in {:.2}s",
        summary.frames,
        summary.detected,
        summary.failed,
        start_time.elapsed().as_secs_f64()
    );

    Ok(results)
}

/// Decodes and runs inference on one timestamp. The frame is dropped before
/// returning, so at most one decoded frame is alive at a time.
fn detect_frame(
    source: &mut dyn FrameSource,
    detector: &mut PoseDetector,
    timestamp_ms: u64,
) -> DetectionOutcome {
    let frame = match source.decode_at(timestamp_ms) {
        Ok(frame) => frame,
        Err(e) => {
            return DetectionOutcome::Failed {
                error: e.to_string(),
            }
        }
    };

    match detector.detect(&frame, timestamp_ms) {
        Ok(result) => DetectionOutcome::Detected(result),
        Err(e) => DetectionOutcome::Failed {
            error: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoseError;
    use crate::pipeline::detection::PoseLandmarker;
    use crate::pipeline::types::{Landmark, Pose};
    use crate::video::DecodedFrame;
    use image::RgbImage;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// In-memory video that fails to decode at selected timestamps.
    struct FakeVideo {
        duration_secs: f64,
        failing: HashSet<u64>,
        decoded: Arc<Mutex<Vec<u64>>>,
    }

    impl FakeVideo {
        fn new(duration_secs: f64) -> Self {
            Self {
                duration_secs,
                failing: HashSet::new(),
                decoded: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl FrameSource for FakeVideo {
        fn duration_secs(&self) -> f64 {
            self.duration_secs
        }

        fn decode_at(&mut self, timestamp_ms: u64) -> PoseResult<DecodedFrame> {
            self.decoded.lock().unwrap().push(timestamp_ms);
            if self.failing.contains(&timestamp_ms) {
                return Err(PoseError::Decode {
                    timestamp_ms,
                    message: "corrupt frame".to_string(),
                });
            }
            Ok(DecodedFrame::new(RgbImage::new(16, 9)))
        }
    }

    /// Landmarker returning one pose per frame, zero poses or an error
    /// depending on the timestamp.
    struct FakeFactory {
        calls: Arc<Mutex<Vec<u64>>>,
        empty_at: Option<u64>,
        fail_at: Option<u64>,
        fail_create: bool,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                empty_at: None,
                fail_at: None,
                fail_create: false,
            }
        }
    }

    impl LandmarkerFactory for FakeFactory {
        fn create(
            &self,
            _options: &DetectorOptions,
            mode: RunningMode,
        ) -> PoseResult<Box<dyn PoseLandmarker>> {
            assert_eq!(mode, RunningMode::Video);
            if self.fail_create {
                return Err(PoseError::DetectorInit("model not found".to_string()));
            }
            let calls = self.calls.clone();
            let empty_at = self.empty_at;
            let fail_at = self.fail_at;
            Ok(Box::new(
                move |_: &DecodedFrame, ts: u64| -> PoseResult<Vec<Pose>> {
                    calls.lock().unwrap().push(ts);
                    if Some(ts) == fail_at {
                        return Err(PoseError::Inference("graph error".to_string()));
                    }
                    if Some(ts) == empty_at {
                        return Ok(Vec::new());
                    }
                    Ok(vec![Pose::from_landmarks(vec![
                        Landmark::new(0.2, 0.2, 0.9),
                        Landmark::new(0.8, 0.8, 0.9),
                    ])])
                },
            ))
        }
    }

    fn run(video: &mut FakeVideo, factory: &FakeFactory, fps: f64) -> PoseResult<BatchResult> {
        run_batch(video, factory, &DetectorOptions::default(), fps, no_progress)
    }

    #[test]
    fn test_two_seconds_at_one_fps() {
        let mut video = FakeVideo::new(2.0);
        let factory = FakeFactory::new();
        let result = run(&mut video, &factory, 1.0).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].timestamp_ms, 0);
        assert_eq!(result[1].timestamp_ms, 1000);
        assert_eq!(result[1].frame_index, 1);
        assert_eq!(result[0].outcome.poses().unwrap().len(), 1);
        assert_eq!(*factory.calls.lock().unwrap(), vec![0, 1000]);
    }

    #[test]
    fn test_result_length_matches_timestamps() {
        for (duration, fps) in [(1.0, 30.0), (2.5, 4.0), (0.3, 0.0), (7.0, 2.5)] {
            let mut video = FakeVideo::new(duration);
            let factory = FakeFactory::new();
            let result = run(&mut video, &factory, fps).unwrap();
            let expected = generate_timestamps(duration, fps).unwrap();

            assert_eq!(result.len(), expected.len());
            for (i, record) in result.iter().enumerate() {
                assert_eq!(record.frame_index, i);
                assert_eq!(record.timestamp_ms, expected[i]);
            }
        }
    }

    #[test]
    fn test_decode_failure_does_not_halt_batch() {
        let mut video = FakeVideo::new(3.0);
        video.failing.insert(1000);
        let factory = FakeFactory::new();
        let result = run(&mut video, &factory, 1.0).unwrap();

        assert_eq!(result.len(), 3);
        assert!(!result[0].outcome.is_failure());
        let error = result[1].outcome.error().unwrap();
        assert!(error.contains("corrupt frame"));
        assert_eq!(result[2].frame_index, 2);
        assert!(!result[2].outcome.is_failure());
        // The failed frame never reached the landmarker.
        assert_eq!(*factory.calls.lock().unwrap(), vec![0, 2000]);
    }

    #[test]
    fn test_inference_failure_is_recorded_inline() {
        let mut video = FakeVideo::new(3.0);
        let mut factory = FakeFactory::new();
        factory.fail_at = Some(0);
        let result = run(&mut video, &factory, 1.0).unwrap();

        assert_eq!(result.len(), 3);
        assert!(result[0].outcome.error().unwrap().contains("graph error"));
        assert!(!result[1].outcome.is_failure());
        assert!(!result[2].outcome.is_failure());
    }

    #[test]
    fn test_zero_poses_is_success() {
        let mut video = FakeVideo::new(2.0);
        let mut factory = FakeFactory::new();
        factory.empty_at = Some(1000);
        let result = run(&mut video, &factory, 1.0).unwrap();

        let poses = result[1].outcome.poses().expect("success outcome");
        assert!(poses.is_empty());
        match &result[1].outcome {
            DetectionOutcome::Detected(r) => {
                assert_eq!((r.input_image_width, r.input_image_height), (16, 9))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_zero_duration_never_calls_collaborators() {
        let mut video = FakeVideo::new(0.0);
        let decoded = video.decoded.clone();
        let factory = FakeFactory::new();
        let result = run(&mut video, &factory, 30.0).unwrap();

        assert!(result.is_empty());
        assert!(decoded.lock().unwrap().is_empty());
        assert!(factory.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_detector_creation_failure_is_fatal() {
        let mut video = FakeVideo::new(2.0);
        let mut factory = FakeFactory::new();
        factory.fail_create = true;
        let err = run(&mut video, &factory, 1.0).unwrap_err();

        assert_eq!(err.code(), "E_DETECTOR_ERROR");
        assert!(video.decoded.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_rate_is_rejected_before_work() {
        let mut video = FakeVideo::new(2.0);
        let factory = FakeFactory::new();
        let err = run(&mut video, &factory, 5000.0).unwrap_err();

        assert!(err.is_configuration());
        assert!(video.decoded.lock().unwrap().is_empty());
    }

    #[test]
    fn test_observer_sees_every_record_in_order() {
        let mut video = FakeVideo::new(1.0);
        let factory = FakeFactory::new();
        let mut seen = Vec::new();
        let result = run_batch(
            &mut video,
            &factory,
            &DetectorOptions::default(),
            10.0,
            |record: &FrameRecord, total: usize| seen.push((record.frame_index, total)),
        )
        .unwrap();

        assert_eq!(result.len(), 10);
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[0], (0, 10));
        assert_eq!(seen[9], (9, 10));
    }

    struct MissingOpener;

    impl VideoOpener for MissingOpener {
        fn open(&self, path: &Path) -> PoseResult<Box<dyn FrameSource>> {
            Err(PoseError::FatalOpen(path.display().to_string()))
        }
    }

    #[test]
    fn test_open_failure_is_fatal() {
        let factory = FakeFactory::new();
        let request = VideoBatchRequest {
            video_path: PathBuf::from("missing.mp4"),
            fps: None,
            options: DetectorOptions::default(),
        };
        let err = detect_pose_on_video(&MissingOpener, &factory, &request, no_progress)
            .unwrap_err();
        assert_eq!(err.code(), "E_OPEN_ERROR");
        assert!(factory.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let mut video = FakeVideo::new(3.0);
        video.failing.insert(2000);
        let factory = FakeFactory::new();
        let result = run(&mut video, &factory, 1.0).unwrap();
        assert_eq!(
            BatchSummary::of(&result),
            BatchSummary {
                frames: 3,
                detected: 2,
                failed: 1
            }
        );
    }
}
