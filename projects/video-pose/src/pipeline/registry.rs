use crate::config::{DetectorOptions, RunningMode};
use crate::error::{PoseError, PoseResult};
use crate::pipeline::detection::{LandmarkerFactory, PoseDetector};
use crate::pipeline::events::{DetectionEvent, EventChannel};
use crate::pipeline::types::PoseDetectionResult;
use crate::video::DecodedFrame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// First handle handed out by a fresh registry.
pub const FIRST_HANDLE: u32 = 22;

type SharedDetector = Arc<Mutex<PoseDetector>>;

/// Detectors created through the bridge, keyed by handle.
///
/// Each detector sits behind its own mutex so calls on one handle are
/// serialized while different handles run in parallel. Video batches never
/// use registry detectors; they build their own.
pub struct DetectorRegistry {
    factory: Arc<dyn LandmarkerFactory>,
    events: Arc<EventChannel>,
    next_handle: AtomicU32,
    detectors: Mutex<HashMap<u32, SharedDetector>>,
}

impl DetectorRegistry {
    pub fn new(factory: Arc<dyn LandmarkerFactory>, events: Arc<EventChannel>) -> Self {
        Self {
            factory,
            events,
            next_handle: AtomicU32::new(FIRST_HANDLE),
            detectors: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &dyn LandmarkerFactory {
        self.factory.as_ref()
    }

    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    /// Creates a detector and returns its handle.
    pub fn create(&self, options: DetectorOptions, running_mode: i64) -> PoseResult<u32> {
        let mode = RunningMode::from_raw(running_mode)?;
        let detector = PoseDetector::create(self.factory.as_ref(), options, mode)?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let active = {
            let mut detectors = self.detectors.lock().unwrap_or_else(PoisonError::into_inner);
            detectors.insert(handle, Arc::new(Mutex::new(detector)));
            detectors.len()
        };

        tracing::info!(
            "Registered {} detector with handle {} ({} active)",
            mode.name(),
            handle,
            active
        );
        Ok(handle)
    }

    pub fn get(&self, handle: u32) -> PoseResult<SharedDetector> {
        self.detectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or(PoseError::UnknownHandle(handle))
    }

    /// Removes a detector. Returns false if the handle was unknown.
    ///
    /// A call already running on the detector keeps its own reference and
    /// finishes normally.
    pub fn release(&self, handle: u32) -> bool {
        let removed = self
            .detectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .is_some();
        if removed {
            tracing::info!("Released detector {} ({} active)", handle, self.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.detectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs detection with an image- or video-mode detector and returns the result.
    pub fn detect(
        &self,
        handle: u32,
        frame: &DecodedFrame,
        timestamp_ms: u64,
    ) -> PoseResult<PoseDetectionResult> {
        let detector = self.get(handle)?;
        let mut detector = detector.lock().unwrap_or_else(PoisonError::into_inner);
        if detector.mode() == RunningMode::LiveStream {
            return Err(PoseError::WrongRunningMode {
                handle,
                expected: "image or video",
            });
        }
        detector.detect(frame, timestamp_ms)
    }

    /// Feeds a frame to a live-stream detector. The outcome is published on
    /// the event channel rather than returned.
    pub fn detect_live(
        &self,
        handle: u32,
        frame: &DecodedFrame,
        timestamp_ms: u64,
    ) -> PoseResult<()> {
        let detector = self.get(handle)?;
        let mut detector = detector.lock().unwrap_or_else(PoisonError::into_inner);
        if detector.mode() != RunningMode::LiveStream {
            return Err(PoseError::WrongRunningMode {
                handle,
                expected: RunningMode::LiveStream.name(),
            });
        }

        let event = match detector.detect(frame, timestamp_ms) {
            Ok(result) => DetectionEvent::Results {
                handle,
                timestamp_ms,
                result,
            },
            Err(e) => {
                tracing::warn!("Live-stream detection failed on {}: {}", handle, e);
                DetectionEvent::error(handle, &e)
            }
        };
        self.events.publish(event);
        Ok(())
    }
}

/// One-shot detection on a still image with a throwaway image-mode detector.
pub fn detect_on_image(
    factory: &dyn LandmarkerFactory,
    frame: &DecodedFrame,
    options: DetectorOptions,
) -> PoseResult<PoseDetectionResult> {
    let mut detector = PoseDetector::create(factory, options, RunningMode::Image)?;
    detector.detect(frame, 0)
}
