// Live-stream event channel.
//
// Live-stream detectors publish their results and errors here. At most one
// consumer is subscribed at a time; events published while nobody listens
// are buffered until the next consumer arrives.

use crate::error::PoseError;
use crate::pipeline::types::PoseDetectionResult;
use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DetectionEvent {
    #[serde(rename = "onResults", rename_all = "camelCase")]
    Results {
        handle: u32,
        timestamp_ms: u64,
        #[serde(flatten)]
        result: PoseDetectionResult,
    },
    #[serde(rename = "onError")]
    Error {
        handle: u32,
        code: String,
        message: String,
    },
}

impl DetectionEvent {
    pub fn error(handle: u32, err: &PoseError) -> Self {
        DetectionEvent::Error {
            handle,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DetectionEvent::Results { .. } => "onResults",
            DetectionEvent::Error { .. } => "onError",
        }
    }
}

type ReceiverSlot = Arc<Mutex<Option<Receiver<DetectionEvent>>>>;

pub struct EventChannel {
    tx: Sender<DetectionEvent>,
    rx: ReceiverSlot,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannel {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    /// Queues an event. The channel owns the receiving end whenever no
    /// consumer is subscribed, so this never drops events.
    pub fn publish(&self, event: DetectionEvent) {
        tracing::debug!("Publishing {} event", event.name());
        if self.tx.send(event).is_err() {
            tracing::warn!("Event receiver lost, dropping event");
        }
    }

    /// Hands out the receiver. Returns `None` while another subscription is
    /// alive.
    pub fn subscribe(&self) -> Option<Subscription> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        tracing::info!("Event consumer subscribed");
        Some(Subscription {
            rx,
            slot: self.rx.clone(),
        })
    }
}

/// The single live consumer of an [`EventChannel`]. Dropping it gives the
/// receiver back so a later consumer can subscribe.
pub struct Subscription {
    rx: Receiver<DetectionEvent>,
    slot: ReceiverSlot,
}

impl Deref for Subscription {
    type Target = Receiver<DetectionEvent>;

    fn deref(&self) -> &Self::Target {
        &self.rx
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(self.rx.clone());
        tracing::info!("Event consumer unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_consumer() {
        let events = EventChannel::new();
        let rx = events.subscribe().unwrap();
        assert!(events.subscribe().is_none());

        events.publish(DetectionEvent::error(3, &PoseError::UnknownHandle(3)));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), "onError");
    }

    #[test]
    fn test_events_buffered_until_subscribe() {
        let events = EventChannel::new();
        events.publish(DetectionEvent::error(1, &PoseError::Inference("x".into())));
        events.publish(DetectionEvent::error(2, &PoseError::Inference("y".into())));

        let rx = events.subscribe().unwrap();
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_resubscribe_after_consumer_dropped() {
        let events = EventChannel::new();
        let first = events.subscribe().unwrap();
        drop(first);

        events.publish(DetectionEvent::error(1, &PoseError::Inference("x".into())));
        let second = events.subscribe().expect("receiver handed back on drop");
        assert!(events.subscribe().is_none());

        match second.try_recv().unwrap() {
            DetectionEvent::Error { handle, .. } => assert_eq!(handle, 1),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_wire_shape() {
        let event = DetectionEvent::Results {
            handle: 22,
            timestamp_ms: 40,
            result: PoseDetectionResult {
                poses: Vec::new(),
                input_image_width: 10,
                input_image_height: 20,
                inference_time: 1.0,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "onResults");
        assert_eq!(json["handle"], 22);
        assert_eq!(json["timestampMs"], 40);
        assert_eq!(json["inputImageHeight"], 20);

        let json = serde_json::to_value(DetectionEvent::error(
            5,
            &PoseError::TimestampOrder { last: 9, got: 1 },
        ))
        .unwrap();
        assert_eq!(json["event"], "onError");
        assert_eq!(json["code"], "E_INFERENCE_ERROR");
    }
}
