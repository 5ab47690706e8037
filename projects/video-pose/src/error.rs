// Error taxonomy for detector creation, batch runs and per-frame failures.
//
// Configuration and fatal errors abort a call and surface as one code/message
// pair. Decode, inference and timestamp-order errors are per frame and end up
// folded into a `FrameRecord` instead of being propagated.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("Invalid running mode")]
    InvalidRunningMode(i64),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to open video: {0}")]
    FatalOpen(String),

    #[error("Failed to create detector: {0}")]
    DetectorInit(String),

    #[error("Failed to decode frame at {timestamp_ms}ms: {message}")]
    Decode { timestamp_ms: u64, message: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Timestamp {got}ms is earlier than previous timestamp {last}ms")]
    TimestampOrder { last: u64, got: u64 },

    #[error("No detector registered for handle {0}")]
    UnknownHandle(u32),

    #[error("Detector {handle} is not in {expected} mode")]
    WrongRunningMode {
        handle: u32,
        expected: &'static str,
    },
}

impl PoseError {
    /// Stable code reported next to the message when a call fails.
    pub fn code(&self) -> &'static str {
        match self {
            PoseError::InvalidRunningMode(_) => "E_MODE_ERROR",
            PoseError::Configuration(_) => "E_CONFIG_ERROR",
            PoseError::FatalOpen(_) => "E_OPEN_ERROR",
            PoseError::DetectorInit(_) => "E_DETECTOR_ERROR",
            PoseError::Decode { .. } => "E_DECODE_ERROR",
            PoseError::Inference(_) | PoseError::TimestampOrder { .. } => "E_INFERENCE_ERROR",
            PoseError::UnknownHandle(_) | PoseError::WrongRunningMode { .. } => "E_HANDLE_ERROR",
        }
    }

    /// True for errors raised before any work started.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PoseError::InvalidRunningMode(_) | PoseError::Configuration(_)
        )
    }

    pub fn to_failure(&self) -> CallFailure {
        CallFailure {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

pub type PoseResult<T> = Result<T, PoseError>;

/// The single code/message pair a failed call reports.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallFailure {
    pub code: String,
    pub message: String,
}
