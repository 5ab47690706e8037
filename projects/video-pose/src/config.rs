use crate::error::{PoseError, PoseResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_FPS: f64 = 30.0;
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Hardware backend preference for inference.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(try_from = "i64", into = "i64")]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

impl TryFrom<i64> for Delegate {
    type Error = PoseError;

    fn try_from(raw: i64) -> PoseResult<Self> {
        match raw {
            0 => Ok(Delegate::Cpu),
            1 => Ok(Delegate::Gpu),
            other => Err(PoseError::Configuration(format!(
                "Unknown delegate: {}",
                other
            ))),
        }
    }
}

impl From<Delegate> for i64 {
    fn from(delegate: Delegate) -> Self {
        match delegate {
            Delegate::Cpu => 0,
            Delegate::Gpu => 1,
        }
    }
}

/// Operating mode of a detector instance.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunningMode {
    Image,
    Video,
    LiveStream,
}

impl RunningMode {
    pub fn from_raw(raw: i64) -> PoseResult<Self> {
        match raw {
            0 => Ok(RunningMode::Image),
            1 => Ok(RunningMode::Video),
            2 => Ok(RunningMode::LiveStream),
            other => Err(PoseError::InvalidRunningMode(other)),
        }
    }

    /// Video and live-stream detectors keep state between calls and need
    /// non-decreasing timestamps.
    pub fn is_streaming(&self) -> bool {
        !matches!(self, RunningMode::Image)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunningMode::Image => "image",
            RunningMode::Video => "video",
            RunningMode::LiveStream => "live stream",
        }
    }
}

fn default_num_poses() -> u32 {
    1
}

fn default_confidence() -> f32 {
    DEFAULT_CONFIDENCE
}

/// Options recognized when creating a detector.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectorOptions {
    #[serde(default = "default_num_poses")]
    pub num_poses: u32,
    #[serde(default = "default_confidence")]
    pub min_pose_detection_confidence: f32,
    #[serde(default = "default_confidence")]
    pub min_pose_presence_confidence: f32,
    /// Only meaningful for backends that track poses across frames. The
    /// bundled RTMO backend is stateless and ignores it.
    #[serde(default = "default_confidence")]
    pub min_tracking_confidence: f32,
    #[serde(default)]
    pub should_output_segmentation_masks: bool,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub delegate: Delegate,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            num_poses: default_num_poses(),
            min_pose_detection_confidence: DEFAULT_CONFIDENCE,
            min_pose_presence_confidence: DEFAULT_CONFIDENCE,
            min_tracking_confidence: DEFAULT_CONFIDENCE,
            should_output_segmentation_masks: false,
            model: String::new(),
            delegate: Delegate::Cpu,
        }
    }
}

impl DetectorOptions {
    pub fn validate(&self) -> PoseResult<()> {
        if self.num_poses < 1 {
            return Err(PoseError::Configuration(
                "numPoses must be at least 1".to_string(),
            ));
        }

        let confidences = [
            ("minPoseDetectionConfidence", self.min_pose_detection_confidence),
            ("minPosePresenceConfidence", self.min_pose_presence_confidence),
            ("minTrackingConfidence", self.min_tracking_confidence),
        ];
        for (name, value) in confidences {
            if !(0.0..=1.0).contains(&value) {
                return Err(PoseError::Configuration(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }

    /// Wire names of options set away from their defaults that a stateless
    /// backend without segmentation output cannot honor.
    #[cfg_attr(not(feature = "usls"), allow(dead_code))]
    pub fn ignored_by_stateless_backend(&self) -> Vec<&'static str> {
        let mut ignored = Vec::new();
        if self.min_tracking_confidence != DEFAULT_CONFIDENCE {
            ignored.push("minTrackingConfidence");
        }
        if self.should_output_segmentation_masks {
            ignored.push("shouldOutputSegmentationMasks");
        }
        ignored
    }
}

/// Falls back to the default rate for missing, zero, negative or NaN input.
pub fn effective_fps(fps: Option<f64>) -> f64 {
    match fps {
        Some(f) if f > 0.0 => f,
        _ => DEFAULT_SAMPLE_FPS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults_from_empty_json() {
        let options: DetectorOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, DetectorOptions::default());
        assert_eq!(options.min_tracking_confidence, 0.5);
        assert!(!options.should_output_segmentation_masks);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_camel_case_and_delegate() {
        let options: DetectorOptions = serde_json::from_str(
            r#"{"numPoses": 3, "minPoseDetectionConfidence": 0.7, "delegate": 1, "model": "pose.onnx"}"#,
        )
        .unwrap();
        assert_eq!(options.num_poses, 3);
        assert_eq!(options.min_pose_detection_confidence, 0.7);
        assert_eq!(options.delegate, Delegate::Gpu);
        assert_eq!(options.model, "pose.onnx");

        let bad = serde_json::from_str::<DetectorOptions>(r#"{"delegate": 5}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let options = DetectorOptions {
            num_poses: 0,
            ..DetectorOptions::default()
        };
        assert!(options.validate().unwrap_err().is_configuration());

        let options = DetectorOptions {
            min_pose_presence_confidence: 1.5,
            ..DetectorOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_ignored_by_stateless_backend() {
        assert!(DetectorOptions::default()
            .ignored_by_stateless_backend()
            .is_empty());

        let options = DetectorOptions {
            min_tracking_confidence: 0.8,
            should_output_segmentation_masks: true,
            ..DetectorOptions::default()
        };
        assert_eq!(
            options.ignored_by_stateless_backend(),
            vec!["minTrackingConfidence", "shouldOutputSegmentationMasks"]
        );
    }

    #[test]
    fn test_running_mode_raw_values() {
        assert_eq!(RunningMode::from_raw(0).unwrap(), RunningMode::Image);
        assert_eq!(RunningMode::from_raw(1).unwrap(), RunningMode::Video);
        assert_eq!(RunningMode::from_raw(2).unwrap(), RunningMode::LiveStream);
        let err = RunningMode::from_raw(3).unwrap_err();
        assert_eq!(err.code(), "E_MODE_ERROR");
        assert!(RunningMode::Video.is_streaming());
        assert!(!RunningMode::Image.is_streaming());
    }

    #[test]
    fn test_effective_fps() {
        assert_eq!(effective_fps(None), 30.0);
        assert_eq!(effective_fps(Some(0.0)), 30.0);
        assert_eq!(effective_fps(Some(-2.0)), 30.0);
        assert_eq!(effective_fps(Some(f64::NAN)), 30.0);
        assert_eq!(effective_fps(Some(12.5)), 12.5);
    }
}
