use serde::{Deserialize, Serialize};

/// A landmark in normalized image coordinates [0, 1]; `z` is depth relative to the hips.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
    pub presence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility: confidence,
            presence: confidence,
        }
    }
}

/// Normalized bounding box
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Per-pixel body confidence, row-major.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

/// A detected body skeleton.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pose {
    pub landmarks: Vec<Landmark>,
    #[serde(default)]
    pub world_landmarks: Vec<Landmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_mask: Option<SegmentationMask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BBox>,
    pub score: f32,
}

impl Pose {
    /// Builds a pose from raw landmarks, deriving its score and bounds.
    pub fn from_landmarks(landmarks: Vec<Landmark>) -> Self {
        let score = if landmarks.is_empty() {
            0.0
        } else {
            landmarks.iter().map(|l| l.presence).sum::<f32>() / landmarks.len() as f32
        };
        let bounds = crate::pipeline::geometry::landmark_bounds(&landmarks);
        Self {
            landmarks,
            world_landmarks: Vec::new(),
            segmentation_mask: None,
            bounds,
            score,
        }
    }
}

/// Successful detection on one image.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoseDetectionResult {
    #[serde(rename = "results")]
    pub poses: Vec<Pose>,
    pub input_image_width: u32,
    pub input_image_height: u32,
    /// Milliseconds spent in inference.
    pub inference_time: f64,
}

/// Success or failure of one sampled frame, never both.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum DetectionOutcome {
    Detected(PoseDetectionResult),
    Failed { error: String },
}

impl DetectionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, DetectionOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DetectionOutcome::Failed { error } => Some(error),
            DetectionOutcome::Detected(_) => None,
        }
    }

    pub fn poses(&self) -> Option<&[Pose]> {
        match self {
            DetectionOutcome::Detected(result) => Some(&result.poses),
            DetectionOutcome::Failed { .. } => None,
        }
    }
}

/// Result for one sampled timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    pub frame_index: usize,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub outcome: DetectionOutcome,
}

/// One record per sampled timestamp, in sampling order.
pub type BatchResult = Vec<FrameRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_record_wire_shape() {
        let record = FrameRecord {
            frame_index: 4,
            timestamp_ms: 133,
            outcome: DetectionOutcome::Failed {
                error: "corrupt frame".to_string(),
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"frameIndex": 4, "timestampMs": 133, "error": "corrupt frame"})
        );
    }

    #[test]
    fn test_detected_record_wire_shape() {
        let record = FrameRecord {
            frame_index: 0,
            timestamp_ms: 0,
            outcome: DetectionOutcome::Detected(PoseDetectionResult {
                poses: vec![Pose::from_landmarks(vec![
                    Landmark::new(0.2, 0.4, 0.9),
                    Landmark::new(0.6, 0.8, 0.7),
                ])],
                input_image_width: 640,
                input_image_height: 480,
                inference_time: 12.5,
            }),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["frameIndex"], 0);
        assert_eq!(json["inputImageWidth"], 640);
        assert_eq!(json["inferenceTime"], 12.5);
        assert_eq!(json["results"][0]["landmarks"][1]["y"].as_f64().unwrap() as f32, 0.8);
        assert!(json.get("error").is_none());
        assert!(json["results"][0].get("segmentationMask").is_none());

        let parsed: FrameRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_pose_score_is_mean_presence() {
        let pose = Pose::from_landmarks(vec![
            Landmark::new(0.0, 0.0, 1.0),
            Landmark::new(1.0, 1.0, 0.5),
        ]);
        assert!((pose.score - 0.75).abs() < 1e-6);
        assert_eq!(Pose::from_landmarks(Vec::new()).score, 0.0);
    }
}
