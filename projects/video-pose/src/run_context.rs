// Run artifacts for video batches.
//
// Every video batch gets a directory under the output root holding
// metadata.json, results.json (the full batch result) and frames.csv (one
// summary row per sampled frame).

use crate::pipeline::batch::BatchSummary;
use crate::pipeline::types::FrameRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv"];

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunMetadata {
    pub run_id: String,
    pub video_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub fps: f64,
    #[serde(default)]
    pub frames: usize,
    #[serde(default)]
    pub failed_frames: usize,
    #[serde(skip)]
    pub output_dir: PathBuf,
}

#[derive(Serialize)]
struct FrameRow<'a> {
    frame_index: usize,
    timestamp_ms: u64,
    poses: usize,
    error: &'a str,
}

pub fn list_videos(video_root: &Path) -> Vec<PathBuf> {
    WalkDir::new(video_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| VIDEO_EXTENSIONS.contains(&s.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Creates the output directory for a new run of `video_path`.
pub fn create_run(output_root: &Path, video_path: &Path, fps: f64) -> Result<RunMetadata> {
    let stem = video_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid video name: {}", video_path.display()))?;

    let created_at = Utc::now();
    let run_id = format!("{}-{}", stem, created_at.format("%Y%m%d-%H%M%S%3f"));
    let output_dir = output_root.join(&run_id);
    if output_dir.exists() {
        return Err(anyhow::anyhow!(
            "Output directory already exists for: {}",
            run_id
        ));
    }

    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let metadata = RunMetadata {
        run_id,
        video_path: video_path.to_path_buf(),
        created_at,
        fps,
        frames: 0,
        failed_frames: 0,
        output_dir,
    };
    write_metadata(&metadata)?;

    Ok(metadata)
}

fn write_metadata(metadata: &RunMetadata) -> Result<()> {
    let metadata_path = metadata.output_dir.join("metadata.json");
    let content = serde_json::to_string_pretty(metadata)?;
    fs::write(metadata_path, content)?;
    Ok(())
}

/// Writes results.json and frames.csv and updates the run's frame counts.
pub fn save_batch_result(metadata: &mut RunMetadata, result: &[FrameRecord]) -> Result<()> {
    let results_path = metadata.output_dir.join("results.json");
    fs::write(&results_path, serde_json::to_string_pretty(result)?)
        .with_context(|| format!("Failed to write {}", results_path.display()))?;

    let csv_path = metadata.output_dir.join("frames.csv");
    let mut writer = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;
    for record in result {
        writer.serialize(FrameRow {
            frame_index: record.frame_index,
            timestamp_ms: record.timestamp_ms,
            poses: record.outcome.poses().map(|p| p.len()).unwrap_or(0),
            error: record.outcome.error().unwrap_or(""),
        })?;
    }
    writer.flush()?;

    let summary = BatchSummary::of(result);
    metadata.frames = summary.frames;
    metadata.failed_frames = summary.failed;
    write_metadata(metadata)
}

pub fn load_batch_result(metadata: &RunMetadata) -> Result<Vec<FrameRecord>> {
    let content = fs::read_to_string(metadata.output_dir.join("results.json"))?;
    Ok(serde_json::from_str(&content)?)
}

fn read_metadata(metadata_path: &Path) -> Result<RunMetadata> {
    let content = fs::read_to_string(metadata_path)?;
    serde_json::from_str(&content).with_context(|| format!("Invalid {}", metadata_path.display()))
}

pub fn list_runs(output_root: &Path) -> Result<Vec<RunMetadata>> {
    let mut outputs = Vec::new();

    if !output_root.exists() {
        return Ok(outputs);
    }

    for entry in fs::read_dir(output_root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let metadata_path = path.join("metadata.json");
        if !metadata_path.exists() {
            continue;
        }
        // One damaged run must not hide the others.
        match read_metadata(&metadata_path) {
            Ok(mut metadata) => {
                metadata.output_dir = path;
                outputs.push(metadata);
            }
            Err(e) => tracing::warn!("Skipping run {}: {:#}", path.display(), e),
        }
    }

    outputs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{DetectionOutcome, PoseDetectionResult};

    fn sample_result() -> Vec<FrameRecord> {
        vec![
            FrameRecord {
                frame_index: 0,
                timestamp_ms: 0,
                outcome: DetectionOutcome::Detected(PoseDetectionResult {
                    poses: Vec::new(),
                    input_image_width: 4,
                    input_image_height: 4,
                    inference_time: 2.0,
                }),
            },
            FrameRecord {
                frame_index: 1,
                timestamp_ms: 500,
                outcome: DetectionOutcome::Failed {
                    error: "bad, frame".to_string(),
                },
            },
        ]
    }

    #[test]
    fn test_list_videos_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.mp4"), b"").unwrap();
        fs::write(dir.path().join("nested/b.MOV"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let mut videos = list_videos(dir.path());
        videos.sort();
        assert_eq!(videos.len(), 2);
        assert!(videos[0].ends_with("a.mp4"));
    }

    #[test]
    fn test_run_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut metadata = create_run(dir.path(), Path::new("/videos/squat.mp4"), 10.0).unwrap();
        assert!(metadata.run_id.starts_with("squat-"));
        assert!(metadata.output_dir.join("metadata.json").exists());

        let result = sample_result();
        save_batch_result(&mut metadata, &result).unwrap();

        let runs = list_runs(dir.path()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].frames, 2);
        assert_eq!(runs[0].failed_frames, 1);
        assert_eq!(runs[0].output_dir, metadata.output_dir);
        assert_eq!(load_batch_result(&runs[0]).unwrap(), result);

        let csv = fs::read_to_string(metadata.output_dir.join("frames.csv")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("frame_index,timestamp_ms,poses,error"));
        assert_eq!(lines.next(), Some("0,0,0,"));
        assert_eq!(lines.next(), Some("1,500,0,\"bad, frame\""));
    }

    #[test]
    fn test_list_runs_skips_damaged_metadata() {
        let dir = tempfile::tempdir().unwrap();
        create_run(dir.path(), Path::new("/videos/lunge.mp4"), 30.0).unwrap();
        let broken = dir.path().join("broken-run");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("metadata.json"), b"{not json").unwrap();

        let runs = list_runs(dir.path()).unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].run_id.starts_with("lunge-"));
    }

    #[test]
    fn test_list_runs_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_runs(&dir.path().join("missing")).unwrap().is_empty());
    }
}
