use crate::config::{Delegate, DetectorOptions};
use crate::video::VideoBackend;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the detector bridge over HTTP
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to bind to
        #[arg(long, default_value_t = 12206)]
        port: u16,

        /// Root directory for video files
        #[arg(long, env = "VIDEO_POSE_VIDEO_ROOT")]
        video_root: PathBuf,

        /// Root directory for output artifacts
        #[arg(long, env = "VIDEO_POSE_OUTPUT_ROOT")]
        output_root: PathBuf,

        /// Decoder used to open videos
        #[arg(long, value_enum, env = "VIDEO_POSE_BACKEND", default_value_t = VideoBackend::Opencv)]
        backend: VideoBackend,
    },

    /// Run pose detection over a whole video and print the batch result
    DetectVideo {
        video: PathBuf,

        /// Sampling rate in frames per second
        #[arg(long)]
        fps: Option<f64>,

        #[command(flatten)]
        options: OptionArgs,

        #[arg(long, value_enum, env = "VIDEO_POSE_BACKEND", default_value_t = VideoBackend::Opencv)]
        backend: VideoBackend,

        /// Also save the run under this directory
        #[arg(long, env = "VIDEO_POSE_OUTPUT_ROOT")]
        output_root: Option<PathBuf>,
    },

    /// Run pose detection on a single image
    DetectImage {
        image: PathBuf,

        #[command(flatten)]
        options: OptionArgs,
    },
}

/// Detector options accepted on the command line.
#[derive(clap::Args, Debug, Clone)]
pub struct OptionArgs {
    #[arg(long, default_value_t = 1)]
    pub num_poses: u32,

    #[arg(long, default_value_t = 0.5)]
    pub min_pose_detection_confidence: f32,

    #[arg(long, default_value_t = 0.5)]
    pub min_pose_presence_confidence: f32,

    #[arg(long, default_value_t = 0.5)]
    pub min_tracking_confidence: f32,

    #[arg(long)]
    pub segmentation_masks: bool,

    /// Path to the pose model file
    #[arg(long, env = "VIDEO_POSE_MODEL", default_value = "")]
    pub model: String,

    #[arg(long, value_enum, default_value_t = Delegate::Cpu)]
    pub delegate: Delegate,
}

impl From<OptionArgs> for DetectorOptions {
    fn from(args: OptionArgs) -> Self {
        DetectorOptions {
            num_poses: args.num_poses,
            min_pose_detection_confidence: args.min_pose_detection_confidence,
            min_pose_presence_confidence: args.min_pose_presence_confidence,
            min_tracking_confidence: args.min_tracking_confidence,
            should_output_segmentation_masks: args.segmentation_masks,
            model: args.model,
            delegate: args.delegate,
        }
    }
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_video_args() {
        let args = Args::try_parse_from([
            "video-pose",
            "detect-video",
            "clip.mp4",
            "--fps",
            "10",
            "--num-poses",
            "2",
            "--delegate",
            "gpu",
            "--backend",
            "ffmpeg",
        ])
        .unwrap();

        match args.command {
            Command::DetectVideo {
                video,
                fps,
                options,
                backend,
                ..
            } => {
                assert_eq!(video, PathBuf::from("clip.mp4"));
                assert_eq!(fps, Some(10.0));
                assert_eq!(backend, VideoBackend::Ffmpeg);
                let options = DetectorOptions::from(options);
                assert_eq!(options.num_poses, 2);
                assert_eq!(options.delegate, Delegate::Gpu);
                assert_eq!(options.min_tracking_confidence, 0.5);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_detect_image_defaults() {
        let args = Args::try_parse_from(["video-pose", "detect-image", "still.png"]).unwrap();
        match args.command {
            Command::DetectImage { image, options } => {
                assert_eq!(image, PathBuf::from("still.png"));
                let options = DetectorOptions::from(options);
                assert!(!options.should_output_segmentation_masks);
                assert!(options.validate().is_ok());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
