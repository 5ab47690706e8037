mod cli;
mod config;
mod error;
mod pipeline;
mod run_context;
mod video;
mod web;

use anyhow::Result;
use cli::{Args, Command};
use config::DetectorOptions;
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::batch::{detect_pose_on_video, BatchSummary, VideoBatchRequest};
use pipeline::detection::default_factory;
use pipeline::events::EventChannel;
use pipeline::registry::{detect_on_image, DetectorRegistry};
use pipeline::types::FrameRecord;
use std::path::Path;
use std::sync::Arc;
use video::{DecodedFrame, VideoBackend};
use web::server::run_server;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    match args.command {
        Command::Serve {
            host,
            port,
            video_root,
            output_root,
            backend,
        } => {
            let registry = DetectorRegistry::new(
                Arc::from(default_factory()),
                Arc::new(EventChannel::new()),
            );
            let state = Arc::new(AppState {
                registry: Arc::new(registry),
                video_opener: Arc::new(backend),
                video_root,
                output_root,
            });
            run_server(host, port, state).await?;
        }
        Command::DetectVideo {
            video,
            fps,
            options,
            backend,
            output_root,
        } => {
            let request = VideoBatchRequest {
                video_path: video,
                fps,
                options: options.into(),
            };
            tokio::task::spawn_blocking(move || {
                detect_video(backend, request, output_root.as_deref())
            })
            .await??;
        }
        Command::DetectImage { image, options } => {
            tokio::task::spawn_blocking(move || detect_image(&image, options.into())).await??;
        }
    }

    Ok(())
}

fn detect_video(
    backend: VideoBackend,
    request: VideoBatchRequest,
    output_root: Option<&Path>,
) -> Result<()> {
    let factory = default_factory();

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})")?
            .progress_chars("#>-"),
    );

    let result = detect_pose_on_video(
        &backend,
        factory.as_ref(),
        &request,
        |record: &FrameRecord, total: usize| {
            pb.set_length(total as u64);
            pb.set_position(record.frame_index as u64 + 1);
        },
    )?;
    pb.finish_and_clear();

    let summary = BatchSummary::of(&result);
    tracing::info!(
        "Processed {} frames ({} detected, {} failed)",
        summary.frames,
        summary.detected,
        summary.failed
    );

    if let Some(output_root) = output_root {
        let fps = config::effective_fps(request.fps);
        let mut run = run_context::create_run(output_root, &request.video_path, fps)?;
        run_context::save_batch_result(&mut run, &result)?;
        tracing::info!("Saved run {} to {}", run.run_id, run.output_dir.display());
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn detect_image(image: &Path, options: DetectorOptions) -> Result<()> {
    let factory = default_factory();
    let frame = DecodedFrame::open(image)?;
    let result = detect_on_image(factory.as_ref(), &frame, options)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
