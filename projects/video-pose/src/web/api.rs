use crate::config::DetectorOptions;
use crate::error::{CallFailure, PoseError};
use crate::pipeline::batch::{detect_pose_on_video, VideoBatchRequest};
use crate::pipeline::events::{DetectionEvent, EventChannel, Subscription};
use crate::pipeline::registry::detect_on_image;
use crate::pipeline::types::{BatchResult, FrameRecord, PoseDetectionResult};
use crate::run_context::{
    create_run, list_runs, list_videos, load_batch_result, save_batch_result, RunMetadata,
};
use crate::video::DecodedFrame;
use crate::web::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// How often the event forwarder checks whether its client is still there.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Error returned by every handler as `{code, message}`.
#[derive(Debug)]
pub enum ApiError {
    Pose(PoseError),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<PoseError> for ApiError {
    fn from(e: PoseError) -> Self {
        ApiError::Pose(e)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Worker task failed: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, failure) = match self {
            ApiError::Pose(e) => {
                let status = match &e {
                    e if e.is_configuration() => StatusCode::BAD_REQUEST,
                    PoseError::UnknownHandle(_) => StatusCode::NOT_FOUND,
                    PoseError::WrongRunningMode { .. } => StatusCode::CONFLICT,
                    PoseError::FatalOpen(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_failure())
            }
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                CallFailure {
                    code: "E_NOT_FOUND".to_string(),
                    message,
                },
            ),
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                CallFailure {
                    code: "E_CONFLICT".to_string(),
                    message,
                },
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                CallFailure {
                    code: "E_INTERNAL_ERROR".to_string(),
                    message,
                },
            ),
        };
        tracing::warn!("Request failed with {}: {}", failure.code, failure.message);
        (status, Json(failure)).into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDetectorRequest {
    #[serde(flatten)]
    pub options: DetectorOptions,
    pub running_mode: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateDetectorResponse {
    pub handle: u32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ReleaseDetectorResponse {
    pub released: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectImageRequest {
    pub image_path: PathBuf,
    #[serde(default)]
    pub options: DetectorOptions,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveFrameRequest {
    pub image_path: PathBuf,
    pub timestamp_ms: u64,
}

#[derive(Serialize)]
pub struct VideoInfo {
    pub name: String,
    pub path: String,
}

pub async fn create_detector_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDetectorRequest>,
) -> Result<Json<CreateDetectorResponse>, ApiError> {
    let registry = state.registry.clone();
    // Model loading can be slow; keep it off the async workers.
    let handle = tokio::task::spawn_blocking(move || {
        registry.create(payload.options, payload.running_mode)
    })
    .await??;
    Ok(Json(CreateDetectorResponse { handle }))
}

pub async fn release_detector_handler(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<u32>,
) -> Json<ReleaseDetectorResponse> {
    Json(ReleaseDetectorResponse {
        released: state.registry.release(handle),
    })
}

pub async fn live_frame_handler(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<u32>,
    Json(payload): Json<LiveFrameRequest>,
) -> Result<StatusCode, ApiError> {
    // Fail fast on unknown handles before loading the image.
    state.registry.get(handle)?;

    let registry = state.registry.clone();
    let image_path = state.resolve_path(&payload.image_path);
    tokio::task::spawn_blocking(move || {
        let frame = DecodedFrame::open(&image_path)?;
        registry.detect_live(handle, &frame, payload.timestamp_ms)
    })
    .await??;
    Ok(StatusCode::ACCEPTED)
}

pub async fn detect_image_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DetectImageRequest>,
) -> Result<Json<PoseDetectionResult>, ApiError> {
    let image_path = state.resolve_path(&payload.image_path);
    let registry = state.registry.clone();
    let result = tokio::task::spawn_blocking(move || {
        let frame = DecodedFrame::open(&image_path)?;
        detect_on_image(registry.factory(), &frame, payload.options)
    })
    .await??;
    Ok(Json(result))
}

pub async fn detect_video_handler(
    State(state): State<Arc<AppState>>,
    Json(mut request): Json<VideoBatchRequest>,
) -> Result<Json<BatchResult>, ApiError> {
    request.video_path = state.resolve_path(&request.video_path);
    tracing::info!("Starting video batch for {}", request.video_path.display());

    let worker_state = state.clone();
    let worker_request = request.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut last_logged = 0;
        detect_pose_on_video(
            worker_state.video_opener.as_ref(),
            worker_state.registry.factory(),
            &worker_request,
            |record: &FrameRecord, total: usize| {
                let pct = (record.frame_index + 1) * 100 / total.max(1);
                if pct >= last_logged + 10 {
                    last_logged = pct;
                    tracing::info!("Video batch {}% ({}/{})", pct, record.frame_index + 1, total);
                }
            },
        )
    })
    .await??;

    // The batch itself succeeded; an artifact write failure is only logged.
    let fps = crate::config::effective_fps(request.fps);
    match create_run(&state.output_root, &request.video_path, fps)
        .and_then(|mut run| save_batch_result(&mut run, &result))
    {
        Ok(()) => tracing::info!("Saved batch result for {}", request.video_path.display()),
        Err(e) => tracing::warn!("Failed to save batch result: {:#}", e),
    }

    Ok(Json(result))
}

/// Streams live-stream events to the single subscriber.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.registry.events().clone();
    let subscription = events
        .subscribe()
        .ok_or_else(|| ApiError::Conflict("An event consumer is already subscribed".to_string()))?;

    // Bridge the blocking channel into the async stream.
    let (tx, mut async_rx) = tokio::sync::mpsc::unbounded_channel::<DetectionEvent>();
    std::thread::spawn(move || forward_events(subscription, &events, tx));

    let stream = async_stream::stream! {
        while let Some(event) = async_rx.recv().await {
            match Event::default().event(event.name()).json_data(&event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(e) => tracing::warn!("Failed to encode event: {}", e),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Moves events to an SSE client until it disconnects. Dropping the
/// subscription on return lets the next client subscribe.
fn forward_events(
    subscription: Subscription,
    events: &EventChannel,
    tx: UnboundedSender<DetectionEvent>,
) {
    while !tx.is_closed() {
        match subscription.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => {
                if let Err(unsent) = tx.send(event) {
                    // Client left after the check; keep the event for the next one.
                    events.publish(unsent.0);
                    break;
                }
            }
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::info!("Event subscriber disconnected");
}

pub async fn get_videos(State(state): State<Arc<AppState>>) -> Json<Vec<VideoInfo>> {
    let info_list = list_videos(&state.video_root)
        .into_iter()
        .map(|video_path| {
            let name = video_path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            VideoInfo {
                name,
                path: video_path.to_string_lossy().to_string(),
            }
        })
        .collect();

    Json(info_list)
}

pub async fn get_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunMetadata>> {
    match list_runs(&state.output_root) {
        Ok(runs) => Json(runs),
        Err(e) => {
            tracing::warn!(
                "Failed to list runs in {}: {:#}",
                state.output_root.display(),
                e
            );
            Json(Vec::new())
        }
    }
}

pub async fn get_run_results(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<BatchResult>, ApiError> {
    let runs =
        list_runs(&state.output_root).map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    let run = runs
        .into_iter()
        .find(|r| r.run_id == run_id)
        .ok_or_else(|| ApiError::NotFound(format!("No run named {}", run_id)))?;
    let result = load_batch_result(&run).map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(Json(result))
}
