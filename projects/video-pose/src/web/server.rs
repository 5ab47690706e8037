use crate::web::api::{
    create_detector_handler, detect_image_handler, detect_video_handler, events_handler,
    get_run_results, get_runs, get_videos, live_frame_handler, release_detector_handler,
};
use crate::web::AppState;
use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/detectors", post(create_detector_handler))
        .route("/api/detectors/:handle", delete(release_detector_handler))
        .route("/api/detectors/:handle/frames", post(live_frame_handler))
        .route("/api/detect/image", post(detect_image_handler))
        .route("/api/detect/video", post(detect_video_handler))
        .route("/api/events", get(events_handler))
        .route("/api/videos", get(get_videos))
        .route("/api/runs", get(get_runs))
        .route("/api/runs/:run_id/results", get(get_run_results))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(host: IpAddr, port: u16, state: Arc<AppState>) -> Result<()> {
    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Tokio requires a non-blocking socket.
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port.wrapping_add(1);
                if current_port == 0 {
                    return Err(anyhow::anyhow!("No available ports found"));
                }
            }
        }
    };

    let app = router(state);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Video pose server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}
