//! Status web server.

use crate::devices::DirectoryCamera;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use espfw_core::{FirmwareConfig, FrameSource, SharedCamera};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Shared state for the handlers.
pub struct WebState {
    pub config: FirmwareConfig,
    pub camera: SharedCamera<DirectoryCamera>,
    pub started: Instant,
    pub stream_url: Option<String>,
}

pub type AppState = Arc<WebState>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/snapshot", get(snapshot_handler))
        .with_state(state)
}

/// Serve the status page until the task is aborted.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "app": state.config.app_name,
        "version": state.config.firmware_version,
        "hostname": state.config.hostname(),
        "uptimeSecs": state.started.elapsed().as_secs(),
        "camera": state.camera.is_ready(),
        "stream": state.stream_url,
    }))
}

async fn snapshot_handler(State(state): State<AppState>) -> Response {
    let mut camera = state.camera.clone();
    let frame = tokio::task::spawn_blocking(move || camera.capture()).await;
    match frame {
        Ok(Ok(frame)) => ([(header::CONTENT_TYPE, "image/jpeg")], frame.data).into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
