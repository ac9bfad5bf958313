//! Report server
//!
//! Routes:
//! - `GET  /socket`          channel WebSocket
//! - `GET  /api/report`      current report snapshot
//! - `POST /api/reset`       clear verdicts for a re-run
//! - `GET  /api/diff/:name`  rendered diff PNG
//! - `GET  /ref/*`, `/test/*` screenshot files

use crate::channel::ChannelBridge;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shotcheck_engine::{ImageLayout, Role, SessionHandle, TransportPublisher};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Failure answered to an HTTP client
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("session unavailable: {0}")]
    Session(#[from] shotcheck_engine::Error),

    #[error("no diff image for '{0}'")]
    NoDiff(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NoDiff(_) => StatusCode::NOT_FOUND,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

struct ServerState {
    handle: SessionHandle,
    publisher: TransportPublisher,
    images: ImageLayout,
}

/// HTTP front end for one session
pub struct ReportServer {
    state: Arc<ServerState>,
}

impl ReportServer {
    pub fn new(handle: SessionHandle, publisher: TransportPublisher, images: ImageLayout) -> Self {
        Self {
            state: Arc::new(ServerState {
                handle,
                publisher,
                images,
            }),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let images = &self.state.images;

        Router::new()
            .route("/socket", get(socket_handler))
            .route("/api/report", get(report_handler))
            .route("/api/reset", post(reset_handler))
            .route("/api/diff/:name", get(diff_handler))
            .nest_service("/ref", ServeDir::new(images.dir(Role::Reference)))
            .nest_service("/test", ServeDir::new(images.dir(Role::Test)))
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until the listener fails
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!(
            "Report server listening on http://{} (topic '{}')",
            addr,
            self.state.publisher.topic()
        );
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn socket_handler(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let bridge = ChannelBridge::new(
        state.publisher.topic(),
        state.publisher.clone(),
        state.handle.subscribe(),
    );
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = bridge.bridge(socket).await {
            error!("Channel WebSocket error: {}", e);
        }
    })
}

async fn report_handler(State(state): State<Arc<ServerState>>) -> Result<Response, ApiError> {
    let snapshot = state.handle.snapshot().await?;
    Ok(Json(snapshot).into_response())
}

async fn reset_handler(State(state): State<Arc<ServerState>>) -> Result<Response, ApiError> {
    state.handle.reset().await?;
    info!("Report reset");
    let snapshot = state.handle.snapshot().await?;
    Ok(Json(snapshot).into_response())
}

async fn diff_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    match state.handle.diff_image(&name).await? {
        Some(png) => {
            debug!("Serving diff for '{}' ({} bytes)", name, png.len());
            Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
        }
        None => Err(ApiError::NoDiff(name)),
    }
}
