use anyhow::{Context, Result};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{log_requests, metrics::metrics_handler, state::*, ServerConfig};
use crate::error::PipelineError;
use crate::pipeline::{PipelineResult, SourceRequest};
use crate::publisher::ShareableLink;

const HOME_MESSAGE: &str = "YouTube to pCloud Uploader is running";

#[derive(Serialize)]
struct ServerStats {
    pub message: &'static str,
    pub uptime: String,
    pub started_at: String,
    pub version: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug)]
struct UploadQuery {
    pub link: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    filename: String,
    mp3_link: String,
    thumbnail_link: Option<String>,
    audio_links: Vec<ShareableLink>,
    thumbnail_links: Vec<ShareableLink>,
    thumbnail_omitted: Option<String>,
}

impl From<PipelineResult> for UploadResponse {
    fn from(result: PipelineResult) -> Self {
        Self {
            mp3_link: result.primary_audio_link().unwrap_or_default().to_string(),
            thumbnail_link: result.primary_thumbnail_link().map(str::to_string),
            filename: result.filename,
            audio_links: result.audio_links,
            thumbnail_links: result.thumbnail_links,
            thumbnail_omitted: result.thumbnail_omitted,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    kind: &'static str,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            detail: self.to_string(),
            kind: self.kind(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        message: HOME_MESSAGE,
        uptime: format_uptime(state.start_time.elapsed()),
        started_at: state.started_at.to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
    };
    Json(stats)
}

async fn upload(
    State(pipeline): State<GuardedPipeline>,
    Query(query): Query<UploadQuery>,
) -> Response {
    let link = match query.link.as_deref().map(str::trim) {
        Some(link) if !link.is_empty() => link.to_string(),
        _ => {
            let body = ErrorResponse {
                detail: "Missing required query parameter: link".to_string(),
                kind: "bad_request",
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    match pipeline.run(&SourceRequest::new(link)).await {
        Ok(result) => Json(UploadResponse::from(result)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn make_app(config: ServerConfig, pipeline: GuardedPipeline) -> Router {
    let state = ServerState::new(config, pipeline);

    Router::new()
        .route("/", get(home))
        .route("/upload", get(upload))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn serve(name: &str, port: u16, app: Router, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind {} listener on port {}", name, port))?;
    info!("{} listening on {}", name, listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .with_context(|| format!("{} server failed", name))
}

/// Serve the API and the metrics endpoint until `shutdown` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    pipeline: GuardedPipeline,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, pipeline);

    tokio::try_join!(
        serve("HTTP", port, app, shutdown.clone()),
        serve("Metrics", metrics_port, make_metrics_app(), shutdown),
    )?;
    Ok(())
}
