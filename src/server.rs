//! Status HTTP server.
//!
//! Reports what the sync is doing: the recent transform outcomes, the
//! backend's health and index statistics, and the static configuration.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/status` | Transform log, backend health, configuration (authenticated) |
//! | `GET`  | `/health` | Liveness check (returns version) |
//!
//! `/status` requires `Authorization: Bearer <token>` for a user whose level
//! reaches `status.view_level`; anything else gets
//! `401 {"error":"not authenticated or not allowed"}`. An unreachable
//! backend never fails the response, it is reported under
//! `elasticsearch.error` instead.
//!
//! Responses are gzip-compressed when the client accepts it, and every
//! request is traced.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::authorize_status;
use crate::backend::SearchBackend;
use crate::config::{CollectionsConfig, Config, FsConfig};
use crate::models::TransformLogEntry;
use crate::transform_log::TransformLog;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub log: Arc<TransformLog>,
    pub backend: Arc<dyn SearchBackend>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `server.bind`. Kept apart from [`serve`] so a taken port fails
/// startup instead of a background task.
pub async fn bind(config: &Config) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind status server to {}", config.server.bind))?;
    Ok(listener)
}

/// Serve the status API on `listener` until the process ends.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!("status server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /status ============

#[derive(Serialize)]
struct Levels {
    view_status: u32,
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    name: &'static str,
    version: &'static str,
    levels: Levels,
    collections: &'a CollectionsConfig,
    filesystem: &'a FsConfig,
    index: &'a str,
    #[serde(rename = "transformationLog")]
    transformation_log: Vec<TransformLogEntry>,
    elasticsearch: Value,
}

fn not_allowed() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "not authenticated or not allowed" })),
    )
        .into_response()
}

async fn handle_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match authorize_status(&state.config.status, &headers) {
        Ok(user) => user,
        Err(e) => {
            debug!(reason = %e, "status request rejected");
            return not_allowed();
        }
    };
    debug!(user = %user.name, "status requested");

    let elasticsearch = backend_status(state.backend.as_ref()).await;

    let response = StatusResponse {
        name: "finder",
        version: env!("CARGO_PKG_VERSION"),
        levels: Levels {
            view_status: state.config.status.view_level,
        },
        collections: &state.config.collections,
        filesystem: &state.config.fs,
        index: &state.config.elasticsearch.index,
        transformation_log: state.log.entries(),
        elasticsearch,
    };
    Json(response).into_response()
}

async fn backend_status(backend: &dyn SearchBackend) -> Value {
    match tokio::try_join!(backend.info(), backend.index_stats()) {
        Ok((info, indices)) => json!({
            "location": backend.location(),
            "status": info,
            "indices": indices,
        }),
        Err(e) => {
            warn!(error = %e, "could not get info from backend");
            json!({
                "location": backend.location(),
                "error": e.to_string(),
            })
        }
    }
}
