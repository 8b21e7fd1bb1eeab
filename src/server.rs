//! HTTP routes.
//!
//! | route | method | auth |
//! |---|---|---|
//! | `/api/recognize` | POST | only when `require_auth` is set |
//! | `/api/recognize/secure` | POST | always |
//! | `/api/reload-embeddings` | POST | no |
//! | `/api/known-faces` | GET | no |
//! | `/api/health` | GET | no |

use crate::auth::TokenAuthority;
use crate::error::ServiceError;
use crate::processor::{FrameProcessor, MatchResult};
use crate::store::{EmbeddingStore, FaceSummary};
use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, HeaderValue, Method,
    },
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Everything a handler needs, shared by all requests.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EmbeddingStore>,
    pub processor: Arc<FrameProcessor>,
    pub tokens: Arc<TokenAuthority>,
    /// Fixed at startup.
    pub require_auth: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub known_faces: usize,
    pub auth_required: bool,
}

/// Strip an optional `data:<mime>;base64,` prefix and decode the payload.
pub fn decode_image_payload(image: &str) -> Result<Vec<u8>, ServiceError> {
    let image = image.trim();
    let payload = match image.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => image,
    };
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(ServiceError::InvalidInput("No image provided".to_string()));
    }

    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ServiceError::InvalidInput(format!("Invalid base64 image: {}", e)))
}

async fn run_recognition(
    state: &AppState,
    body: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<Vec<MatchResult>>, ServiceError> {
    let Json(request) = body.map_err(|e| {
        ServiceError::InvalidInput(format!("Invalid request body: {}", e.body_text()))
    })?;
    let image = request
        .image
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ServiceError::InvalidInput("No image provided".to_string()))?;
    let bytes = decode_image_payload(&image)?;

    let processor = state.processor.clone();
    let results = tokio::task::spawn_blocking(move || processor.process(&bytes))
        .await
        .map_err(|e| ServiceError::Internal(format!("recognition task failed: {}", e)))??;

    log::info!(
        "recognized {} face(s), {} known",
        results.len(),
        results.iter().filter(|r| !r.is_unknown()).count()
    );
    Ok(Json(results))
}

async fn recognize(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<Vec<MatchResult>>, ServiceError> {
    if state.require_auth {
        state.tokens.authorize(&headers)?;
    }
    run_recognition(&state, body).await
}

async fn recognize_secure(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<Vec<MatchResult>>, ServiceError> {
    let claims = state.tokens.authorize(&headers)?;
    log::debug!("secure recognition for {}", claims.sub);
    run_recognition(&state, body).await
}

async fn reload_embeddings(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, ServiceError> {
    let store = state.store.clone();
    let count = tokio::task::spawn_blocking(move || store.load())
        .await
        .map_err(|e| ServiceError::Internal(format!("reload task failed: {}", e)))??;

    Ok(Json(ReloadResponse {
        message: format!("Reloaded {} embeddings successfully", count),
        count,
    }))
}

async fn known_faces(State(state): State<AppState>) -> Json<Vec<FaceSummary>> {
    Json(state.store.list())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        known_faces: state.store.len(),
        auth_required: state.require_auth,
    })
}

/// All routes under `/api`, without CORS.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let api = Router::new()
        .route("/recognize", post(recognize))
        .route("/recognize/secure", post(recognize_secure))
        .route("/reload-embeddings", post(reload_embeddings))
        .route("/known-faces", get(known_faces))
        .route("/health", get(health));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// CORS for exactly one origin, with credentials.
pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let origin: HeaderValue = origin
        .parse()
        .with_context(|| format!("invalid cors_origin {:?}", origin))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}

pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    cors_origin: &str,
    max_body_bytes: usize,
) -> anyhow::Result<()> {
    let app = build_router(state, max_body_bytes).layer(cors_layer(cors_origin)?);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    log::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
