use super::error::ApiError;
use super::session_hub::{SessionHub, SseItem, MESSAGES_PATH};
use crate::app::mcp::JsonRpcRequest;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

pub const SSE_PATH: &str = "/sse";
pub const HEALTH_PATH: &str = "/healthz";

#[derive(Clone)]
pub struct AppState {
    hub: Arc<SessionHub>,
}

impl AppState {
    pub fn new(hub: Arc<SessionHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> Arc<SessionHub> {
        self.hub.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(SSE_PATH, get(sse_connect))
        .route(MESSAGES_PATH, post(post_message))
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

async fn sse_connect(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = SseItem>>, ApiError> {
    let (session_id, events) = state.hub().open().await.map_err(|err| {
        warn!(%err, "rejected SSE connection");
        ApiError::from(err)
    })?;
    debug!(%session_id, "SSE stream started");
    Ok(Sse::new(ReceiverStream::new(events)).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let hub = state.hub();
    if hub.active_session().await.is_none() {
        return Err(ApiError::invalid(
            "session.none",
            "No active transport connection",
        ));
    }
    let request: JsonRpcRequest = serde_json::from_slice(&body).map_err(|err| {
        let message = format!("invalid JSON-RPC message: {err}");
        ApiError::invalid("message.invalid", message)
    })?;
    hub.deliver(query.session_id.as_deref(), request).await?;
    Ok((StatusCode::ACCEPTED, "Accepted"))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
