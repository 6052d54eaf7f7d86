//! HTTP surface for JMN: event ingress, per-user reads, and the SSE session channel.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use jmn_pipeline::wiring::{build_collaborators, realtime_channel, SeedFiles};
use jmn_pipeline::{Disposition, EventConsumer, PipelineConfig, SessionHub};
use jmn_storage::{MatchStore, NotificationStore, StoreError};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jmn-web";

#[derive(Clone)]
pub struct AppState {
    pub consumer: EventConsumer,
    pub matches: Arc<dyn MatchStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub sessions: Arc<SessionHub>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/events", post(ingest_event_handler))
        .route("/users/{user_id}/notifications", get(notifications_handler))
        .route("/users/{user_id}/matches", get(matches_handler))
        .route("/users/{user_id}/stream", get(stream_handler))
        .with_state(Arc::new(state))
}

/// Wire stores and the consumer from `config`, then serve until the listener fails.
pub async fn serve(config: PipelineConfig, seeds: SeedFiles) -> anyhow::Result<()> {
    let sessions = Arc::new(SessionHub::default());
    let realtime = realtime_channel(&config, sessions.clone())?;
    let collaborators = build_collaborators(&config, &seeds, realtime).await?;
    let state = AppState {
        matches: collaborators.matches.clone(),
        notifications: collaborators.notifications.clone(),
        consumer: EventConsumer::from_config(&config, collaborators)?,
        sessions,
    };

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "jmn-web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": CRATE_NAME }))
}

/// Push bridge for a broker: one event per request, answered with its outcome.
async fn ingest_event_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let outcome = state.consumer.handle_bytes(&body).await;
    let status = match outcome.disposition {
        Disposition::Processed | Disposition::Unsupported | Disposition::Inactive => {
            StatusCode::OK
        }
        Disposition::Malformed => StatusCode::UNPROCESSABLE_ENTITY,
        Disposition::Failed => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(outcome)).into_response()
}

async fn notifications_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Response {
    match state.notifications.list_for_user(user_id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error(err),
    }
}

async fn matches_handler(State(state): State<Arc<AppState>>, Path(user_id): Path<Uuid>) -> Response {
    match state.matches.list_for_user(user_id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error(err),
    }
}

async fn stream_handler(State(state): State<Arc<AppState>>, Path(user_id): Path<Uuid>) -> Response {
    let rx = state.sessions.subscribe(user_id).await;
    let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(record) => Some(
            Event::default()
                .event("notification")
                .id(record.id.to_string())
                .json_data(&record),
        ),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(%user_id, skipped, "session fell behind; notifications remain in the inbox");
            None
        }
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn store_error(err: StoreError) -> Response {
    let status = if err.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
