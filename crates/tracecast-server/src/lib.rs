//! HTTP surface over the relay service.
//!
//! Attach/detach are idempotent: re-attaching an attached destination and
//! detaching an unknown one both report success.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::debug;

use tracecast_runtime::{Error as RuntimeError, RelayService};
use tracecast_types::{Destination, SessionId};

/// Comment frames at this interval hold keep-alive through proxies.
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

pub fn router(service: Arc<RelayService>) -> Router {
    Router::new()
        .route("/attach", post(attach))
        .route("/detach", post(detach))
        .route("/sessions", get(sessions))
        .route("/sessions/{session_id}/events", get(events))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct AttachRequest {
    session_id: String,
    #[serde(default)]
    path: Option<PathBuf>,
    destination: Destination,
}

#[derive(Debug, Deserialize)]
struct DetachRequest {
    session_id: String,
    destination: Destination,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn map_runtime_error(err: RuntimeError) -> ApiError {
    let status = match &err {
        RuntimeError::UnknownSession(_) => StatusCode::NOT_FOUND,
        RuntimeError::InvalidOperation(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

async fn attach(
    State(service): State<Arc<RelayService>>,
    body: Result<Json<AttachRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(request) = body.map_err(|err| bad_request(err.to_string()))?;
    if request.session_id.is_empty() {
        return Err(bad_request("session_id must not be empty"));
    }

    service
        .attach(
            Some(SessionId::new(request.session_id)),
            request.path,
            request.destination,
        )
        .map_err(map_runtime_error)?;

    Ok(Json(OkResponse { ok: true }))
}

async fn detach(
    State(service): State<Arc<RelayService>>,
    body: Result<Json<DetachRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(request) = body.map_err(|err| bad_request(err.to_string()))?;

    service
        .detach(&SessionId::new(request.session_id), &request.destination)
        .map_err(map_runtime_error)?;

    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Serialize)]
struct SessionRow {
    session_id: SessionId,
    path: PathBuf,
    destinations: Vec<Destination>,
}

async fn sessions(State(service): State<Arc<RelayService>>) -> Json<Vec<SessionRow>> {
    let rows = service
        .list()
        .into_iter()
        .map(|info| SessionRow {
            session_id: info.session_id,
            path: info.path,
            destinations: info.destinations,
        })
        .collect();
    Json(rows)
}

async fn events(
    State(service): State<Arc<RelayService>>,
    Path(session_id): Path<String>,
) -> Result<axum::response::Response, ApiError> {
    let session_id = SessionId::new(session_id);
    let Some(rx) = service.subscribe(&session_id) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown session: {}", session_id),
            }),
        ));
    };

    debug!(session_id = %session_id, "sse subscriber connected");

    let stream = ReceiverStream::new(rx).map(|buffered| {
        let event = Event::default().event(buffered.event.kind());
        let event = match serde_json::to_string(&buffered) {
            Ok(data) => event.data(data),
            Err(_) => event.data("{}"),
        };
        Ok::<Event, std::convert::Infallible>(event)
    });

    let sse =
        Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("ping"));
    Ok(axum::response::IntoResponse::into_response(sse))
}
