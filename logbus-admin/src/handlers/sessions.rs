use crate::server::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use logbus_core::session::SESSION_TTL_SECS;
use logbus_core::LogSession;
use logbus_shuttle::TailSession;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// POST /log-sessions — mint a one-shot session id with a 5 minute TTL.
pub async fn create_log_session(
    State(state): State<AppState>,
    Json(session): Json<LogSession>,
) -> (StatusCode, Json<Value>) {
    if session.app.is_empty() && session.site.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!("Malformed Request")));
    }
    let id = uuid::Uuid::new_v4().to_string();
    let ttl = Duration::from_secs(SESSION_TTL_SECS);
    if let Err(e) = state.storage.set_session(&id, session, ttl).await {
        tracing::error!(error = %e, "Failed to persist session");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "Internal Server Error"})),
        );
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "id": id,
            "logplex_url": format!("{}/log-sessions/{}", state.session_url, id)
        })),
    )
}

/// GET /log-sessions/:id — stream the live tail until the client
/// disconnects or the session goes silent.
pub async fn read_log_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let session = match state.storage.get_session(&id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!(id = %id, error = %e, "Session lookup failed");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let tail = TailSession::new(&session);
    let (tx, rx) = mpsc::channel::<String>(64);
    let brokers = state.brokers.clone();
    tokio::spawn(async move { tail.run(&brokers, tx).await });

    let stream = ReceiverStream::new(rx).map(Ok::<String, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
