use crate::server::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use logbus_core::LogSpec;
use serde_json::{json, Value};

/// POST /log-events — inject an envelope into the stream (controller
/// internal surface).
pub async fn create_log_event(
    State(state): State<AppState>,
    Json(spec): Json<LogSpec>,
) -> (StatusCode, Json<Value>) {
    if spec.topic.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!("Malformed Request")));
    }
    let Some(producer) = state.producer.as_ref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "Internal Server Error"})),
        );
    };
    match producer.add_log(&spec).await {
        Ok(()) => (StatusCode::CREATED, Json(json!(spec))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to publish log event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": "Internal Server Error"})),
            )
        }
    }
}
