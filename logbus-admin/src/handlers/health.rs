use crate::server::AppState;
use axum::extract::State;

/// GET /octhc
pub async fn health_check(State(state): State<AppState>) -> String {
    match state.storage.health_check().await {
        Ok(()) => "overall_status=good".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            "overall_status=bad,redis_check=failed".to_string()
        }
    }
}

/// GET /metrics — Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.gather_text()
}
