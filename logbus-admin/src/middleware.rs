use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

/// Static bearer-token check.
///
/// The health and metrics endpoints stay open, and `GET /log-sessions/:id`
/// is deliberately unauthenticated: the random one-shot session id is the
/// credential.
pub async fn bearer_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path();
    let open = path == "/octhc"
        || path == "/metrics"
        || (request.method() == Method::GET && path.starts_with("/log-sessions/"));
    if open {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if token != state.auth_key {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}
