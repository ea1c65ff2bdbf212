use crate::handlers;
use crate::middleware::bearer_auth;
use axum::routing::{delete, get, post};
use axum::Router;
use logbus_observability::MetricsCollector;
use logbus_shuttle::LogProducer;
use logbus_store::Storage;
use std::sync::Arc;
use tracing::info;

/// Shared state for the admin surface.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub producer: Option<Arc<LogProducer>>,
    pub metrics: Arc<MetricsCollector>,
    pub auth_key: String,
    pub session_url: String,
    pub brokers: Vec<String>,
}

/// Routes served by the shuttle process: drain CRUD for apps and sites,
/// event injection, health, and metrics.
pub fn shuttle_router(state: AppState) -> Router {
    Router::new()
        .route("/apps/{key}/log-drains", get(handlers::drains::list_app_drains))
        .route("/apps/{key}/log-drains", post(handlers::drains::create_app_drain))
        .route("/apps/{key}/log-drains/{id}", get(handlers::drains::get_app_drain))
        .route("/apps/{key}/log-drains/{id}", delete(handlers::drains::delete_app_drain))
        .route("/sites/{key}/log-drains", get(handlers::drains::list_site_drains))
        .route("/sites/{key}/log-drains", post(handlers::drains::create_site_drain))
        .route("/sites/{key}/log-drains/{id}", get(handlers::drains::get_site_drain))
        .route("/sites/{key}/log-drains/{id}", delete(handlers::drains::delete_site_drain))
        .route("/log-events", post(handlers::events::create_log_event))
        .route("/octhc", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .layer(axum::middleware::from_fn_with_state(state.clone(), bearer_auth))
        .with_state(state)
}

/// Routes served by the session process. Only `POST /log-sessions` is
/// protected; reading a session streams with no token (the one-shot id is
/// the credential).
pub fn session_router(state: AppState) -> Router {
    Router::new()
        .route("/log-sessions", post(handlers::sessions::create_log_session))
        .route("/log-sessions/{id}", get(handlers::sessions::read_log_session))
        .route("/octhc", get(handlers::health::health_check))
        .layer(axum::middleware::from_fn_with_state(state.clone(), bearer_auth))
        .with_state(state)
}

/// Bind and serve a router until the process exits.
pub async fn serve(router: Router, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting HTTP listener");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
