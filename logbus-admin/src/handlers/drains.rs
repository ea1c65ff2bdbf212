use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use logbus_core::Route;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct DrainCreateRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct AddonResponse {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DrainResponse {
    pub addon: AddonResponse,
    pub created_at: DateTime<Utc>,
    pub id: String,
    pub token: String,
    pub updated_at: DateTime<Utc>,
    pub url: String,
}

fn drain_response(route: &Route, token: &str) -> DrainResponse {
    DrainResponse {
        addon: AddonResponse {
            id: String::new(),
            name: String::new(),
        },
        created_at: route.created,
        id: route.id.clone(),
        token: token.to_string(),
        updated_at: route.updated,
        url: route.destination_url.clone(),
    }
}

fn invalid_request() -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!("Malformed Request")))
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    tracing::error!(error = %e, "Admin request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"message": "Internal Server Error"})),
    )
}

fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "No such log drain or app found"})),
    )
}

/// App keys are `app-space`; the first dash splits them.
fn split_app_key(key: &str) -> Option<(&str, &str)> {
    let (app, space) = key.split_once('-')?;
    if app.is_empty() || space.is_empty() {
        return None;
    }
    Some((app, space))
}

async fn list_drains(
    state: AppState,
    key: String,
    is_site: bool,
) -> (StatusCode, Json<Value>) {
    if key.is_empty() {
        return invalid_request();
    }
    let routes = match state.storage.get_routes().await {
        Ok(routes) => routes,
        Err(e) => return internal_error(e),
    };
    let matched: Vec<DrainResponse> = if is_site {
        routes
            .iter()
            .filter(|r| r.site == key)
            .map(|r| drain_response(r, &key))
            .collect()
    } else {
        let Some((app, space)) = split_app_key(&key) else {
            return invalid_request();
        };
        routes
            .iter()
            .filter(|r| r.app == app && r.space == space)
            .map(|r| drain_response(r, &key))
            .collect()
    };
    (StatusCode::OK, Json(json!(matched)))
}

async fn create_drain(
    state: AppState,
    key: String,
    body: DrainCreateRequest,
    is_site: bool,
) -> (StatusCode, Json<Value>) {
    if key.is_empty() || body.url.is_empty() {
        return invalid_request();
    }
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let route = if is_site {
        Route {
            id: id.clone(),
            app: String::new(),
            space: String::new(),
            site: key.clone(),
            created: now,
            updated: now,
            destination_url: body.url.clone(),
        }
    } else {
        let Some((app, space)) = split_app_key(&key) else {
            return invalid_request();
        };
        Route {
            id: id.clone(),
            app: app.to_string(),
            space: space.to_string(),
            site: String::new(),
            created: now,
            updated: now,
            destination_url: body.url.clone(),
        }
    };
    if let Err(e) = state.storage.add_route(route.clone()).await {
        return internal_error(e);
    }
    (
        StatusCode::CREATED,
        Json(json!(drain_response(&route, &key))),
    )
}

async fn get_drain(state: AppState, key: String, id: String) -> (StatusCode, Json<Value>) {
    if key.is_empty() || id.is_empty() {
        return invalid_request();
    }
    let route = match state.storage.get_route_by_id(&id).await {
        Ok(route) => route,
        Err(_) => return not_found(),
    };
    // The id is only valid under the key it was created for.
    let app_key = format!("{}-{}", route.app, route.space);
    if key != route.site && key != app_key {
        return not_found();
    }
    (StatusCode::OK, Json(json!(drain_response(&route, &key))))
}

async fn delete_drain(state: AppState, key: String, id: String) -> (StatusCode, Json<Value>) {
    if key.is_empty() || id.is_empty() {
        return invalid_request();
    }
    let route = match state.storage.get_route_by_id(&id).await {
        Ok(route) => route,
        Err(_) => return not_found(),
    };
    if let Err(e) = state.storage.remove_route(&route).await {
        return internal_error(e);
    }
    (StatusCode::OK, Json(json!(drain_response(&route, &key))))
}

// ── App surface ─────────────────────────────────────────────

pub async fn list_app_drains(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> (StatusCode, Json<Value>) {
    list_drains(state, key, false).await
}

pub async fn create_app_drain(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<DrainCreateRequest>,
) -> (StatusCode, Json<Value>) {
    create_drain(state, key, body, false).await
}

pub async fn get_app_drain(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    get_drain(state, key, id).await
}

pub async fn delete_app_drain(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    delete_drain(state, key, id).await
}

// ── Site surface ────────────────────────────────────────────

pub async fn list_site_drains(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> (StatusCode, Json<Value>) {
    list_drains(state, key, true).await
}

pub async fn create_site_drain(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<DrainCreateRequest>,
) -> (StatusCode, Json<Value>) {
    create_drain(state, key, body, true).await
}

pub async fn get_site_drain(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    get_drain(state, key, id).await
}

pub async fn delete_site_drain(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    delete_drain(state, key, id).await
}
