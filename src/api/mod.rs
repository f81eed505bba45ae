//! JSON-over-HTTP surface.
//!
//! Handlers only extract ids and bodies, call into [`Marketplace`] and wrap
//! the result in the `{"success": true, "data": ...}` envelope. Errors render
//! through [`MarketError`]'s `IntoResponse`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    auth::{auth_middleware, require_admin},
    config::AuthConfig,
    error::MarketError,
    marketplace::Marketplace,
    telemetry::track_requests,
};

mod admin;
mod bookings;
mod catalog;
mod users;
mod vendors;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Marketplace>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse { success: true, data }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

type ApiResult<T> = Result<ApiResponse<T>, MarketError>;
type Created<T> = Result<(StatusCode, ApiResponse<T>), MarketError>;

fn created<T: Serialize>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, ApiResponse::ok(data)))
}

/// The client-chosen idempotency key, if the request carries a non-empty one.
pub fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

pub fn build_router(
    market: Arc<Marketplace>,
    auth: Arc<AuthConfig>,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = AppState { market, metrics };
    let admin = admin::routes().route_layer(middleware::from_fn(require_admin));

    Router::new()
        .merge(users::routes())
        .merge(vendors::routes())
        .merge(catalog::routes())
        .merge(bookings::routes())
        .nest("/admin", admin)
        .route_layer(middleware::from_fn_with_state(auth, auth_middleware))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn health() -> ApiResponse<Value> {
    ApiResponse::ok(json!({ "status": "ok" }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}
