use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_CLIENT: &str = "client";

/// Authenticated caller identity, available to handlers via request extensions.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub name: String,
    pub role: String,
}

impl CallerIdentity {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

#[derive(Serialize)]
struct AuthError {
    success: bool,
    error: String,
}

fn reject(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(AuthError {
            success: false,
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub async fn auth_middleware<B>(
    State(config): State<Arc<AuthConfig>>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    if !config.enabled {
        req.extensions_mut().insert(CallerIdentity {
            name: "anonymous".to_string(),
            role: ROLE_ADMIN.to_string(),
        });
        return next.run(req).await;
    }

    let api_key = req
        .headers()
        .get("X-API-Key")
        .or_else(|| req.headers().get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

    match api_key {
        Some(key) => match config
            .api_keys
            .iter()
            .find(|entry| entry.key.as_bytes().ct_eq(key.as_bytes()).into())
        {
            Some(entry) => {
                tracing::debug!(caller = %entry.name, role = %entry.role, "Authenticated request");
                req.extensions_mut().insert(CallerIdentity {
                    name: entry.name.clone(),
                    role: entry.role.clone(),
                });
                next.run(req).await
            }
            None => {
                tracing::warn!("Invalid API key presented");
                reject(StatusCode::UNAUTHORIZED, "Invalid API key")
            }
        },
        None => reject(
            StatusCode::UNAUTHORIZED,
            "Missing API key. Provide X-API-Key header or Authorization: Bearer <key>",
        ),
    }
}

/// Lets only admin callers through. Runs after [`auth_middleware`].
pub async fn require_admin<B>(req: Request<B>, next: Next<B>) -> Response {
    match req.extensions().get::<CallerIdentity>() {
        Some(caller) if caller.is_admin() => next.run(req).await,
        Some(caller) => {
            tracing::warn!(caller = %caller.name, role = %caller.role, "Admin route refused");
            reject(StatusCode::FORBIDDEN, "Admin role required")
        }
        None => reject(StatusCode::UNAUTHORIZED, "Not authenticated"),
    }
}
