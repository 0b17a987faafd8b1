//! Caller identity and optional API token check.
//!
//! Identity is asserted upstream: the identity provider in front of this
//! server sets `x-user-id` on every request. Jobs are scoped to that id.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ServerError;
use crate::state::AppState;

pub static X_USER_ID: &str = "x-user-id";

/// The authenticated caller's owner id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(X_USER_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(v.to_owned()))
            .ok_or_else(|| ServerError::Unauthorized(format!("missing {X_USER_ID} header")))
    }
}

/// Rejects requests without the configured bearer token. A no-op when
/// `MAILJOB_API_TOKEN` is unset.
pub async fn check_api_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.config.api_token.as_deref() {
        let provided = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected) {
            return ServerError::Unauthorized("invalid or missing API token".into()).into_response();
        }
    }
    next.run(req).await
}
