use crate::state::AppState;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub fn cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let base = CorsLayer::new().allow_headers(Any).allow_methods(Any);

    let origins: Vec<axum::http::HeaderValue> = state
        .config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        // Wildcard; set MAILJOB_CORS_ORIGINS in production.
        base.allow_origin(Any)
    } else {
        base.allow_origin(origins)
    }
}
