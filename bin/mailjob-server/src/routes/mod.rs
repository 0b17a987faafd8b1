//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-id span)
//! - Optional Swagger UI / OpenAPI spec endpoint (disable with `MAILJOB_ENABLE_SWAGGER=false`)
//! - Health / heartbeat route
//! - `/v1` job routes (optionally protected by bearer token)

pub mod doc;
mod health;
mod v1;

use axum::{middleware, Router};
use crate::middleware::{auth, cors, trace};
use crate::state::AppState;
use std::sync::Arc;
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let v1_router = v1::router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::check_api_token,
    ));

    let mut app = Router::new()
        .merge(health::router())
        .nest("/v1", v1_router);

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(trace::trace_middleware))
                .layer(cors::cors_layer(&state)),
        )
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::state::test_state;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn api_token_guards_v1_but_not_health() {
        let config = Config {
            api_token: Some("s3cret".into()),
            ..Config::default()
        };
        let app = build(test_state(config).await);

        let req = || Request::get("/v1/jobs").header("x-user-id", "u1");

        let resp = app.clone().oneshot(req().body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(
                req()
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn trace_id_is_echoed() {
        let app = build(test_state(Config::default()).await);
        let id = "5b2c3f56-8f0e-4c34-9a57-5d1f6c0e0e42";
        let resp = app
            .oneshot(
                Request::get("/health")
                    .header(trace::X_TRACE_ID, id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.headers()[trace::X_TRACE_ID], id);
        assert!(logs_contain("request started"));
    }
}
