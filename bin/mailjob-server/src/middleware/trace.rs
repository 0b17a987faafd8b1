use axum::{body::Body, extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub static X_TRACE_ID: &str = "x-trace-id";

/// Runs each request inside an `http_request` span keyed by a trace id.
///
/// The id is taken from the incoming `x-trace-id` header when it is a UUID,
/// generated otherwise, and echoed on the response. Bodies are passed
/// through untouched so event streams are not held back.
pub async fn trace_middleware(mut req: Request<Body>, next: Next) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        info!("→ request started");
        let header_value = HeaderValue::from_str(&trace_id.to_string()).ok();
        if let Some(v) = header_value.clone() {
            req.headers_mut().insert(X_TRACE_ID, v);
        }

        let mut response = next.run(req).await;

        if let Some(v) = header_value {
            response.headers_mut().insert(X_TRACE_ID, v);
        }
        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "← response started"
        );
        response
    }
    .instrument(span)
    .await
}
