//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON body
//! `{"error": "..."}` with an appropriate status code.
//!
//! Internal errors are logged with full detail but only a generic message is
//! returned, so SQL and other implementation details never reach clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mailjob_core::JobError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Ownership mismatch; the message never names the job.
    #[error("forbidden")]
    Forbidden,

    /// The job could not be handed to a worker; the caller may retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ServerError::Forbidden => (StatusCode::FORBIDDEN, "access denied".to_owned()),
            ServerError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<JobError> for ServerError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::InvalidJobType(_) | JobError::Validation(_) | JobError::JobActive { .. } => {
                ServerError::BadRequest(e.to_string())
            }
            JobError::NotFound(id) => ServerError::NotFound(format!("job {id} not found")),
            JobError::Forbidden => ServerError::Forbidden,
            JobError::QueueDelivery { ref id, ref source } => {
                error!(job_id = %id, error = %source, "job could not be scheduled");
                ServerError::Unavailable("the job could not be scheduled; please try again".into())
            }
            JobError::Store(_) | JobError::Serialization(_) => ServerError::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}
