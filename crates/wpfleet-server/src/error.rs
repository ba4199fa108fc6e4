// ── HTTP error mapping ──
//
// `ApiError` is the handler-side wrapper that renders a `CoreError` as
// `(status, { error, code })`. `ServerError` covers startup failures.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use wpfleet_api::ErrorBody;
use wpfleet_config::ConfigError;
use wpfleet_core::CoreError;

/// A core error on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::Conflict { .. } => StatusCode::CONFLICT,
            CoreError::Busy { .. } => StatusCode::LOCKED,
            CoreError::Provision { .. } | CoreError::Network { .. } => StatusCode::BAD_GATEWAY,
            CoreError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CoreError::Api { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            CoreError::Storage { .. } | CoreError::Config { .. } | CoreError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let body = Json(ErrorBody {
            error: self.0.to_string(),
            code: Some(self.0.code().to_owned()),
        });
        (status, body).into_response()
    }
}

/// Failure to bring the backend up.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server exited with error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("server task failed: {0}")]
    Join(String),
}
