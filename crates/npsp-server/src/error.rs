use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use npsp_core::{ErrorKind, NpspError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] NpspError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: ErrorKind,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Core(e) => e.kind(),
            ApiError::MalformedPayload(_) => ErrorKind::Validation,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedPayload(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        match kind {
            ErrorKind::Persistence | ErrorKind::Timeout => error!(%kind, "{}", self),
            _ => warn!(%kind, "{}", self),
        }

        let body = ErrorBody {
            error: self.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}
