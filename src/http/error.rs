use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::storage::StorageError;
use crate::upstream::UpstreamFetchError;

#[derive(Error, Debug)]
pub enum AppError {
  #[error("bad request {0}")]
  BadRequest(String),
  #[error("not found {0}")]
  NotFound(&'static str),
  #[error("service unavailable {0}")]
  ServiceUnavailable(String),
  #[error("upstream error {0}")]
  Upstream(UpstreamFetchError),
  #[error("internal server error {0}")]
  InternalServerError(String),
}

impl From<StorageError> for AppError {
  fn from(err: StorageError) -> Self {
    match err {
      StorageError::InvalidKey(key) => AppError::BadRequest(format!("invalid key: {}", key)),
      StorageError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
      err @ (StorageError::Backend(_) | StorageError::ProtocolViolation(_)) => {
        AppError::InternalServerError(err.to_string())
      }
    }
  }
}

impl From<UpstreamFetchError> for AppError {
  fn from(err: UpstreamFetchError) -> Self {
    AppError::Upstream(err)
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
      AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
      AppError::ServiceUnavailable(msg) => {
        error!("storage unavailable: {}", msg);
        (StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable").into_response()
      }
      AppError::Upstream(err) => {
        error!("upstream fetch failed: {}", err);
        let status = err
          .status()
          .and_then(|s| StatusCode::from_u16(s).ok())
          .filter(|s| s.is_client_error() || s.is_server_error())
          .unwrap_or(StatusCode::BAD_GATEWAY);
        (status, "Upstream request failed").into_response()
      }
      AppError::InternalServerError(msg) => {
        error!("internal error: {}", msg);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
      }
    }
  }
}
