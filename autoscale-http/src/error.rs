use std::collections::HashSet;

use http::StatusCode;
use thiserror::Error;

/// Raised by `add_error_handling` when a response's status code is not in
/// the configured set of success codes. Carries the body so callers can
/// surface the upstream error message.
#[derive(Debug, Error, Clone)]
#[error("API error code={code}, body={body:?}")]
pub struct ApiError {
    pub code: StatusCode,
    pub body: bytes::Bytes,
}

impl ApiError {
    pub fn new(code: StatusCode, body: bytes::Bytes) -> Self {
        Self { code, body }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("response was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
}

impl HttpError {
    /// Transient failures the step executor (C5) should retry: connection
    /// errors, 429, and 5xx. Matches the "Transient" row of the error
    /// taxonomy in §7.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            HttpError::Api(ApiError { code, .. }) => {
                *code == StatusCode::TOO_MANY_REQUESTS || code.is_server_error()
            }
            HttpError::InvalidJson(_) | HttpError::InvalidUrl(_) | HttpError::Timeout(_) => false,
        }
    }
}

pub(crate) fn check_status(
    success_codes: &HashSet<StatusCode>,
    status: StatusCode,
    body: bytes::Bytes,
) -> Result<bytes::Bytes, HttpError> {
    if success_codes.contains(&status) {
        Ok(body)
    } else {
        Err(ApiError::new(status, body).into())
    }
}
