use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use aulos_net::NetError;

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Request-level error, mapped to a client-facing status.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing url parameter")]
    MissingUrl,

    #[error("invalid base64 parameter: {0}")]
    BadBase64(String),

    #[error("invalid header json: {0}")]
    BadHeaderJson(String),

    #[error("invalid url: {0}")]
    BadUrl(String),

    #[error("invalid method: {0}")]
    BadMethod(String),

    #[error("request body unreadable: {0}")]
    Body(String),

    #[error("origin request for {url} failed: {source}")]
    Origin { url: String, source: NetError },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::BadBase64(_) | Self::BadUrl(_) | Self::BadMethod(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::BadHeaderJson(_) | Self::Body(_) | Self::Origin { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
