use http::header::InvalidHeaderValue;
use reqwest::StatusCode;
use thiserror::Error;

/// Why an API request did not produce a successful response.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication is enabled but no token could be obtained. Nothing was
    /// sent.
    #[error("No token available: user must be logged in.")]
    NoCredential,

    /// The token cannot be carried in a header. Nothing was sent.
    #[error("token is not a valid Authorization header value")]
    MalformedCredential(#[source] InvalidHeaderValue),

    /// The server answered outside the 2xx range.
    #[error("HTTP {}: {body}", .status.as_u16())]
    Http { status: StatusCode, body: String },

    /// Connection, DNS, TLS and similar failures, as reported by the transport.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Status code of an `Http` error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
