use reqwest::StatusCode;
use thiserror::Error;

/// Failures reported by an identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The provider answered with an error status, e.g. `INVALID_PASSWORD`
    /// or `TOKEN_EXPIRED`.
    #[error("identity provider rejected the request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("identity provider returned an unexpected payload: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}
