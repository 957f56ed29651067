use axum::http::StatusCode;
use thiserror::Error;
use tracing::error;

/// Which unique index a rejected write collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    Email,
    Token,
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueKey::Email => f.write_str("email"),
            UniqueKey::Token => f.write_str("token"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("another user already owns this {0}")]
    Conflict(UniqueKey),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("profile request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("identity provider answered with status {0}")]
    Status(u16),

    #[error("identity provider returned no usable email")]
    MissingEmail,
}

#[derive(Debug, Error)]
#[error("secure randomness unavailable: {0}")]
pub struct TokenError(#[from] pub rand::Error);

/// Hard failures of identity resolution and provisioning.
///
/// Soft outcomes (nothing found, nobody logged in) are never represented here.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("upstream failure: {0}")]
    Upstream(#[from] FetchError),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Randomness(#[from] TokenError),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl IdentityError {
    pub fn status(&self) -> StatusCode {
        match self {
            IdentityError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, IdentityError::Timeout(_))
    }
}

/// Logs a hard error inside the current request span and maps it to a response.
pub fn reject(err: IdentityError) -> (StatusCode, String) {
    let status = err.status();
    error!(error = %err, retryable = err.is_retryable(), "request failed");
    let message = status
        .canonical_reason()
        .unwrap_or("Internal Server Error")
        .to_string();
    (status, message)
}

pub fn forbidden() -> (StatusCode, String) {
    (StatusCode::FORBIDDEN, "Forbidden".into())
}
