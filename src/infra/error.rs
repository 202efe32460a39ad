//! Typed failures surfaced to API callers

/// Walk feature error classification
///
/// Every operation fails with exactly one of these; nothing is retried
/// internally. Claim expiry is not an error, it only changes what reads see.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalkError {
    /// Address already held by an active claim, or an invalid state transition
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown session/claim, or a claim owned by another session / already terminal
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad coordinates, radius, TTL or request body
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or unknown credentials
    #[error("unauthorized")]
    Unauthorized,

    /// Storage or serialization failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalkError {
    /// Stable machine-readable kind for API bodies and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            WalkError::Conflict(_) => "conflict",
            WalkError::NotFound(_) => "not_found",
            WalkError::Validation(_) => "validation",
            WalkError::Unauthorized => "unauthorized",
            WalkError::Internal(_) => "internal",
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            WalkError::Conflict(_) => 409,
            WalkError::NotFound(_) => 404,
            WalkError::Validation(_) => 400,
            WalkError::Unauthorized => 401,
            WalkError::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for WalkError {
    fn from(err: serde_json::Error) -> Self {
        WalkError::Validation(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for WalkError {
    fn from(err: std::io::Error) -> Self {
        WalkError::Internal(err.to_string())
    }
}

pub type WalkResult<T> = Result<T, WalkError>;
