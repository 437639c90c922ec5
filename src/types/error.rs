//! Error types for Usher
//!
//! The allocation error taxonomy is carried as explicit kinds so the HTTP
//! layer can map each failure to a status code and a stable `error` string
//! without inspecting message text.

use std::collections::BTreeMap;

use hyper::StatusCode;

/// Field-keyed validation failures from the admin boundary.
///
/// BTreeMap keeps the serialized reason map in a stable order.
pub type FieldErrors = BTreeMap<String, String>;

/// Main error type for Usher operations
#[derive(Debug, thiserror::Error)]
pub enum UsherError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("Deal not found: {0}")]
    DealNotFound(String),

    #[error("No eligible advisers: {0}")]
    NoEligibleAdvisers(String),

    #[error("No availability: {0}")]
    NoAvailability(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("CRM unavailable: {0}")]
    CrmUnavailable(String),

    #[error("CRM update failed: {0}")]
    CrmUpdateFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UsherError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::DealNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NoEligibleAdvisers(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NoAvailability(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::CrmUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::CrmUpdateFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind for the JSON error body
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) | Self::Validation(_) => "InvalidInput",
            Self::DealNotFound(_) => "DealNotFound",
            Self::NoEligibleAdvisers(_) => "NoEligibleAdvisers",
            Self::NoAvailability(_) => "NoAvailability",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::CrmUnavailable(_) => "CrmUnavailable",
            Self::CrmUpdateFailed(_) => "CrmUpdateFailed",
            Self::NotFound(_) => "NotFound",
            Self::Config(_) | Self::Internal(_) => "Internal",
        }
    }

    /// Human-readable detail for the JSON error body.
    ///
    /// Never exposes raw backend errors; those stay in the logs.
    pub fn detail(&self) -> String {
        match self {
            Self::StoreUnavailable(_) => "datastore temporarily unavailable".to_string(),
            Self::CrmUnavailable(_) => "CRM temporarily unavailable".to_string(),
            Self::Internal(_) | Self::Config(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for UsherError {
    fn from(err: StoreError) -> Self {
        match err.kind {
            StoreErrorKind::Unavailable => Self::StoreUnavailable(err.message),
            StoreErrorKind::NotFound => Self::NotFound(err.message),
            StoreErrorKind::InvalidArgument => Self::InvalidInput(err.message),
            StoreErrorKind::PermissionDenied | StoreErrorKind::Conflict => {
                Self::Internal(err.message)
            }
        }
    }
}

impl From<serde_json::Error> for UsherError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for UsherError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Failure kinds for store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Transient; the caller may retry
    Unavailable,
    PermissionDenied,
    /// Required record missing. Optional reads coerce this to empty.
    NotFound,
    /// Concurrent-write conflict; allocation record puts resolve by overwrite
    Conflict,
    InvalidArgument,
}

/// Store gateway failure with an explicit kind
#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::InvalidArgument, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == StoreErrorKind::Unavailable
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::unavailable(err.to_string())
    }
}

/// Result type alias for Usher operations
pub type Result<T> = std::result::Result<T, UsherError>;
