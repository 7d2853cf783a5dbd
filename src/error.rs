//! Error types for the persona engine

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {

    // =============================
    // Pipeline Conditions
    // =============================

    /// The user has not granted (or has revoked) consent. Distinct and
    /// recoverable: the caller should prompt for consent, not retry.
    #[error("Consent not granted for user {0}")]
    ConsentDenied(Uuid),

    /// A persona definition or recommendation template is invalid.
    /// Detected at catalog load, never per-request.
    #[error("Malformed catalog entry: {0}")]
    MalformedCatalog(String),

    #[error("Unsupported analysis window: {0} days (expected 30 or 180)")]
    InvalidWindow(u32),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Rewrite error: {0}")]
    RewriteError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
