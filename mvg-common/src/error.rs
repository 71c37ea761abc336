//! Common error types for the Multiview grading pipeline

use thiserror::Error;

/// Common result type for Multiview operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the grading pipeline.
///
/// Every variant here is fatal for the submission that raised it; conditions
/// that merely degrade quality (low resolution, moderate classifier
/// confidence) are reported as warnings, not errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Record failed to save or load (wraps sqlx::Error)
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Image could not be decoded (corrupt or unsupported format)
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    /// Image bytes match a previously submitted specimen
    #[error("Duplicate {view} image: previously submitted as specimen {prior_id} at {timestamp}")]
    DuplicateImage {
        view: String,
        prior_id: String,
        timestamp: String,
    },

    /// Oracle could not be reached or returned a transport-level failure
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Oracle replied, but the reply could not be parsed or failed validation
    #[error("Oracle returned malformed response: {0}")]
    OracleMalformedResponse(String),

    /// Missing required fields or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal pipeline error
    #[error("Internal error: {0}")]
    Internal(String),
}
