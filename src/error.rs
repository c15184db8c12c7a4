//! Error types for the review pipeline.
//!
//! Only `Validation` ever escapes `coordinate`. Collaborator failures and
//! timeouts are captured on the task that produced them.

use thiserror::Error;

pub type ReviewResult<T> = Result<T, ReviewError>;

#[derive(Error, Debug)]
pub enum ReviewError {
    /// Structurally invalid input: empty collaborator list, zero timeout,
    /// oversized or undecodable document.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A collaborator's own analysis failed.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The collaborator observed its cancellation signal.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReviewError::Validation("no collaborators".to_string());
        assert_eq!(err.to_string(), "Validation error: no collaborators");

        let err = ReviewError::Timeout(std::time::Duration::from_millis(150));
        assert_eq!(err.to_string(), "Timed out after 150ms");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.md");
        let err: ReviewError = io.into();
        assert!(matches!(err, ReviewError::Io(_)));
    }
}
