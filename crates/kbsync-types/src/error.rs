//! Error types shared across kbsync crates.

use thiserror::Error;

/// Unified error type for configuration and schema handling.
#[derive(Debug, Error)]
pub enum KbSyncError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KbSyncError::Config("missing work_dir".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing work_dir");

        let err = KbSyncError::InvalidInput("empty user id".to_string());
        assert_eq!(err.to_string(), "Invalid input: empty user id");
    }

    #[test]
    fn test_serialization_error_from() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: KbSyncError = parse.into();
        assert!(err.to_string().starts_with("Serialization error:"));
    }
}
