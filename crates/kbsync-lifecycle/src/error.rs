//! Error types for the ingestion lifecycle.

use kbsync_extract::ExtractError;
use thiserror::Error;

/// Cause reported when a plugin's `can_handle` check fails.
pub const PLUGIN_VALIDATION_FAILED: &str = "Plugin validation failed.";

/// Errors raised while running a lifecycle operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed event or request
    #[error("Validation error: {0}")]
    Validation(String),

    /// A plugin's `can_handle` check failed
    #[error("Plugin validation failed: {plugin}: {reason}")]
    PluginValidation { plugin: String, reason: String },

    /// A plugin operation failed
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Text extraction failed
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractError),

    /// Knowledge index call failed
    #[error("Index sync error: {0}")]
    IndexSync(String),

    /// Content repository call failed
    #[error("Repository error: {0}")]
    Repository(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::PluginValidation {
            plugin: "archive".to_string(),
            reason: "corrupt header".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Plugin validation failed: archive: corrupt header"
        );

        let err: SyncError = ExtractError::UnsupportedFormat("a.xyz".to_string()).into();
        assert_eq!(err.to_string(), "Extraction error: Unsupported format: a.xyz");
    }
}
