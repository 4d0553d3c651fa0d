//! Error types for kbforge.
//!
//! Library crates use [`KbForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kbforge operations.
#[derive(Debug, thiserror::Error)]
pub enum KbForgeError {
    /// Configuration or input precondition error (unsupported format, missing key).
    #[error("config error: {message}")]
    Config { message: String },

    /// Request or data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Document text extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// LLM backend error (transport, quota, auth, or empty response).
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Task store backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A background job panicked or was aborted.
    #[error("executor error: {0}")]
    Executor(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbForgeError>;

impl KbForgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should be reported to the caller as bad input
    /// rather than as a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = KbForgeError::config("unsupported file format: .pdf");
        assert_eq!(err.to_string(), "config error: unsupported file format: .pdf");

        let err = KbForgeError::Analysis("quota exceeded".into());
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn client_error_classification() {
        assert!(KbForgeError::config("x").is_client_error());
        assert!(KbForgeError::validation("x").is_client_error());
        assert!(!KbForgeError::parse("x").is_client_error());
        assert!(!KbForgeError::Storage("x".into()).is_client_error());
    }
}
