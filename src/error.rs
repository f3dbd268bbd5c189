//! Error types for director operations.
//!
//! This module defines [`DirectorError`], the primary error type used
//! throughout the crate, and a [`Result`] type alias for convenience.
//!
//! Command failures, spawn failures, and cancellations are *statuses* on the
//! step tree, not errors; `DirectorError` covers only the problems that abort
//! a run before any step starts (bad script text, bad option values, broken
//! environment declarations, unreadable files).

use thiserror::Error;

/// Core error type for director operations.
#[derive(Debug, Error)]
pub enum DirectorError {
    /// Script text failed to parse.
    #[error("script parse error: {message}")]
    Parse { message: String },

    /// A recognized option carried a value the engine cannot use.
    #[error("invalid value '{value}' for option '{option}': {message}")]
    InvalidOption {
        option: String,
        value: String,
        message: String,
    },

    /// An env declaration re-introduces its own substitution token after one
    /// expansion pass, which would otherwise loop forever.
    #[error("environment variable '{name}' re-introduces '${name}' after expansion")]
    EnvSelfReference { name: String },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for director operations.
pub type Result<T> = std::result::Result<T, DirectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_displays_message() {
        let err = DirectorError::Parse {
            message: "unexpected token at line 3".into(),
        };
        assert!(err.to_string().contains("unexpected token at line 3"));
    }

    #[test]
    fn invalid_option_displays_option_and_value() {
        let err = DirectorError::InvalidOption {
            option: "multiplicity".into(),
            value: "many".into(),
            message: "expected a positive integer".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("multiplicity"));
        assert!(msg.contains("many"));
        assert!(msg.contains("positive integer"));
    }

    #[test]
    fn env_self_reference_displays_name() {
        let err = DirectorError::EnvSelfReference {
            name: "PATH".into(),
        };
        assert!(err.to_string().contains("PATH"));
        assert!(err.to_string().contains("$PATH"));
    }

    #[test]
    fn io_error_converts_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: DirectorError = io_err.into();
        assert!(matches!(err, DirectorError::Io(_)));
    }

    #[test]
    fn result_type_alias_works() {
        fn returns_error() -> Result<()> {
            Err(DirectorError::Parse {
                message: "test".into(),
            })
        }
        assert!(returns_error().is_err());
    }
}
