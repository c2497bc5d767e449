//! Error types for autobib-core

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for autobib operations
pub type Result<T> = std::result::Result<T, AutobibError>;

/// Main error type for autobib operations
#[derive(Error, Debug)]
pub enum AutobibError {
    /// A PDF name did not match the configured filename patterns
    #[error("Filename error: {0}")]
    Filename(#[from] FilenameError),

    /// A metadata backend failed
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem error on a specific path
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl AutobibError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AutobibError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised when deriving an identity from a PDF filename
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    /// The file is recognised but deliberately not processed (supplementary material, ...)
    #[error("ignored file: {0}")]
    Ignored(String),

    /// The name matches none of the configured patterns
    #[error("filename does not match any configured pattern: {0}")]
    Malformed(String),
}

/// Errors raised by a metadata backend
#[derive(Error, Debug, Clone)]
pub enum LookupError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Timeout")]
    Timeout,

    #[error("Unexpected response: {0}")]
    Parse(String),
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Value is out of valid range
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// A regular expression failed to compile
    #[error("Invalid pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// The config file could not be decoded
    #[error("Could not parse config: {0}")]
    Parse(String),
}
