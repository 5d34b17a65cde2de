//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.
//!
//! Only `Configuration` and `PathTooLong` ever leave a driver. I/O and decode
//! failures are downgraded to a miss or a `false` result at the driver
//! boundary so that a broken backend degrades to "no cache".

use std::path::PathBuf;

use thiserror::Error;

// == Stash Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum StashError {
    /// Driver or pool could not be constructed with the given settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The derived record path cannot be addressed by the host filesystem
    #[error("Path too long ({} bytes, limit {limit}): {}", path.as_os_str().len(), path.display())]
    PathTooLong {
        /// The path that was rejected
        path: PathBuf,
        /// Host ceiling in bytes
        limit: usize,
    },

    /// Underlying storage failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be parsed
    #[error("Decode error: {0}")]
    Decode(String),

    /// A cache key was rejected
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, StashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_too_long_message() {
        let err = StashError::PathTooLong {
            path: PathBuf::from("/tmp/abc"),
            limit: 4,
        };
        let message = err.to_string();
        assert!(message.contains("8 bytes"));
        assert!(message.contains("limit 4"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: StashError = io.into();
        assert!(matches!(err, StashError::Io(_)));
    }
}
