//! Error types for EdgeSync core.

use edgesync_codec::CodecError;
use edgesync_kv::KvError;
use thiserror::Error;

/// Result type for store, cache and sync operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in EdgeSync core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The key does not exist.
    #[error("{key} not found")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The key already exists.
    #[error("{key} already exists")]
    AlreadyExists {
        /// The existing key.
        key: String,
    },

    /// An optimistic write lost a race with another writer.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The input failed validation.
    #[error("invalid: {message}")]
    Invalid {
        /// Description of the validation failure.
        message: String,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record at {key}: {message}")]
    Corrupt {
        /// Store key of the record.
        key: String,
        /// Description of the decoding failure.
        message: String,
    },

    /// The backend cannot serve the request.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// A bounded wait expired.
    #[error("timed out: {message}")]
    Timeout {
        /// What was being waited for.
        message: String,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StoreError {
    /// Creates a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an already exists error.
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an invalid input error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Creates a corrupt record error.
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Returns true if retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable { .. })
    }
}

impl From<KvError> for StoreError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::NotFound { key } => Self::NotFound { key },
            KvError::AlreadyExists { key } => Self::AlreadyExists { key },
            KvError::Conflict { message } => Self::Conflict { message },
            KvError::Unavailable { message } => Self::Unavailable { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_errors_convert() {
        assert_eq!(
            StoreError::from(KvError::not_found("App/x")),
            StoreError::not_found("App/x")
        );
        assert!(StoreError::from(KvError::conflict("moved")).is_retryable());
        assert!(StoreError::from(KvError::unavailable("closed")).is_retryable());
    }

    #[test]
    fn retryable_errors() {
        assert!(!StoreError::not_found("k").is_retryable());
        assert!(!StoreError::invalid("bad").is_retryable());
        assert!(!StoreError::Cancelled.is_retryable());
        assert!(!StoreError::timeout("rev:3").is_retryable());
    }

    #[test]
    fn codec_errors_convert() {
        let err: StoreError = CodecError::decoding_failed("eof").into();
        assert!(matches!(err, StoreError::Codec(_)));
        assert_eq!(err.to_string(), "codec error: decoding failed: eof");
    }
}
