//! Error types for convoclass

/// Result type alias using convoclass's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for convoclass operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad, incomplete, or cyclic classifier configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Timeout or rate limit from the classification service; eligible for retry
    #[error("transient service error: {0}")]
    Transient(String),

    /// Retries exhausted, or a response outside the declared label schema
    #[error("classification error: {0}")]
    Classification(String),

    /// Non-retryable failure reported by the classification service
    #[error("backend error: {0}")]
    Backend(String),

    /// Unparseable input record
    #[error("malformed input at line {line}: {reason}")]
    MalformedInput { line: usize, reason: String },

    /// Checkpoint artifact could not be read or written
    #[error("checkpoint error for chunk {chunk}: {reason}")]
    Checkpoint { chunk: usize, reason: String },

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout errors
    #[error("operation timed out")]
    Timeout,

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new transient service error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a new classification error
    pub fn classification(msg: impl Into<String>) -> Self {
        Self::Classification(msg.into())
    }

    /// Create a new backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a new malformed input error
    pub fn malformed_input(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            line,
            reason: reason.into(),
        }
    }

    /// Create a new checkpoint error
    pub fn checkpoint(chunk: usize, reason: impl Into<String>) -> Self {
        Self::Checkpoint {
            chunk,
            reason: reason.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the model wrapper may retry the failed call
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::transient("429").is_transient());
        assert!(Error::Timeout.is_transient());
        assert!(!Error::backend("400 bad request").is_transient());
        assert!(!Error::classification("out of schema").is_transient());
    }

    #[test]
    fn test_display() {
        let err = Error::checkpoint(3, "disk full");
        assert_eq!(err.to_string(), "checkpoint error for chunk 3: disk full");

        let err = Error::malformed_input(12, "expected value");
        assert_eq!(err.to_string(), "malformed input at line 12: expected value");
    }
}
