//! Storage error types for the index store abstraction layer.

use std::fmt;

/// Errors that can occur during index store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to the storage backend, or the connection dropped.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Description of the connection error.
        message: String,
    },

    /// The backend is temporarily locked or overloaded.
    #[error("Storage busy: {message}")]
    Busy {
        /// Description of the contention.
        message: String,
    },

    /// An error occurred during a transaction.
    #[error("Transaction error: {message}")]
    TransactionError {
        /// Description of the transaction error.
        message: String,
    },

    /// The rows handed to the store are invalid.
    #[error("Invalid resource: {message}")]
    InvalidResource {
        /// Description of why the rows are invalid.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `ConnectionError` error.
    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// Creates a new `Busy` error.
    #[must_use]
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Creates a new `TransactionError` error.
    #[must_use]
    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::TransactionError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidResource` error.
    #[must_use]
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if repeating the same call may succeed.
    ///
    /// The engine never retries on its own; this only classifies the failure for callers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError { .. } | Self::Busy { .. } | Self::TransactionError { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionError { .. } | Self::Busy { .. } => ErrorCategory::Infrastructure,
            Self::TransactionError { .. } => ErrorCategory::Transaction,
            Self::InvalidResource { .. } => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Validation error.
    Validation,
    /// Transaction-related error.
    Transaction,
    /// Infrastructure/connection error.
    Infrastructure,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Transaction => write!(f, "transaction"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::connection_error("connection reset");
        assert_eq!(err.to_string(), "Connection error: connection reset");

        let err = StorageError::busy("database is locked");
        assert_eq!(err.to_string(), "Storage busy: database is locked");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StorageError::connection_error("x").is_retryable());
        assert!(StorageError::busy("x").is_retryable());
        assert!(StorageError::transaction_error("x").is_retryable());
        assert!(!StorageError::internal("x").is_retryable());
        assert!(!StorageError::invalid_resource("x").is_retryable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StorageError::connection_error("x").category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(
            StorageError::invalid_resource("bad rows").category(),
            ErrorCategory::Validation
        );
        assert_eq!(StorageError::internal("x").category().to_string(), "internal");
    }
}
