//! Error types for the Chronik engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] chronik_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] chronik_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration has an invalid shape.
    #[error("invalid configuration at {key}: {message}")]
    InvalidConfig {
        /// Offending key, e.g. `:store`.
        key: String,
        /// Description of the problem.
        message: String,
    },

    /// A store with this identity already exists.
    #[error("database already exists: {store}")]
    DatabaseExists {
        /// Store identity.
        store: String,
    },

    /// No store with this identity exists.
    #[error("database does not exist: {store}")]
    DatabaseNotFound {
        /// Store identity.
        store: String,
    },

    /// Another process holds the file store lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The log could not be interpreted.
    #[error("corrupt log: {message}")]
    CorruptLog {
        /// Description of the corruption.
        message: String,
    },

    /// Schema violation (unknown attribute, wrong value type, bad definition).
    #[error("schema violation: {message}")]
    Schema {
        /// Description of the violation.
        message: String,
    },

    /// Malformed transaction data.
    #[error("invalid transaction: {message}")]
    Transaction {
        /// Description of the problem.
        message: String,
    },

    /// A unique attribute value is already held by another entity.
    #[error("unique conflict: {attribute} {value} already held by entity {entity}")]
    UniqueConflict {
        /// Attribute ident.
        attribute: String,
        /// Conflicting value, printed as EDN.
        value: String,
        /// Entity currently holding the value.
        entity: i64,
    },

    /// Malformed or unsatisfiable query.
    #[error("query error: {message}")]
    Query {
        /// Description of the problem.
        message: String,
    },

    /// Malformed pull pattern.
    #[error("pull error: {message}")]
    Pull {
        /// Description of the problem.
        message: String,
    },

    /// Temporal view requested on a database that does not keep history.
    #[error("{view} view requires :keep-history? true")]
    HistoryDisabled {
        /// Requested view.
        view: &'static str,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a corrupt log error.
    pub fn corrupt_log(message: impl Into<String>) -> Self {
        Self::CorruptLog {
            message: message.into(),
        }
    }

    /// Creates a schema violation error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates an invalid transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Creates a pull error.
    pub fn pull(message: impl Into<String>) -> Self {
        Self::Pull {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = CoreError::invalid_config(":store", "missing :id");
        assert_eq!(err.to_string(), "invalid configuration at :store: missing :id");
        let err = CoreError::HistoryDisabled { view: "as-of" };
        assert_eq!(err.to_string(), "as-of view requires :keep-history? true");
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = chronik_storage::StorageError::FrameTooLarge { len: 1 }.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
