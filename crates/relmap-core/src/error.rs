//! Core engine error types.

use thiserror::Error;

/// Opaque error surfaced by the external query executor.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Lookup of an unregistered table.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Unknown column/relationship in strict criteria, or a criteria shape
    /// the compiler cannot map onto the schema.
    #[error("validation error on {table}: {message}")]
    Validation {
        /// Table the criteria was compiled against.
        table: String,
        /// What was wrong.
        message: String,
    },

    /// A broken engine precondition, such as deleting a node without a
    /// primary key or registering a malformed definition.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Criteria parse failure.
    #[error("criteria error: {0}")]
    Criteria(#[from] relmap_proto::Error),

    /// Propagated executor failure, wrapped with table and operation
    /// context. Never interpreted or retried.
    #[error("driver error during {operation} on {table}: {source}")]
    Driver {
        /// Table the statement targeted.
        table: String,
        /// Operation being performed (select, insert, update, delete).
        operation: &'static str,
        /// The underlying driver error.
        source: DriverError,
    },
}

impl Error {
    /// Build a validation error for a table.
    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            table: table.into(),
            message: message.into(),
        }
    }
}
