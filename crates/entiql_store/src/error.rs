//! Error types for datastore operations.

use thiserror::Error;

/// Result type for datastore operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur inside a datastore.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The referenced table does not exist.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Table name.
        table: String,
    },

    /// The referenced column does not exist in the aliased table.
    #[error("unknown column {alias}.{column}")]
    UnknownColumn {
        /// Table alias used in the query.
        alias: String,
        /// Column name.
        column: String,
    },

    /// A query referenced an alias that no source defines.
    #[error("unknown alias: {alias}")]
    UnknownAlias {
        /// The alias.
        alias: String,
    },

    /// The datastore does not provide the named function.
    #[error("unknown function: {name}")]
    UnknownFunction {
        /// Function name as written in the query.
        name: String,
    },

    /// A positional parameter had no bound value.
    #[error("parameter ?{index} is not bound")]
    UnboundParameter {
        /// Zero-based parameter index.
        index: usize,
    },

    /// A write violated a table constraint.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violation.
        message: String,
    },

    /// An expression could not be evaluated (bad operand types, division by zero).
    #[error("evaluation failed: {message}")]
    Evaluation {
        /// Description of the failure.
        message: String,
    },

    /// Transaction state misuse (nested begin, commit without begin).
    #[error("transaction error: {message}")]
    Transaction {
        /// Description of the misuse.
        message: String,
    },

    /// The datastore is unreachable.
    #[error("connection lost: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an unknown table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Creates an unknown column error.
    pub fn unknown_column(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            alias: alias.into(),
            column: column.into(),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates an evaluation error.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}
