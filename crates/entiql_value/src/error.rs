//! Error types for value conversions.

use thiserror::Error;

/// Result type for value conversions.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur while converting a [`crate::Value`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The value has a different type than the target.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Name of the requested type.
        expected: &'static str,
        /// Type name of the value that was found.
        found: &'static str,
    },

    /// An integer does not fit the requested width.
    #[error("integer {value} out of range for {target}")]
    OutOfRange {
        /// The value that did not fit.
        value: i64,
        /// Name of the requested integer type.
        target: &'static str,
    },

    /// A row had a different number of columns than the target shape.
    #[error("arity mismatch: expected {expected} columns, found {found}")]
    Arity {
        /// Number of columns the target expects.
        expected: usize,
        /// Number of columns supplied.
        found: usize,
    },
}

impl ValueError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: &'static str, found: &crate::Value) -> Self {
        Self::TypeMismatch {
            expected,
            found: found.type_name(),
        }
    }
}
