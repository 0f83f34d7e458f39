//! Error types for EntiQL core.

use entiql_store::StoreError;
use entiql_value::ValueError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for query translation.
pub type ParseResult<T> = Result<T, ParseError>;

/// A query that could not be translated.
///
/// Raised at translate time, before anything reaches the datastore.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The query text does not follow the grammar.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset into the query text.
        offset: usize,
        /// What was expected or found.
        message: String,
    },

    /// The entity name is not mapped.
    #[error("unknown entity: {name}")]
    UnknownEntity {
        /// Entity name as written.
        name: String,
    },

    /// A path segment names no field or relation.
    #[error("unknown field {field} on entity {entity}")]
    UnknownField {
        /// Entity the segment was resolved against.
        entity: String,
        /// Missing field name.
        field: String,
    },

    /// A path starts with an alias nothing declares.
    #[error("unknown alias: {alias}")]
    UnknownAlias {
        /// The alias.
        alias: String,
    },

    /// The same alias is declared twice.
    #[error("alias {alias} is declared more than once")]
    AmbiguousAlias {
        /// The alias.
        alias: String,
    },

    /// Operand types do not fit together.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A `case` expression is incomplete or its branches disagree.
    #[error("malformed case expression: {message}")]
    MalformedCase {
        /// Description of the problem.
        message: String,
    },

    /// An enum literal names a label the enumeration does not have.
    #[error("enumeration {enumeration} has no label {label}")]
    UnknownEnumLabel {
        /// Enumeration name.
        enumeration: String,
        /// Offending label.
        label: String,
    },

    /// A constructor projection names an unregistered output shape.
    #[error("unknown output type: {name}")]
    UnknownOutputType {
        /// Type name as written.
        name: String,
    },

    /// A constructor projection passes the wrong number of arguments.
    #[error("constructor {name} takes {expected} argument(s), got {found}")]
    ConstructorArity {
        /// Output shape name.
        name: String,
        /// Declared parameter count.
        expected: usize,
        /// Arguments given.
        found: usize,
    },

    /// A built-in function name is not known.
    #[error("unknown function {name}; use function('{name}', ...) for datastore functions")]
    UnknownFunction {
        /// Function name.
        name: String,
    },

    /// A built-in function was called with the wrong number of arguments.
    #[error("function {name} expects {expected} argument(s), got {found}")]
    FunctionArity {
        /// Function name.
        name: String,
        /// Accepted argument counts.
        expected: String,
        /// Arguments given.
        found: usize,
    },

    /// A path is well-formed but cannot be used where it appears.
    #[error("invalid path {path}: {message}")]
    InvalidPath {
        /// The path as written.
        path: String,
        /// Why it cannot be used.
        message: String,
    },

    /// A fetch join whose owner is not part of the result.
    #[error("invalid fetch join: {message}")]
    InvalidFetch {
        /// Description of the problem.
        message: String,
    },

    /// A select list that cannot be produced.
    #[error("invalid projection: {message}")]
    InvalidProjection {
        /// Description of the problem.
        message: String,
    },
}

impl ParseError {
    /// Creates a syntax error.
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    /// Creates a malformed case error.
    pub fn malformed_case(message: impl Into<String>) -> Self {
        Self::MalformedCase {
            message: message.into(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }
}

/// Errors that can occur in EntiQL core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The query could not be translated.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A declared placeholder has no bound value.
    #[error("missing value for parameter :{name}")]
    MissingParameter {
        /// Placeholder name.
        name: String,
    },

    /// A value was bound to a name the query does not declare.
    #[error("query has no parameter :{name}")]
    UnknownParameter {
        /// Bound name.
        name: String,
    },

    /// A bound value does not fit the placeholder's expected type.
    #[error("parameter :{name} expects {expected}, got {found}")]
    ParameterType {
        /// Placeholder name.
        name: String,
        /// Expected type.
        expected: String,
        /// Description of the bound value.
        found: String,
    },

    /// The datastore failed.
    #[error("datastore error: {0}")]
    Datastore(#[from] StoreError),

    /// A result value could not be converted to the requested type.
    #[error("value conversion error: {0}")]
    Value(#[from] ValueError),

    /// I/O error while loading a registry declaration.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The registry declaration is invalid.
    #[error("mapping error: {message}")]
    Mapping {
        /// Description of the problem.
        message: String,
    },

    /// A value does not fit the field it is assigned to.
    #[error("invalid value for {entity}.{field}: {message}")]
    InvalidValue {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
        /// Description of the problem.
        message: String,
    },

    /// No named query with this name is registered.
    #[error("unknown named query: {name}")]
    UnknownNamedQuery {
        /// Query name.
        name: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A single-result query returned nothing.
    #[error("query returned no result")]
    NoResult,

    /// A single-result query returned more than one result.
    #[error("query returned more than one result")]
    NonUniqueResult,
}

impl CoreError {
    /// Creates a mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::mapping(format!("invalid registry document: {err}"))
    }
}
