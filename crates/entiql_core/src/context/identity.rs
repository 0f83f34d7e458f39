//! Object identity.

use entiql_value::Value;
use std::fmt;

/// Entity type plus primary key.
///
/// A persistence context holds at most one live object per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    entity: String,
    key: Value,
}

impl Identity {
    /// Creates an identity.
    pub fn new(entity: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Entity name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Primary key value.
    #[must_use]
    pub const fn key(&self) -> &Value {
        &self.key
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.key)
    }
}
