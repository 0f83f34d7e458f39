//! Datastore collaborator trait.

use crate::error::StoreResult;
use crate::native::{Mutation, Select, TableSpec};
use entiql_value::Value;
use std::fmt;

/// One output row of a native select.
pub type Row = Vec<Value>;

/// A lazily consumed sequence of rows.
///
/// Rows are pulled one at a time. A datastore may produce them eagerly and
/// hand over an owning iterator, or stream them; callers cannot tell.
pub struct RowStream {
    rows: Box<dyn Iterator<Item = StoreResult<Row>> + Send>,
}

impl RowStream {
    /// Wraps an arbitrary row iterator.
    pub fn new(rows: impl Iterator<Item = StoreResult<Row>> + Send + 'static) -> Self {
        Self {
            rows: Box::new(rows),
        }
    }

    /// Creates a stream over materialized rows.
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(rows.into_iter().map(Ok))
    }

    /// Creates a stream with no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_rows(Vec::new())
    }

    /// Drains the stream into a vector, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the stream.
    pub fn collect_rows(self) -> StoreResult<Vec<Row>> {
        self.collect()
    }
}

impl Iterator for RowStream {
    type Item = StoreResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream").finish_non_exhaustive()
    }
}

/// The relational datastore the query layer runs against.
///
/// A datastore executes native selects and mutations, hands out identity
/// values and offers a single level of transactions. It has no notion of
/// entities: the query layer owns all mapping.
///
/// # Invariants
///
/// - `execute_query` yields rows whose width equals `select.columns.len()`
/// - rows of a select without `order_by` come back in store order
/// - `next_identity` never returns the same value twice for one table,
///   even across rolled-back transactions
/// - implementations must be `Send + Sync` so one store can back several
///   entity managers
///
/// # Implementors
///
/// - [`super::InMemoryDatastore`] - reference implementation used by tests
///   and the CLI
pub trait Datastore: Send + Sync {
    /// Creates a table unless an identical one already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a table with the same name but a different
    /// definition exists, or if the definition is malformed.
    fn ensure_table(&self, spec: &TableSpec) -> StoreResult<()>;

    /// Runs a native select with positional parameters.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tables, columns or functions, unbound
    /// parameters, and evaluation failures.
    fn execute_query(&self, select: &Select, params: &[Value]) -> StoreResult<RowStream>;

    /// Runs a native mutation and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tables or columns, constraint violations
    /// and evaluation failures. A failed mutation changes nothing.
    fn execute_mutation(&self, mutation: &Mutation, params: &[Value]) -> StoreResult<u64>;

    /// Returns a fresh identity value for a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn next_identity(&self, table: &str) -> StoreResult<i64>;

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already active.
    fn begin_transaction(&self) -> StoreResult<()>;

    /// Commits the active transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active.
    fn commit(&self) -> StoreResult<()>;

    /// Rolls back the active transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active.
    fn rollback(&self) -> StoreResult<()>;

    /// Returns true while a transaction is active.
    fn in_transaction(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn row_stream_yields_in_order() {
        let stream = RowStream::from_rows(vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
        let rows = stream.collect_rows().unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
    }

    #[test]
    fn collect_stops_at_error() {
        let stream = RowStream::new(
            vec![
                Ok(vec![Value::Integer(1)]),
                Err(StoreError::connection("gone")),
                Ok(vec![Value::Integer(3)]),
            ]
            .into_iter(),
        );
        assert_eq!(
            stream.collect_rows(),
            Err(StoreError::connection("gone"))
        );
    }

    #[test]
    fn empty_stream() {
        assert_eq!(RowStream::empty().count(), 0);
    }
}
