//! Datastore wrappers for observing and breaking the query layer.

use entiql_store::{
    Datastore, InMemoryDatastore, Mutation, RowStream, Select, StoreError, StoreResult, TableSpec,
};
use entiql_value::Value;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A datastore call, as observed by [`RecordingDatastore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// A select reading the named root table.
    Query(String),
    /// An insert into the table.
    Insert(String),
    /// An update of the table.
    Update(String),
    /// A delete from the table.
    Delete(String),
    /// `begin_transaction`.
    Begin,
    /// `commit`.
    Commit,
    /// `rollback`.
    Rollback,
}

impl StoreCall {
    fn mutation(mutation: &Mutation) -> Self {
        let table = mutation.table().to_string();
        match mutation {
            Mutation::Insert { .. } => Self::Insert(table),
            Mutation::Update { .. } => Self::Update(table),
            Mutation::Delete { .. } => Self::Delete(table),
        }
    }

    /// Returns true for inserts, updates and deletes.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(self, Self::Insert(_) | Self::Update(_) | Self::Delete(_))
    }
}

/// Wraps an [`InMemoryDatastore`] and records every call in order.
#[derive(Debug, Default)]
pub struct RecordingDatastore {
    inner: InMemoryDatastore,
    calls: RwLock<Vec<StoreCall>>,
}

impl RecordingDatastore {
    /// Creates an empty recording store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &InMemoryDatastore {
        &self.inner
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().clone()
    }

    /// Writes so far, in order.
    pub fn writes(&self) -> Vec<StoreCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    /// Number of selects so far.
    pub fn query_count(&self) -> usize {
        self.calls
            .read()
            .iter()
            .filter(|c| matches!(c, StoreCall::Query(_)))
            .count()
    }

    /// Forgets recorded calls.
    pub fn reset(&self) {
        self.calls.write().clear();
    }

    fn record(&self, call: StoreCall) {
        self.calls.write().push(call);
    }
}

impl Datastore for RecordingDatastore {
    fn ensure_table(&self, spec: &TableSpec) -> StoreResult<()> {
        self.inner.ensure_table(spec)
    }

    fn execute_query(&self, select: &Select, params: &[Value]) -> StoreResult<RowStream> {
        self.record(StoreCall::Query(select.from.table.clone()));
        self.inner.execute_query(select, params)
    }

    fn execute_mutation(&self, mutation: &Mutation, params: &[Value]) -> StoreResult<u64> {
        self.record(StoreCall::mutation(mutation));
        self.inner.execute_mutation(mutation, params)
    }

    fn next_identity(&self, table: &str) -> StoreResult<i64> {
        self.inner.next_identity(table)
    }

    fn begin_transaction(&self) -> StoreResult<()> {
        self.record(StoreCall::Begin);
        self.inner.begin_transaction()
    }

    fn commit(&self) -> StoreResult<()> {
        self.record(StoreCall::Commit);
        self.inner.commit()
    }

    fn rollback(&self) -> StoreResult<()> {
        self.record(StoreCall::Rollback);
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

/// A datastore wrapper that fails on demand.
///
/// Writes fail once the configured number of writes has succeeded; queries
/// and commits fail while their switch is set.
pub struct FailingDatastore {
    inner: Arc<dyn Datastore>,
    writes_before_failure: AtomicUsize,
    writes: AtomicUsize,
    fail_queries: AtomicBool,
    fail_commit: AtomicBool,
}

impl FailingDatastore {
    /// Wraps a store. Nothing fails until configured.
    pub fn new(inner: Arc<dyn Datastore>) -> Self {
        Self {
            inner,
            writes_before_failure: AtomicUsize::new(usize::MAX),
            writes: AtomicUsize::new(0),
            fail_queries: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
        }
    }

    /// Wraps a fresh [`InMemoryDatastore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDatastore::new()))
    }

    /// Lets `count` more writes through, then fails every write.
    pub fn fail_writes_after(&self, count: usize) {
        self.writes.store(0, Ordering::SeqCst);
        self.writes_before_failure.store(count, Ordering::SeqCst);
    }

    /// Sets whether selects fail.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Sets whether commits fail.
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Clears every failure switch.
    pub fn reset(&self) {
        self.writes_before_failure.store(usize::MAX, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.fail_queries.store(false, Ordering::SeqCst);
        self.fail_commit.store(false, Ordering::SeqCst);
    }
}

impl Datastore for FailingDatastore {
    fn ensure_table(&self, spec: &TableSpec) -> StoreResult<()> {
        self.inner.ensure_table(spec)
    }

    fn execute_query(&self, select: &Select, params: &[Value]) -> StoreResult<RowStream> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::connection("simulated connection loss"));
        }
        self.inner.execute_query(select, params)
    }

    fn execute_mutation(&self, mutation: &Mutation, params: &[Value]) -> StoreResult<u64> {
        let done = self.writes.fetch_add(1, Ordering::SeqCst);
        if done >= self.writes_before_failure.load(Ordering::SeqCst) {
            return Err(StoreError::constraint_violation(format!(
                "simulated failure on {} of {}",
                mutation.kind(),
                mutation.table()
            )));
        }
        self.inner.execute_mutation(mutation, params)
    }

    fn next_identity(&self, table: &str) -> StoreResult<i64> {
        self.inner.next_identity(table)
    }

    fn begin_transaction(&self) -> StoreResult<()> {
        self.inner.begin_transaction()
    }

    fn commit(&self) -> StoreResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::transaction("simulated commit failure"));
        }
        self.inner.commit()
    }

    fn rollback(&self) -> StoreResult<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}
