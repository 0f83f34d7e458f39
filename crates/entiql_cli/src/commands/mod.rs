//! CLI command implementations.

pub mod demo;
pub mod query;

use entiql_core::{CoreError, EntityManager, EntityRegistry, Query};
use entiql_store::{Datastore, InMemoryDatastore};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A `-p` argument is not of the form `name=value`.
    #[error("invalid parameter '{0}', expected name=value")]
    InvalidParameter(String),

    /// The demo scenario does not exist.
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),

    /// Query, lifecycle or mapping failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Result serialization failure.
    #[error("failed to encode result: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Outcome line of a bulk statement.
#[derive(Debug, Serialize)]
struct Affected {
    affected: u64,
}

/// Opens an entity manager over a fresh in-memory store with the
/// registry's tables created.
pub fn open(registry: Arc<EntityRegistry>) -> CliResult<EntityManager> {
    let store = Arc::new(InMemoryDatastore::new());
    registry.create_tables(store.as_ref())?;
    Ok(EntityManager::new(registry, store as Arc<dyn Datastore>))
}

/// Runs a read query and prints each result as one JSON line.
pub fn print_results(query: Query<'_>) -> CliResult<usize> {
    let rows = query.result_list()?;
    for row in &rows {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(rows.len())
}

/// Runs a bulk statement and prints the affected row count.
pub fn print_affected(query: Query<'_>) -> CliResult<u64> {
    let affected = query.execute_update()?;
    println!("{}", serde_json::to_string(&Affected { affected })?);
    Ok(affected)
}
