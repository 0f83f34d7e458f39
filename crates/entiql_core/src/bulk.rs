//! Bulk update and delete.
//!
//! Bulk statements run straight against the datastore. Cached objects are
//! not refreshed; they are flagged as possibly stale instead.

use crate::context::PersistenceContext;
use crate::error::{CoreError, CoreResult};
use crate::executor::QueryExecutor;
use crate::query::ExecutionPlan;
use crate::registry::EntityRegistry;
use entiql_store::Datastore;
use entiql_value::Value;

/// Flushes the context, runs the statement, then marks the target type
/// possibly stale. Returns the number of affected rows.
pub(crate) fn execute_bulk(
    plan: &ExecutionPlan,
    params: &[Value],
    registry: &EntityRegistry,
    store: &dyn Datastore,
    context: &mut PersistenceContext,
) -> CoreResult<u64> {
    if !plan.kind().is_mutation() {
        return Err(CoreError::invalid_operation(
            "only update and delete statements can be executed as updates",
        ));
    }
    context.flush(registry, store)?;
    let affected = QueryExecutor::new(registry, store).mutate(plan, params)?;
    context.mark_stale(&plan.root().entity);
    Ok(affected)
}
