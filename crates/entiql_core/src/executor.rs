//! Query executor: binds parameters, lowers plans to native statements and
//! runs them.

use crate::error::{CoreError, CoreResult};
use crate::query::{ExecutionPlan, ParameterType, PlanKind};
use crate::registry::{EntityDescriptor, EntityRegistry};
use entiql_store::{Datastore, Expr, Join, Mutation, RowStream, Select, TableRef};
use entiql_value::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Offset and limit applied to a read plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    /// Results to skip.
    pub offset: usize,
    /// Maximum results, unbounded when `None`.
    pub limit: Option<usize>,
}

impl Page {
    /// Returns true if the page skips nothing and keeps everything.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.offset == 0 && self.limit.is_none()
    }
}

/// Runs plans against a datastore.
pub(crate) struct QueryExecutor<'a> {
    registry: &'a EntityRegistry,
    store: &'a dyn Datastore,
}

impl<'a> QueryExecutor<'a> {
    pub(crate) fn new(registry: &'a EntityRegistry, store: &'a dyn Datastore) -> Self {
        Self { registry, store }
    }

    /// Validates bindings against the plan's placeholders and returns the
    /// positional parameter list.
    pub(crate) fn bind_parameters(
        &self,
        plan: &ExecutionPlan,
        bindings: &BTreeMap<String, Value>,
    ) -> CoreResult<Vec<Value>> {
        if let Some(name) = bindings
            .keys()
            .find(|name| plan.parameter_index(name).is_none())
        {
            return Err(CoreError::UnknownParameter { name: name.clone() });
        }

        let mut params = Vec::with_capacity(plan.parameters().len());
        for spec in plan.parameters() {
            let value = bindings
                .get(&spec.name)
                .ok_or_else(|| CoreError::MissingParameter {
                    name: spec.name.clone(),
                })?;
            let accepted = spec.expected.accepts(value)
                && match (&spec.expected, value) {
                    (ParameterType::Enum(name), Value::Text(label)) => self
                        .registry
                        .enumeration(name)
                        .is_some_and(|e| e.has_label(label)),
                    _ => true,
                };
            if !accepted {
                return Err(CoreError::ParameterType {
                    name: spec.name.clone(),
                    expected: spec.expected.to_string(),
                    found: describe(value),
                });
            }
            params.push(value.clone());
        }
        Ok(params)
    }

    /// Runs a read plan.
    pub(crate) fn query(
        &self,
        plan: &ExecutionPlan,
        params: &[Value],
        page: Page,
    ) -> CoreResult<RowStream> {
        let select = lower_select(plan, page)?;
        debug!(
            query = plan.query(),
            params = params.len(),
            offset = select.offset,
            limit = ?select.limit,
            "executing query"
        );
        Ok(self.store.execute_query(&select, params)?)
    }

    /// Runs a bulk update or delete plan.
    pub(crate) fn mutate(&self, plan: &ExecutionPlan, params: &[Value]) -> CoreResult<u64> {
        let mutation = lower_mutation(plan)?;
        let affected = self.store.execute_mutation(&mutation, params)?;
        debug!(
            query = plan.query(),
            kind = mutation.kind(),
            affected,
            "executed bulk statement"
        );
        Ok(affected)
    }

    /// Loads rows of one entity matching `filter`, in
    /// [`EntityDescriptor::columns`] layout.
    pub(crate) fn load(
        &self,
        descriptor: &EntityDescriptor,
        filter: Expr,
        params: &[Value],
    ) -> CoreResult<Vec<Vec<Value>>> {
        let select = entity_select(descriptor, "e", Some(filter));
        Ok(self.store.execute_query(&select, params)?.collect_rows()?)
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Text(label) => format!("text '{label}'"),
        other => other.type_name().to_string(),
    }
}

/// Lowers a read plan to a native select.
///
/// Plans that need de-duplication are lowered without offset and limit; the
/// page is applied to the de-duplicated results instead.
pub(crate) fn lower_select(plan: &ExecutionPlan, page: Page) -> CoreResult<Select> {
    if plan.kind() != PlanKind::Select {
        return Err(CoreError::invalid_operation(format!(
            "{:?} statements do not return results; use execute_update",
            plan.kind()
        )));
    }
    let root = plan.root();
    let mut select = Select::from(TableRef::new(&root.table, &root.alias));
    select.joins = plan
        .joins()
        .iter()
        .map(|join| Join {
            kind: join.kind,
            table: TableRef::new(&join.source.table, &join.source.alias),
            on: join.on.clone(),
        })
        .collect();
    select.filter = plan.filter().cloned();
    select.columns = plan.columns().to_vec();
    select.distinct = plan.is_distinct();
    select.order_by = plan.order_by().to_vec();
    if !plan.requires_deduplication() {
        select.offset = page.offset;
        select.limit = page.limit;
    }
    Ok(select)
}

/// Lowers a bulk plan to a native mutation.
pub(crate) fn lower_mutation(plan: &ExecutionPlan) -> CoreResult<Mutation> {
    let root = plan.root();
    let table = TableRef::new(&root.table, &root.alias);
    let filter = plan.filter().cloned();
    match plan.kind() {
        PlanKind::Update => Ok(Mutation::Update {
            table,
            assignments: plan.assignments().to_vec(),
            filter,
        }),
        PlanKind::Delete => Ok(Mutation::Delete { table, filter }),
        PlanKind::Select => Err(CoreError::invalid_operation(
            "select statements cannot be executed as updates",
        )),
    }
}

/// Select of every column of one entity.
pub(crate) fn entity_select(
    descriptor: &EntityDescriptor,
    alias: &str,
    filter: Option<Expr>,
) -> Select {
    let mut select = Select::from(TableRef::new(&descriptor.table, alias));
    select.columns = descriptor
        .columns()
        .into_iter()
        .map(|c| Expr::column(alias, c))
        .collect();
    select.filter = filter;
    select
}
