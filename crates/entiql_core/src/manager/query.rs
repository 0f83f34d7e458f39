//! Executable queries.

use super::EntityManager;
use crate::bulk::execute_bulk;
use crate::context::{EntityRef, PersistenceContext};
use crate::error::{CoreError, CoreResult};
use crate::executor::{Page, QueryExecutor};
use crate::projector::{Projected, Projector};
use crate::query::ExecutionPlan;
use entiql_store::RowStream;
use entiql_value::{FromRow, FromValue, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// A plan with parameter bindings and a page, ready to run.
///
/// Created by [`EntityManager::create_query`]. Builder methods consume and
/// return the query; result methods consume it.
pub struct Query<'em> {
    em: &'em mut EntityManager,
    plan: Arc<ExecutionPlan>,
    bindings: BTreeMap<String, Value>,
    page: Page,
}

impl<'em> Query<'em> {
    pub(crate) fn new(em: &'em mut EntityManager, plan: Arc<ExecutionPlan>) -> Self {
        Self {
            em,
            plan,
            bindings: BTreeMap::new(),
            page: Page::default(),
        }
    }

    /// The translated plan.
    #[must_use]
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Current page.
    #[must_use]
    pub const fn page(&self) -> Page {
        self.page
    }

    /// Binds a named placeholder. A leading `:` is ignored.
    #[must_use]
    pub fn set_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.bindings
            .insert(name.trim_start_matches(':').to_string(), value.into());
        self
    }

    /// Skips the first `offset` results.
    #[must_use]
    pub const fn first_result(mut self, offset: usize) -> Self {
        self.page.offset = offset;
        self
    }

    /// Returns at most `limit` results.
    #[must_use]
    pub const fn max_results(mut self, limit: usize) -> Self {
        self.page.limit = Some(limit);
        self
    }

    fn bind(&self) -> CoreResult<Vec<Value>> {
        QueryExecutor::new(&self.em.registry, self.em.store.as_ref())
            .bind_parameters(&self.plan, &self.bindings)
    }

    /// Runs the query and returns a lazy, single-pass result sequence.
    ///
    /// Pending changes to any entity type the query reads are flushed first
    /// when the flush mode is `Auto`. Queries with a collection fetch join
    /// are projected eagerly so every returned owner carries its complete
    /// collection; their page is applied after de-duplication.
    ///
    /// # Errors
    ///
    /// Returns parameter errors, flush errors, and datastore errors raised
    /// while starting the query. Errors raised while reading rows are
    /// yielded by the sequence.
    pub fn result_stream(self) -> CoreResult<ResultStream<'em>> {
        if self.plan.kind().is_mutation() {
            return Err(CoreError::invalid_operation(
                "update and delete statements run through execute_update",
            ));
        }
        let params = self.bind()?;
        let Self { em, plan, page, .. } = self;
        em.auto_flush(plan.entity_types())?;

        let rows = QueryExecutor::new(&em.registry, em.store.as_ref()).query(&plan, &params, page)?;
        let mut projector = Projector::new(Arc::clone(&plan), &em.registry)?;
        let context = &mut em.context;

        if !plan.requires_deduplication() {
            return Ok(ResultStream {
                source: Source::Rows {
                    rows,
                    projector,
                    context,
                },
            });
        }

        if !page.is_unbounded() {
            warn!(
                query = plan.query(),
                offset = page.offset,
                limit = ?page.limit,
                "collection fetch join with paging; applying the page in memory"
            );
        }
        let mut results = Vec::new();
        for row in rows {
            if let Some(projected) = projector.project(context, &row?)? {
                results.push(projected);
            }
        }
        let results: Vec<Projected> = results
            .into_iter()
            .skip(page.offset)
            .take(page.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(ResultStream {
            source: Source::Buffered(results.into_iter()),
        })
    }

    /// Runs the query and collects every result.
    ///
    /// # Errors
    ///
    /// As [`Self::result_stream`], plus any error raised while reading.
    pub fn result_list(self) -> CoreResult<Vec<Projected>> {
        self.result_stream()?.collect()
    }

    /// Runs the query and returns its only result.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoResult`] or [`CoreError::NonUniqueResult`]
    /// unless exactly one result is produced.
    pub fn single_result(self) -> CoreResult<Projected> {
        let mut stream = self.result_stream()?;
        let first = stream.next().ok_or(CoreError::NoResult)??;
        match stream.next() {
            None => Ok(first),
            Some(Err(err)) => Err(err),
            Some(Ok(_)) => Err(CoreError::NonUniqueResult),
        }
    }

    /// Runs an entity query.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a result is not an entity.
    pub fn entities(self) -> CoreResult<Vec<EntityRef>> {
        self.result_stream()?
            .map(|result| match result? {
                Projected::Entity(entity) => Ok(entity),
                other => Err(CoreError::invalid_operation(format!(
                    "expected an entity result, got {other:?}"
                ))),
            })
            .collect()
    }

    /// Runs a single-column scalar query and converts each value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a result is not a scalar,
    /// or a value error if a conversion fails.
    pub fn scalars<T: FromValue>(self) -> CoreResult<Vec<T>> {
        self.result_stream()?
            .map(|result| match result? {
                Projected::Scalar(value) => Ok(T::from_value(value)?),
                other => Err(CoreError::invalid_operation(format!(
                    "expected a scalar result, got {other:?}"
                ))),
            })
            .collect()
    }

    /// Runs a constructor or scalar query and converts each result row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a result contains an
    /// entity, or a value error if a conversion fails.
    pub fn constructed<T: FromRow>(self) -> CoreResult<Vec<T>> {
        self.result_stream()?
            .map(|result| match result? {
                Projected::Constructed(row) => row.convert(),
                Projected::Scalar(value) => Ok(T::from_row(vec![value])?),
                Projected::Tuple(items) => {
                    let values = items
                        .into_iter()
                        .map(|item| match item {
                            Projected::Scalar(value) => Ok(value),
                            other => Err(CoreError::invalid_operation(format!(
                                "expected scalar tuple items, got {other:?}"
                            ))),
                        })
                        .collect::<CoreResult<Vec<Value>>>()?;
                    Ok(T::from_row(values)?)
                }
                Projected::Entity(entity) => Err(CoreError::invalid_operation(format!(
                    "cannot convert a {} entity into a row",
                    entity.entity_name()
                ))),
            })
            .collect()
    }

    /// Runs a bulk update or delete and returns the number of affected rows.
    ///
    /// The persistence context is flushed first. Cached objects of the
    /// target type are not refreshed; they are flagged as possibly stale.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for a select statement, and
    /// parameter, flush and datastore errors.
    pub fn execute_update(self) -> CoreResult<u64> {
        if !self.plan.kind().is_mutation() {
            return Err(CoreError::invalid_operation(
                "select statements cannot be executed as updates",
            ));
        }
        let params = self.bind()?;
        let em = self.em;
        em.ensure_transaction()?;
        execute_bulk(
            &self.plan,
            &params,
            &em.registry,
            em.store.as_ref(),
            &mut em.context,
        )
    }
}

enum Source<'em> {
    Rows {
        rows: RowStream,
        projector: Projector,
        context: &'em mut PersistenceContext,
    },
    Buffered(std::vec::IntoIter<Projected>),
}

/// Lazy, single-pass sequence of query results.
///
/// Rows are read and projected on demand. The sequence borrows the entity
/// manager's persistence context until dropped; run the query again to
/// iterate a second time.
pub struct ResultStream<'em> {
    source: Source<'em>,
}

impl Iterator for ResultStream<'_> {
    type Item = CoreResult<Projected>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Buffered(results) => results.next().map(Ok),
            Source::Rows {
                rows,
                projector,
                context,
            } => loop {
                let row = match rows.next()? {
                    Ok(row) => row,
                    Err(err) => return Some(Err(err.into())),
                };
                match projector.project(context, &row) {
                    Ok(Some(projected)) => return Some(Ok(projected)),
                    Ok(None) => continue,
                    Err(err) => return Some(Err(err)),
                }
            },
        }
    }
}

impl std::fmt::Debug for ResultStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.source {
            Source::Rows { .. } => "rows",
            Source::Buffered(_) => "buffered",
        };
        f.debug_struct("ResultStream").field("source", &kind).finish()
    }
}
