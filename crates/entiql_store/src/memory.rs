//! In-memory datastore.

use crate::datastore::{Datastore, Row, RowStream};
use crate::error::{StoreError, StoreResult};
use crate::eval::{contains_aggregate, Evaluator, PatternCache, Scope};
use crate::native::{Expr, JoinKind, Mutation, Select, TableRef, TableSpec};
use entiql_value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;
use tracing::debug;

/// Default number of compiled LIKE patterns kept around.
const DEFAULT_PATTERN_CACHE: usize = 64;

#[derive(Debug, Clone)]
struct Table {
    spec: TableSpec,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    /// Table contents as of `begin_transaction`.
    snapshot: Option<BTreeMap<String, Table>>,
}

/// An in-memory relational datastore.
///
/// Rows live in insertion order, joins are nested loops, and a transaction
/// is a snapshot of every table taken at `begin_transaction`. Identity
/// sequences sit outside the snapshot, so values handed out inside a
/// rolled-back transaction are never reused.
///
/// # Thread Safety
///
/// All state sits behind a `parking_lot` lock; one datastore can be shared
/// across threads through an `Arc`.
///
/// # Example
///
/// ```rust
/// use entiql_store::{Datastore, Expr, InMemoryDatastore, Mutation, Select, TableRef, TableSpec};
///
/// let store = InMemoryDatastore::new();
/// store.ensure_table(&TableSpec::new("team", "id", ["id", "name"])).unwrap();
/// store.execute_mutation(&Mutation::Insert {
///     table: "team".to_string(),
///     values: vec![("id".to_string(), Expr::literal(1)), ("name".to_string(), Expr::literal("teamA"))],
/// }, &[]).unwrap();
///
/// let mut select = Select::from(TableRef::new("team", "t"));
/// select.columns.push(Expr::column("t", "name"));
/// let rows = store.execute_query(&select, &[]).unwrap().collect_rows().unwrap();
/// assert_eq!(rows[0][0].as_text(), Some("teamA"));
/// ```
#[derive(Debug)]
pub struct InMemoryDatastore {
    state: RwLock<State>,
    sequences: Mutex<HashMap<String, i64>>,
    patterns: PatternCache,
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatastore {
    /// Creates an empty datastore.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pattern_cache(
            NonZeroUsize::new(DEFAULT_PATTERN_CACHE).unwrap_or(NonZeroUsize::MIN),
        )
    }

    /// Creates an empty datastore keeping up to `capacity` compiled LIKE
    /// patterns.
    #[must_use]
    pub fn with_pattern_cache(capacity: NonZeroUsize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            sequences: Mutex::new(HashMap::new()),
            patterns: PatternCache::new(capacity),
        }
    }

    /// Creates a datastore holding the given tables.
    ///
    /// # Errors
    ///
    /// Returns an error if any definition is malformed or two conflict.
    pub fn with_tables(specs: impl IntoIterator<Item = TableSpec>) -> StoreResult<Self> {
        let store = Self::new();
        for spec in specs {
            store.ensure_table(&spec)?;
        }
        Ok(store)
    }

    /// Returns the names of all tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.state.read().tables.keys().cloned().collect()
    }

    /// Returns the number of rows in a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    pub fn row_count(&self, table: &str) -> StoreResult<usize> {
        let state = self.state.read();
        lookup(&state.tables, table).map(|t| t.rows.len())
    }

    /// Returns a copy of every row in a table, in store order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    pub fn rows(&self, table: &str) -> StoreResult<Vec<Row>> {
        let state = self.state.read();
        lookup(&state.tables, table).map(|t| t.rows.clone())
    }

    fn run_select(
        state: &State,
        select: &Select,
        params: &[Value],
        patterns: &PatternCache,
    ) -> StoreResult<Vec<Row>> {
        let mut scope = Scope::new();
        let from = lookup(&state.tables, &select.from.table)?;
        scope.push(&select.from.alias, &from.spec)?;

        let mut tuples: Vec<Row> = from.rows.clone();

        for join in &select.joins {
            let right = lookup(&state.tables, &join.table.table)?;
            scope.push(&join.table.alias, &right.spec)?;
            scope.validate(&join.on, params)?;
            let evaluator = Evaluator::new(&scope, params, patterns);

            let mut joined = Vec::with_capacity(tuples.len());
            for left in tuples {
                let mut matched = false;
                for right_row in &right.rows {
                    let mut candidate = left.clone();
                    candidate.extend(right_row.iter().cloned());
                    if evaluator.matches(&join.on, &candidate)? {
                        matched = true;
                        joined.push(candidate);
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut padded = left;
                    padded.resize(scope.width(), Value::Null);
                    joined.push(padded);
                }
            }
            tuples = joined;
        }

        for expr in select
            .filter
            .iter()
            .chain(&select.columns)
            .chain(select.order_by.iter().map(|o| &o.expr))
        {
            scope.validate(expr, params)?;
        }

        let evaluator = Evaluator::new(&scope, params, patterns);

        if let Some(filter) = &select.filter {
            let mut kept = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                if evaluator.matches(filter, &tuple)? {
                    kept.push(tuple);
                }
            }
            tuples = kept;
        }

        let mut rows = if select.columns.iter().any(contains_aggregate) {
            // Aggregates collapse the filtered tuples into one row.
            let folded = select
                .columns
                .iter()
                .map(|c| evaluator.fold_aggregates(c, &tuples))
                .collect::<StoreResult<Vec<_>>>()?;
            let null_tuple = vec![Value::Null; scope.width()];
            let first = tuples.first().unwrap_or(&null_tuple);
            vec![project(&evaluator, &folded, first)?]
        } else {
            if !select.order_by.is_empty() {
                let mut keyed = Vec::with_capacity(tuples.len());
                for tuple in tuples {
                    let keys = select
                        .order_by
                        .iter()
                        .map(|o| evaluator.eval(&o.expr, &tuple))
                        .collect::<StoreResult<Vec<_>>>()?;
                    keyed.push((keys, tuple));
                }
                keyed.sort_by(|(a, _), (b, _)| {
                    for ((x, y), order) in a.iter().zip(b).zip(&select.order_by) {
                        let ordering = x.cmp_total(y);
                        let ordering = if order.descending {
                            ordering.reverse()
                        } else {
                            ordering
                        };
                        if ordering.is_ne() {
                            return ordering;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                tuples = keyed.into_iter().map(|(_, tuple)| tuple).collect();
            }
            tuples
                .iter()
                .map(|tuple| project(&evaluator, &select.columns, tuple))
                .collect::<StoreResult<Vec<_>>>()?
        };

        if select.distinct {
            let mut seen = HashSet::with_capacity(rows.len());
            rows.retain(|row| seen.insert(row.clone()));
        }

        let rows: Vec<Row> = rows
            .into_iter()
            .skip(select.offset)
            .take(select.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(rows)
    }

    fn insert(
        &self,
        tables: &mut BTreeMap<String, Table>,
        table: &str,
        values: &[(String, Expr)],
        params: &[Value],
    ) -> StoreResult<u64> {
        let target = lookup_mut(tables, table)?;
        let scope = Scope::new();
        let evaluator = Evaluator::new(&scope, params, &self.patterns);

        let mut row = vec![Value::Null; target.spec.columns.len()];
        for (column, expr) in values {
            let index = target
                .spec
                .column_index(column)
                .ok_or_else(|| StoreError::unknown_column(table, column))?;
            scope.validate(expr, params)?;
            row[index] = evaluator.eval(expr, &[])?;
        }

        let pk = primary_key_index(&target.spec)?;
        check_key(&target.spec, &row[pk], target.rows.iter().map(|r| &r[pk]))?;
        target.rows.push(row);
        Ok(1)
    }

    fn update(
        &self,
        tables: &mut BTreeMap<String, Table>,
        table: &TableRef,
        assignments: &[(String, Expr)],
        filter: Option<&Expr>,
        params: &[Value],
    ) -> StoreResult<u64> {
        let target = lookup_mut(tables, &table.table)?;
        let mut scope = Scope::new();
        scope.push(&table.alias, &target.spec)?;
        let mut targets = Vec::with_capacity(assignments.len());
        for (column, expr) in assignments {
            let index = target
                .spec
                .column_index(column)
                .ok_or_else(|| StoreError::unknown_column(&table.alias, column))?;
            scope.validate(expr, params)?;
            targets.push((index, expr));
        }
        if let Some(filter) = filter {
            scope.validate(filter, params)?;
        }
        let evaluator = Evaluator::new(&scope, params, &self.patterns);

        let mut rows = target.rows.clone();
        let mut affected = 0;
        for row in &mut rows {
            if let Some(filter) = filter {
                if !evaluator.matches(filter, row)? {
                    continue;
                }
            }
            let new_values = targets
                .iter()
                .map(|(index, expr)| evaluator.eval(expr, row).map(|v| (*index, v)))
                .collect::<StoreResult<Vec<_>>>()?;
            for (index, value) in new_values {
                row[index] = value;
            }
            affected += 1;
        }

        let pk = primary_key_index(&target.spec)?;
        if targets.iter().any(|(index, _)| *index == pk) {
            for (i, row) in rows.iter().enumerate() {
                check_key(
                    &target.spec,
                    &row[pk],
                    rows.iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, r)| &r[pk]),
                )?;
            }
        }

        target.rows = rows;
        Ok(affected)
    }

    fn delete(
        &self,
        tables: &mut BTreeMap<String, Table>,
        table: &TableRef,
        filter: Option<&Expr>,
        params: &[Value],
    ) -> StoreResult<u64> {
        let target = lookup_mut(tables, &table.table)?;
        let mut scope = Scope::new();
        scope.push(&table.alias, &target.spec)?;
        let Some(filter) = filter else {
            let affected = target.rows.len() as u64;
            target.rows.clear();
            return Ok(affected);
        };
        scope.validate(filter, params)?;
        let evaluator = Evaluator::new(&scope, params, &self.patterns);

        let mut kept = Vec::with_capacity(target.rows.len());
        let mut affected = 0;
        for row in &target.rows {
            if evaluator.matches(filter, row)? {
                affected += 1;
            } else {
                kept.push(row.clone());
            }
        }
        target.rows = kept;
        Ok(affected)
    }
}

fn lookup<'a>(tables: &'a BTreeMap<String, Table>, name: &str) -> StoreResult<&'a Table> {
    tables.get(name).ok_or_else(|| StoreError::unknown_table(name))
}

fn lookup_mut<'a>(
    tables: &'a mut BTreeMap<String, Table>,
    name: &str,
) -> StoreResult<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| StoreError::unknown_table(name))
}

fn primary_key_index(spec: &TableSpec) -> StoreResult<usize> {
    spec.column_index(&spec.primary_key)
        .ok_or_else(|| StoreError::unknown_column(&spec.name, &spec.primary_key))
}

fn check_key<'a>(
    spec: &TableSpec,
    key: &Value,
    mut others: impl Iterator<Item = &'a Value>,
) -> StoreResult<()> {
    if key.is_null() {
        return Err(StoreError::constraint_violation(format!(
            "{}.{} must not be null",
            spec.name, spec.primary_key
        )));
    }
    if others.any(|other| other == key) {
        return Err(StoreError::constraint_violation(format!(
            "duplicate key {key} in {}",
            spec.name
        )));
    }
    Ok(())
}

fn project(evaluator: &Evaluator<'_>, columns: &[Expr], tuple: &[Value]) -> StoreResult<Row> {
    columns
        .iter()
        .map(|column| evaluator.eval(column, tuple))
        .collect()
}

impl Datastore for InMemoryDatastore {
    fn ensure_table(&self, spec: &TableSpec) -> StoreResult<()> {
        if spec.column_index(&spec.primary_key).is_none() {
            return Err(StoreError::unknown_column(&spec.name, &spec.primary_key));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = spec.columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(StoreError::constraint_violation(format!(
                "column {dup} appears twice in {}",
                spec.name
            )));
        }

        let mut state = self.state.write();
        match state.tables.get(&spec.name) {
            Some(existing) if existing.spec == *spec => Ok(()),
            Some(_) => Err(StoreError::constraint_violation(format!(
                "table {} already exists with a different definition",
                spec.name
            ))),
            None => {
                debug!(table = %spec.name, columns = spec.columns.len(), "created table");
                state.tables.insert(
                    spec.name.clone(),
                    Table {
                        spec: spec.clone(),
                        rows: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn execute_query(&self, select: &Select, params: &[Value]) -> StoreResult<RowStream> {
        let state = self.state.read();
        let rows = Self::run_select(&state, select, params, &self.patterns)?;
        debug!(table = %select.from.table, joins = select.joins.len(), rows = rows.len(), "executed select");
        Ok(RowStream::from_rows(rows))
    }

    fn execute_mutation(&self, mutation: &Mutation, params: &[Value]) -> StoreResult<u64> {
        let mut state = self.state.write();
        let tables = &mut state.tables;
        let affected = match mutation {
            Mutation::Insert { table, values } => self.insert(tables, table, values, params)?,
            Mutation::Update {
                table,
                assignments,
                filter,
            } => self.update(tables, table, assignments, filter.as_ref(), params)?,
            Mutation::Delete { table, filter } => {
                self.delete(tables, table, filter.as_ref(), params)?
            }
        };
        debug!(kind = mutation.kind(), table = mutation.table(), affected, "executed mutation");
        Ok(affected)
    }

    fn next_identity(&self, table: &str) -> StoreResult<i64> {
        let highest_stored = {
            let state = self.state.read();
            let target = lookup(&state.tables, table)?;
            let pk = primary_key_index(&target.spec)?;
            target
                .rows
                .iter()
                .filter_map(|row| row[pk].as_integer())
                .max()
                .unwrap_or(0)
        };
        let mut sequences = self.sequences.lock();
        let last = sequences.entry(table.to_string()).or_insert(0);
        *last = (*last).max(highest_stored) + 1;
        Ok(*last)
    }

    fn begin_transaction(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        if state.snapshot.is_some() {
            return Err(StoreError::transaction("a transaction is already active"));
        }
        state.snapshot = Some(state.tables.clone());
        debug!("transaction started");
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        if state.snapshot.take().is_none() {
            return Err(StoreError::transaction("no active transaction to commit"));
        }
        debug!("transaction committed");
        Ok(())
    }

    fn rollback(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        let Some(snapshot) = state.snapshot.take() else {
            return Err(StoreError::transaction("no active transaction to roll back"));
        };
        state.tables = snapshot;
        debug!("transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.read().snapshot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{AggregateFunc, BinaryOp, Join, OrderBy};

    fn insert(store: &InMemoryDatastore, table: &str, values: &[(&str, Value)]) {
        store
            .execute_mutation(
                &Mutation::Insert {
                    table: table.to_string(),
                    values: values
                        .iter()
                        .map(|(c, v)| ((*c).to_string(), Expr::Literal(v.clone())))
                        .collect(),
                },
                &[],
            )
            .unwrap();
    }

    fn seeded() -> InMemoryDatastore {
        let store = InMemoryDatastore::with_tables([
            TableSpec::new("team", "id", ["id", "name"]),
            TableSpec::new("member", "id", ["id", "username", "age", "team_id"]),
        ])
        .unwrap();
        insert(&store, "team", &[("id", 1.into()), ("name", "teamA".into())]);
        insert(&store, "team", &[("id", 2.into()), ("name", "teamB".into())]);
        insert(&store, "team", &[("id", 3.into()), ("name", "teamC".into())]);
        for (id, name, age, team) in [
            (10, "member1", 10, Some(1)),
            (11, "member2", 20, Some(1)),
            (12, "member3", 30, Some(2)),
            (13, "member4", 40, None),
        ] {
            insert(
                &store,
                "member",
                &[
                    ("id", id.into()),
                    ("username", name.into()),
                    ("age", age.into()),
                    ("team_id", Value::from(team)),
                ],
            );
        }
        store
    }

    fn query(store: &InMemoryDatastore, select: &Select, params: &[Value]) -> Vec<Row> {
        store
            .execute_query(select, params)
            .unwrap()
            .collect_rows()
            .unwrap()
    }

    fn members() -> Select {
        Select::from(TableRef::new("member", "m"))
    }

    #[test]
    fn select_preserves_store_order() {
        let mut select = members();
        select.columns.push(Expr::column("m", "username"));
        let rows = query(&seeded(), &select, &[]);
        let names: Vec<_> = rows.iter().map(|r| r[0].to_string()).collect();
        assert_eq!(names, vec!["member1", "member2", "member3", "member4"]);
    }

    #[test]
    fn filter_with_parameter() {
        let mut select = members();
        select.columns.push(Expr::column("m", "age"));
        select.filter = Some(Expr::eq(Expr::column("m", "username"), Expr::Param(0)));
        let rows = query(&seeded(), &select, &[Value::from("member2")]);
        assert_eq!(rows, vec![vec![Value::Integer(20)]]);
    }

    #[test]
    fn unbound_parameter_is_reported() {
        let mut select = members();
        select.columns.push(Expr::column("m", "age"));
        select.filter = Some(Expr::eq(Expr::column("m", "username"), Expr::Param(0)));
        assert_eq!(
            seeded().execute_query(&select, &[]).unwrap_err(),
            StoreError::UnboundParameter { index: 0 }
        );
    }

    #[test]
    fn inner_and_left_joins() {
        let store = seeded();
        let join = |kind| Join {
            kind,
            table: TableRef::new("team", "t"),
            on: Expr::eq(Expr::column("m", "team_id"), Expr::column("t", "id")),
        };

        let mut inner = members();
        inner.joins.push(join(JoinKind::Inner));
        inner.columns = vec![Expr::column("m", "username"), Expr::column("t", "name")];
        assert_eq!(query(&store, &inner, &[]).len(), 3);

        let mut left = inner.clone();
        left.joins = vec![join(JoinKind::Left)];
        let rows = query(&store, &left, &[]);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3], vec![Value::from("member4"), Value::Null]);
    }

    #[test]
    fn join_from_one_side_repeats_parent() {
        let mut select = Select::from(TableRef::new("team", "t"));
        select.joins.push(Join {
            kind: JoinKind::Inner,
            table: TableRef::new("member", "m"),
            on: Expr::eq(Expr::column("m", "team_id"), Expr::column("t", "id")),
        });
        select.columns = vec![Expr::column("t", "id")];
        let store = seeded();
        assert_eq!(query(&store, &select, &[]).len(), 3);

        select.distinct = true;
        assert_eq!(
            query(&store, &select, &[]),
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]
        );
    }

    #[test]
    fn order_offset_limit() {
        let mut select = members();
        select.columns.push(Expr::column("m", "age"));
        select.order_by.push(OrderBy {
            expr: Expr::column("m", "age"),
            descending: true,
        });
        select.offset = 1;
        select.limit = Some(2);
        assert_eq!(
            query(&seeded(), &select, &[]),
            vec![vec![Value::Integer(30)], vec![Value::Integer(20)]]
        );
    }

    #[test]
    fn offset_past_end_is_empty() {
        let mut select = members();
        select.columns.push(Expr::column("m", "age"));
        select.offset = 100;
        assert!(query(&seeded(), &select, &[]).is_empty());
    }

    #[test]
    fn aggregate_query_returns_one_row() {
        let mut select = members();
        select.columns = vec![
            Expr::Aggregate {
                func: AggregateFunc::Count,
                arg: None,
                distinct: false,
            },
            Expr::Aggregate {
                func: AggregateFunc::Sum,
                arg: Some(Box::new(Expr::column("m", "age"))),
                distinct: false,
            },
        ];
        let store = seeded();
        assert_eq!(
            query(&store, &select, &[]),
            vec![vec![Value::Integer(4), Value::Integer(100)]]
        );

        select.filter = Some(Expr::binary(
            BinaryOp::Gt,
            Expr::column("m", "age"),
            Expr::literal(1000),
        ));
        assert_eq!(
            query(&store, &select, &[]),
            vec![vec![Value::Integer(0), Value::Null]]
        );
    }

    #[test]
    fn group_concat_function() {
        let mut select = members();
        select.columns.push(Expr::Function {
            name: "group_concat".to_string(),
            args: vec![Expr::column("m", "username")],
        });
        assert_eq!(
            query(&seeded(), &select, &[]),
            vec![vec![Value::from("member1,member2,member3,member4")]]
        );
    }

    #[test]
    fn unknown_function_is_reported() {
        let mut select = members();
        select.columns.push(Expr::Function {
            name: "soundex".to_string(),
            args: vec![Expr::column("m", "username")],
        });
        assert!(matches!(
            seeded().execute_query(&select, &[]),
            Err(StoreError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn unknown_table_and_column() {
        let store = seeded();
        let select = Select::from(TableRef::new("nope", "n"));
        assert_eq!(
            store.execute_query(&select, &[]).unwrap_err(),
            StoreError::unknown_table("nope")
        );

        let mut select = members();
        select.columns.push(Expr::column("m", "nope"));
        assert_eq!(
            store.execute_query(&select, &[]).unwrap_err(),
            StoreError::unknown_column("m", "nope")
        );
    }

    #[test]
    fn update_uses_old_row_values() {
        let store = seeded();
        let affected = store
            .execute_mutation(
                &Mutation::Update {
                    table: TableRef::new("member", "m"),
                    assignments: vec![(
                        "age".to_string(),
                        Expr::binary(BinaryOp::Add, Expr::column("m", "age"), Expr::literal(1)),
                    )],
                    filter: Some(Expr::binary(
                        BinaryOp::Ge,
                        Expr::column("m", "age"),
                        Expr::literal(30),
                    )),
                },
                &[],
            )
            .unwrap();
        assert_eq!(affected, 2);
        let ages: Vec<_> = store
            .rows("member")
            .unwrap()
            .into_iter()
            .map(|r| r[2].clone())
            .collect();
        assert_eq!(
            ages,
            vec![
                Value::Integer(10),
                Value::Integer(20),
                Value::Integer(31),
                Value::Integer(41)
            ]
        );
    }

    #[test]
    fn update_without_filter_touches_every_row() {
        let store = seeded();
        let affected = store
            .execute_mutation(
                &Mutation::Update {
                    table: TableRef::new("member", "m"),
                    assignments: vec![("age".to_string(), Expr::literal(20))],
                    filter: None,
                },
                &[],
            )
            .unwrap();
        assert_eq!(affected, 4);
    }

    #[test]
    fn delete_matching_rows() {
        let store = seeded();
        let affected = store
            .execute_mutation(
                &Mutation::Delete {
                    table: TableRef::new("member", "m"),
                    filter: Some(Expr::IsNull {
                        expr: Box::new(Expr::column("m", "team_id")),
                        negated: false,
                    }),
                },
                &[],
            )
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(store.row_count("member").unwrap(), 3);
    }

    #[test]
    fn duplicate_or_null_key_is_rejected() {
        let store = seeded();
        let dup = Mutation::Insert {
            table: "team".to_string(),
            values: vec![("id".to_string(), Expr::literal(1))],
        };
        assert!(matches!(
            store.execute_mutation(&dup, &[]),
            Err(StoreError::ConstraintViolation { .. })
        ));
        let null = Mutation::Insert {
            table: "team".to_string(),
            values: vec![("name".to_string(), Expr::literal("x"))],
        };
        assert!(matches!(
            store.execute_mutation(&null, &[]),
            Err(StoreError::ConstraintViolation { .. })
        ));
        assert_eq!(store.row_count("team").unwrap(), 3);
    }

    #[test]
    fn identities_skip_stored_keys() {
        let store = seeded();
        assert_eq!(store.next_identity("team").unwrap(), 4);
        assert_eq!(store.next_identity("team").unwrap(), 5);
        assert_eq!(store.next_identity("member").unwrap(), 14);
        assert!(store.next_identity("nope").is_err());
    }

    #[test]
    fn rollback_restores_tables_but_not_sequences() {
        let store = seeded();
        store.begin_transaction().unwrap();
        assert!(store.in_transaction());
        let id = store.next_identity("team").unwrap();
        insert(&store, "team", &[("id", id.into()), ("name", "teamD".into())]);
        assert_eq!(store.row_count("team").unwrap(), 4);

        store.rollback().unwrap();
        assert!(!store.in_transaction());
        assert_eq!(store.row_count("team").unwrap(), 3);
        assert_eq!(store.next_identity("team").unwrap(), id + 1);
    }

    #[test]
    fn transaction_misuse() {
        let store = seeded();
        assert!(store.commit().is_err());
        assert!(store.rollback().is_err());
        store.begin_transaction().unwrap();
        assert!(matches!(
            store.begin_transaction(),
            Err(StoreError::Transaction { .. })
        ));
        store.commit().unwrap();
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let store = seeded();
        store
            .ensure_table(&TableSpec::new("team", "id", ["id", "name"]))
            .unwrap();
        assert!(store
            .ensure_table(&TableSpec::new("team", "id", ["id"]))
            .is_err());
        assert!(store
            .ensure_table(&TableSpec::new("bad", "pk", ["id"]))
            .is_err());
        assert_eq!(store.table_names(), vec!["member", "team"]);
    }
}
