//! Expression evaluation for the in-memory datastore.

use crate::error::{StoreError, StoreResult};
use crate::native::{AggregateFunc, BinaryOp, ColumnRef, Expr, TableSpec, UnaryOp};
use entiql_value::Value;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Scalar functions every in-memory evaluation understands.
const SCALAR_FUNCTIONS: &[&str] = &[
    "abs", "coalesce", "concat", "length", "locate", "lower", "mod", "nullif", "substring",
    "trim", "upper",
];

/// Datastore-specific aggregate functions, reachable through `function(...)`.
const AGGREGATE_FUNCTIONS: &[&str] = &["group_concat"];

/// Separator used by `group_concat`.
const GROUP_CONCAT_SEPARATOR: &str = ",";

fn is_known_function(name: &str) -> bool {
    SCALAR_FUNCTIONS.contains(&name) || AGGREGATE_FUNCTIONS.contains(&name)
}

/// The aliased sources of one query, laid out side by side in a tuple.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    sources: Vec<Source>,
    width: usize,
}

#[derive(Debug)]
struct Source {
    alias: String,
    columns: Vec<String>,
    offset: usize,
}

impl Scope {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a source. Its columns follow those already in scope.
    pub(crate) fn push(&mut self, alias: &str, spec: &TableSpec) -> StoreResult<()> {
        if self.sources.iter().any(|s| s.alias == alias) {
            return Err(StoreError::evaluation(format!(
                "alias {alias} is defined twice"
            )));
        }
        self.sources.push(Source {
            alias: alias.to_string(),
            columns: spec.columns.clone(),
            offset: self.width,
        });
        self.width += spec.columns.len();
        Ok(())
    }

    pub(crate) const fn width(&self) -> usize {
        self.width
    }

    pub(crate) fn resolve(&self, column: &ColumnRef) -> StoreResult<usize> {
        let source = self
            .sources
            .iter()
            .find(|s| s.alias == column.alias)
            .ok_or_else(|| StoreError::UnknownAlias {
                alias: column.alias.clone(),
            })?;
        source
            .columns
            .iter()
            .position(|c| *c == column.column)
            .map(|i| source.offset + i)
            .ok_or_else(|| StoreError::unknown_column(&column.alias, &column.column))
    }

    /// Checks column references, parameter indexes and function names
    /// before any row is touched.
    pub(crate) fn validate(&self, expr: &Expr, params: &[Value]) -> StoreResult<()> {
        let mut first_error = None;
        expr.walk(&mut |e| {
            if first_error.is_some() {
                return;
            }
            let result = match e {
                Expr::Column(column) => self.resolve(column).map(|_| ()),
                Expr::Param(index) if *index >= params.len() => {
                    Err(StoreError::UnboundParameter { index: *index })
                }
                Expr::Function { name, .. } if !is_known_function(name) => {
                    Err(StoreError::UnknownFunction { name: name.clone() })
                }
                _ => Ok(()),
            };
            if let Err(err) = result {
                first_error = Some(err);
            }
        });
        first_error.map_or(Ok(()), Err)
    }
}

/// Compiled LIKE patterns, bounded by an LRU policy.
pub(crate) struct PatternCache {
    cache: Mutex<LruCache<String, Arc<Regex>>>,
}

impl PatternCache {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub(crate) fn matches(&self, text: &str, pattern: &str) -> StoreResult<bool> {
        if !pattern.contains(['%', '_']) {
            return Ok(text == pattern);
        }
        if let Some(regex) = self.cache.lock().get(pattern) {
            return Ok(regex.is_match(text));
        }
        let regex = Regex::new(&like_to_regex(pattern))
            .map(Arc::new)
            .map_err(|e| StoreError::evaluation(format!("invalid like pattern: {e}")))?;
        let matched = regex.is_match(text);
        self.cache.lock().put(pattern.to_string(), regex);
        Ok(matched)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl std::fmt::Debug for PatternCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternCache")
            .field("len", &self.cache.lock().len())
            .finish()
    }
}

fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    regex
}

/// Returns true if the expression contains an aggregate anywhere.
pub(crate) fn contains_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| match e {
        Expr::Aggregate { .. } => found = true,
        Expr::Function { name, .. } if AGGREGATE_FUNCTIONS.contains(&name.as_str()) => {
            found = true;
        }
        _ => {}
    });
    found
}

fn truth(value: &Value) -> StoreResult<Option<bool>> {
    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(StoreError::evaluation(format!(
            "expected a boolean, found {}",
            other.type_name()
        ))),
    }
}

fn from_truth(truth: Option<bool>) -> Value {
    truth.map_or(Value::Null, Value::Bool)
}

fn compare(left: &Value, right: &Value) -> StoreResult<Option<Ordering>> {
    if left.is_null() || right.is_null() {
        return Ok(None);
    }
    left.compare(right).map(Some).ok_or_else(|| {
        StoreError::evaluation(format!(
            "cannot compare {} with {}",
            left.type_name(),
            right.type_name()
        ))
    })
}

fn integer_op(op: BinaryOp, a: i64, b: i64) -> StoreResult<Value> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(StoreError::evaluation("division by zero"));
            }
            a.checked_div(b)
        }
        _ => None,
    };
    result
        .map(Value::Integer)
        .ok_or_else(|| StoreError::evaluation("integer overflow"))
}

/// Evaluates expressions against tuples laid out by a [`Scope`].
pub(crate) struct Evaluator<'a> {
    scope: &'a Scope,
    params: &'a [Value],
    patterns: &'a PatternCache,
}

impl<'a> Evaluator<'a> {
    pub(crate) const fn new(
        scope: &'a Scope,
        params: &'a [Value],
        patterns: &'a PatternCache,
    ) -> Self {
        Self {
            scope,
            params,
            patterns,
        }
    }

    /// Evaluates a predicate; unknown counts as not matching.
    pub(crate) fn matches(&self, expr: &Expr, row: &[Value]) -> StoreResult<bool> {
        Ok(truth(&self.eval(expr, row)?)? == Some(true))
    }

    pub(crate) fn eval(&self, expr: &Expr, row: &[Value]) -> StoreResult<Value> {
        match expr {
            Expr::Column(column) => {
                let index = self.scope.resolve(column)?;
                Ok(row.get(index).cloned().unwrap_or(Value::Null))
            }
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Param(index) => self
                .params
                .get(*index)
                .cloned()
                .ok_or(StoreError::UnboundParameter { index: *index }),
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, row)?;
                match op {
                    UnaryOp::Not => Ok(from_truth(truth(&value)?.map(|b| !b))),
                    UnaryOp::Neg => match value {
                        Value::Null => Ok(Value::Null),
                        Value::Integer(n) => n
                            .checked_neg()
                            .map(Value::Integer)
                            .ok_or_else(|| StoreError::evaluation("integer overflow")),
                        other => Err(StoreError::evaluation(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, row),
            Expr::IsNull { expr, negated } => {
                Ok(Value::Bool(self.eval(expr, row)?.is_null() != *negated))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let text = self.eval(expr, row)?;
                let pattern = self.eval(pattern, row)?;
                match (&text, &pattern) {
                    (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                    (Value::Text(t), Value::Text(p)) => {
                        Ok(Value::Bool(self.patterns.matches(t, p)? != *negated))
                    }
                    _ => Err(StoreError::evaluation(format!(
                        "like needs text operands, found {} and {}",
                        text.type_name(),
                        pattern.type_name()
                    ))),
                }
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let value = self.eval(expr, row)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let candidate = self.eval(item, row)?;
                    match compare(&value, &candidate)? {
                        Some(Ordering::Equal) => return Ok(Value::Bool(!negated)),
                        Some(_) => {}
                        None => saw_null = true,
                    }
                }
                if saw_null {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Bool(*negated))
                }
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let value = self.eval(expr, row)?;
                let above = compare(&value, &self.eval(low, row)?)?.map(|o| o != Ordering::Less);
                let below =
                    compare(&value, &self.eval(high, row)?)?.map(|o| o != Ordering::Greater);
                let inside = match (above, below) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
                Ok(from_truth(inside.map(|b| b != *negated)))
            }
            Expr::Case {
                branches,
                otherwise,
            } => {
                for (condition, result) in branches {
                    if self.matches(condition, row)? {
                        return self.eval(result, row);
                    }
                }
                match otherwise {
                    Some(expr) => self.eval(expr, row),
                    None => Ok(Value::Null),
                }
            }
            Expr::Function { name, args } => {
                if AGGREGATE_FUNCTIONS.contains(&name.as_str()) {
                    return Err(StoreError::evaluation(format!(
                        "aggregate {name} used outside an aggregate query"
                    )));
                }
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, row))
                    .collect::<StoreResult<Vec<_>>>()?;
                call_scalar(name, args)
            }
            Expr::Aggregate { .. } => Err(StoreError::evaluation(
                "aggregate used outside an aggregate query",
            )),
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        row: &[Value],
    ) -> StoreResult<Value> {
        if op.is_logical() {
            let l = truth(&self.eval(left, row)?)?;
            let short_circuit = op == BinaryOp::Or;
            if l == Some(short_circuit) {
                return Ok(Value::Bool(short_circuit));
            }
            let r = truth(&self.eval(right, row)?)?;
            return Ok(match (l, r) {
                (_, Some(b)) if b == short_circuit => Value::Bool(short_circuit),
                (Some(_), Some(_)) => Value::Bool(!short_circuit),
                _ => Value::Null,
            });
        }

        let l = self.eval(left, row)?;
        let r = self.eval(right, row)?;

        if op.is_comparison() {
            let Some(ordering) = compare(&l, &r)? else {
                return Ok(Value::Null);
            };
            let result = match op {
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::Ne => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }

        match (&l, &r) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Integer(a), Value::Integer(b)) => integer_op(op, *a, *b),
            _ => Err(StoreError::evaluation(format!(
                "arithmetic needs integers, found {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    /// Replaces every aggregate in `expr` with its value over `rows`.
    pub(crate) fn fold_aggregates(&self, expr: &Expr, rows: &[Vec<Value>]) -> StoreResult<Expr> {
        let mut folded = expr.clone();
        self.fold_in_place(&mut folded, rows)?;
        Ok(folded)
    }

    fn fold_in_place(&self, expr: &mut Expr, rows: &[Vec<Value>]) -> StoreResult<()> {
        let replacement = match expr {
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => Some(self.aggregate(*func, arg.as_deref(), *distinct, rows)?),
            Expr::Function { name, args } if AGGREGATE_FUNCTIONS.contains(&name.as_str()) => {
                Some(self.group_concat(args, rows)?)
            }
            _ => None,
        };
        if let Some(value) = replacement {
            *expr = Expr::Literal(value);
            return Ok(());
        }
        for child in children_mut(expr) {
            self.fold_in_place(child, rows)?;
        }
        Ok(())
    }

    fn argument_values(&self, arg: &Expr, rows: &[Vec<Value>]) -> StoreResult<Vec<Value>> {
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let value = self.eval(arg, row)?;
            if !value.is_null() {
                values.push(value);
            }
        }
        Ok(values)
    }

    fn aggregate(
        &self,
        func: AggregateFunc,
        arg: Option<&Expr>,
        distinct: bool,
        rows: &[Vec<Value>],
    ) -> StoreResult<Value> {
        let Some(arg) = arg else {
            return Ok(Value::Integer(rows.len() as i64));
        };
        let mut values = self.argument_values(arg, rows)?;
        if distinct {
            let mut seen = HashSet::new();
            values.retain(|v| seen.insert(v.clone()));
        }

        match func {
            AggregateFunc::Count => Ok(Value::Integer(values.len() as i64)),
            AggregateFunc::Sum => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                let mut total: i64 = 0;
                for value in &values {
                    let n = value.as_integer().ok_or_else(|| {
                        StoreError::evaluation(format!("cannot sum {}", value.type_name()))
                    })?;
                    total = total
                        .checked_add(n)
                        .ok_or_else(|| StoreError::evaluation("integer overflow"))?;
                }
                Ok(Value::Integer(total))
            }
            AggregateFunc::Min | AggregateFunc::Max => {
                let wanted = if func == AggregateFunc::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let mut best: Option<Value> = None;
                for value in values {
                    best = match best {
                        None => Some(value),
                        Some(current) => {
                            if compare(&value, &current)? == Some(wanted) {
                                Some(value)
                            } else {
                                Some(current)
                            }
                        }
                    };
                }
                Ok(best.unwrap_or(Value::Null))
            }
        }
    }

    fn group_concat(&self, args: &[Expr], rows: &[Vec<Value>]) -> StoreResult<Value> {
        let [arg] = args else {
            return Err(arity_error("group_concat", "1", args.len()));
        };
        let values = self.argument_values(arg, rows)?;
        if values.is_empty() {
            return Ok(Value::Null);
        }
        let joined = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(GROUP_CONCAT_SEPARATOR);
        Ok(Value::Text(joined))
    }
}

fn children_mut(expr: &mut Expr) -> Vec<&mut Expr> {
    match expr {
        Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) => Vec::new(),
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => vec![expr.as_mut()],
        Expr::Binary { left, right, .. } => vec![left.as_mut(), right.as_mut()],
        Expr::Like { expr, pattern, .. } => vec![expr.as_mut(), pattern.as_mut()],
        Expr::InList { expr, list, .. } => {
            let mut children = vec![expr.as_mut()];
            children.extend(list.iter_mut());
            children
        }
        Expr::Between {
            expr, low, high, ..
        } => vec![expr.as_mut(), low.as_mut(), high.as_mut()],
        Expr::Case {
            branches,
            otherwise,
        } => {
            let mut children = Vec::with_capacity(branches.len() * 2 + 1);
            for (condition, result) in branches.iter_mut() {
                children.push(condition);
                children.push(result);
            }
            if let Some(otherwise) = otherwise {
                children.push(otherwise.as_mut());
            }
            children
        }
        Expr::Function { args, .. } => args.iter_mut().collect(),
        Expr::Aggregate { arg, .. } => arg.iter_mut().map(|a| a.as_mut()).collect(),
    }
}

fn arity_error(name: &str, expected: &str, found: usize) -> StoreError {
    StoreError::evaluation(format!(
        "{name} expects {expected} argument(s), got {found}"
    ))
}

fn text_arg<'v>(name: &str, value: &'v Value) -> StoreResult<&'v str> {
    value.as_text().ok_or_else(|| {
        StoreError::evaluation(format!("{name} needs text, found {}", value.type_name()))
    })
}

fn integer_arg(name: &str, value: &Value) -> StoreResult<i64> {
    value.as_integer().ok_or_else(|| {
        StoreError::evaluation(format!(
            "{name} needs an integer, found {}",
            value.type_name()
        ))
    })
}

/// Byte offset of the `n`th character (zero-based), clamped to the end.
fn char_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map_or(text.len(), |(i, _)| i)
}

fn call_scalar(name: &str, args: Vec<Value>) -> StoreResult<Value> {
    match name {
        "coalesce" => {
            if args.is_empty() {
                return Err(arity_error(name, "at least 1", 0));
            }
            return Ok(args
                .into_iter()
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null));
        }
        "nullif" => {
            let [a, b] = args.as_slice() else {
                return Err(arity_error(name, "2", args.len()));
            };
            return Ok(if compare(a, b)? == Some(Ordering::Equal) {
                Value::Null
            } else {
                a.clone()
            });
        }
        _ => {}
    }

    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }

    match (name, args.as_slice()) {
        ("concat", parts) if !parts.is_empty() => Ok(Value::Text(
            parts.iter().map(ToString::to_string).collect::<String>(),
        )),
        ("substring", [text, start, rest @ ..]) if rest.len() <= 1 => {
            let text = text_arg(name, text)?;
            let start = usize::try_from(integer_arg(name, start)?.max(1) - 1).unwrap_or(0);
            let from = char_offset(text, start);
            let tail = &text[from..];
            let result = match rest.first() {
                Some(len) => {
                    let len = integer_arg(name, len)?;
                    let len = usize::try_from(len).map_err(|_| {
                        StoreError::evaluation("substring length must not be negative")
                    })?;
                    &tail[..char_offset(tail, len)]
                }
                None => tail,
            };
            Ok(Value::Text(result.to_string()))
        }
        ("locate", [needle, haystack, rest @ ..]) if rest.len() <= 1 => {
            let needle = text_arg(name, needle)?;
            let haystack = text_arg(name, haystack)?;
            let start = match rest.first() {
                Some(start) => usize::try_from(integer_arg(name, start)?.max(1) - 1).unwrap_or(0),
                None => 0,
            };
            let from = char_offset(haystack, start);
            let position = haystack[from..].find(needle).map_or(0, |byte| {
                haystack[..from + byte].chars().count() + 1
            });
            Ok(Value::Integer(position as i64))
        }
        ("length", [text]) => Ok(Value::Integer(
            text_arg(name, text)?.chars().count() as i64,
        )),
        ("lower", [text]) => Ok(Value::Text(text_arg(name, text)?.to_lowercase())),
        ("upper", [text]) => Ok(Value::Text(text_arg(name, text)?.to_uppercase())),
        ("trim", [text]) => Ok(Value::Text(text_arg(name, text)?.trim().to_string())),
        ("abs", [n]) => integer_arg(name, n)?
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| StoreError::evaluation("integer overflow")),
        ("mod", [a, b]) => {
            let a = integer_arg(name, a)?;
            let b = integer_arg(name, b)?;
            if b == 0 {
                return Err(StoreError::evaluation("division by zero"));
            }
            a.checked_rem(b)
                .map(Value::Integer)
                .ok_or_else(|| StoreError::evaluation("integer overflow"))
        }
        _ if is_known_function(name) => Err(arity_error(name, "a different number of", args.len())),
        _ => Err(StoreError::UnknownFunction {
            name: name.to_string(),
        }),
    }
}
