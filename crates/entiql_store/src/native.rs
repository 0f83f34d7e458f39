//! Native query and mutation model.
//!
//! This is the relational form the query layer lowers its execution plans
//! into. It knows tables, aliases and columns; it knows nothing about
//! entities, relationships or identity.

use entiql_value::Value;
use std::fmt;

/// Definition of a table the datastore must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Column names in storage order.
    pub columns: Vec<String>,
    /// Primary-key column; must be one of `columns`.
    pub primary_key: String,
}

impl TableSpec {
    /// Creates a table definition.
    pub fn new(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            primary_key: primary_key.into(),
        }
    }

    /// Returns the position of a column.
    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

/// A table with the alias it is referenced by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Table name.
    pub table: String,
    /// Alias, unique within one query.
    pub alias: String,
}

impl TableRef {
    /// Creates a table reference.
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
        }
    }
}

/// A column qualified by a table alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Table alias.
    pub alias: String,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    /// Creates a column reference.
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.column)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Neg,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `and`
    And,
    /// `or`
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl BinaryOp {
    /// Returns true for the six comparison operators.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    /// Returns true for `and` / `or`.
    #[must_use]
    pub const fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// Aggregate functions understood by every datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    /// Row or value count.
    Count,
    /// Integer sum.
    Sum,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
}

/// A native expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column of an aliased source.
    Column(ColumnRef),
    /// Constant.
    Literal(Value),
    /// Positional parameter, zero-based.
    Param(usize),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `expr is [not] null`.
    IsNull {
        /// Tested expression.
        expr: Box<Expr>,
        /// `is not null` when true.
        negated: bool,
    },
    /// `expr [not] like pattern`.
    Like {
        /// Tested expression.
        expr: Box<Expr>,
        /// Pattern with `%` and `_` wildcards.
        pattern: Box<Expr>,
        /// `not like` when true.
        negated: bool,
    },
    /// `expr [not] in (list)`.
    InList {
        /// Tested expression.
        expr: Box<Expr>,
        /// Candidate values.
        list: Vec<Expr>,
        /// `not in` when true.
        negated: bool,
    },
    /// `expr [not] between low and high`.
    Between {
        /// Tested expression.
        expr: Box<Expr>,
        /// Inclusive lower bound.
        low: Box<Expr>,
        /// Inclusive upper bound.
        high: Box<Expr>,
        /// `not between` when true.
        negated: bool,
    },
    /// Searched case expression.
    Case {
        /// `(condition, result)` pairs, tried in order.
        branches: Vec<(Expr, Expr)>,
        /// Result when no branch matches; null when absent.
        otherwise: Option<Box<Expr>>,
    },
    /// Scalar or datastore-specific function call.
    Function {
        /// Function name, lowercase.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Aggregate over all filtered rows.
    Aggregate {
        /// Aggregate function.
        func: AggregateFunc,
        /// Argument; `None` means `count(*)`.
        arg: Option<Box<Expr>>,
        /// Aggregate distinct values only.
        distinct: bool,
    },
}

impl Expr {
    /// Column expression shorthand.
    pub fn column(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Column(ColumnRef::new(alias, column))
    }

    /// Literal expression shorthand.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Binary expression shorthand.
    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left = right`.
    #[must_use]
    pub fn eq(left: Self, right: Self) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    /// Conjunction of two optional predicates.
    #[must_use]
    pub fn and_opt(left: Option<Self>, right: Option<Self>) -> Option<Self> {
        match (left, right) {
            (Some(l), Some(r)) => Some(Self::binary(BinaryOp::And, l, r)),
            (l, None) => l,
            (None, r) => r,
        }
    }

    /// Visits this expression and all sub-expressions, depth first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        match self {
            Self::Column(_) | Self::Literal(_) | Self::Param(_) => {}
            Self::Unary { expr, .. } | Self::IsNull { expr, .. } => expr.walk(visit),
            Self::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Self::Like { expr, pattern, .. } => {
                expr.walk(visit);
                pattern.walk(visit);
            }
            Self::InList { expr, list, .. } => {
                expr.walk(visit);
                for item in list {
                    item.walk(visit);
                }
            }
            Self::Between {
                expr, low, high, ..
            } => {
                expr.walk(visit);
                low.walk(visit);
                high.walk(visit);
            }
            Self::Case {
                branches,
                otherwise,
            } => {
                for (condition, result) in branches {
                    condition.walk(visit);
                    result.walk(visit);
                }
                if let Some(otherwise) = otherwise {
                    otherwise.walk(visit);
                }
            }
            Self::Function { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Self::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.walk(visit);
                }
            }
        }
    }
}

/// Join kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Only matching pairs.
    Inner,
    /// Every left row, null-extended when nothing matches.
    Left,
}

/// A join against another table.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join kind.
    pub kind: JoinKind,
    /// Joined table.
    pub table: TableRef,
    /// Join condition.
    pub on: Expr,
}

/// Sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Sort expression.
    pub expr: Expr,
    /// Sort descending when true.
    pub descending: bool,
}

/// A native read.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Driving table.
    pub from: TableRef,
    /// Joins, applied in order.
    pub joins: Vec<Join>,
    /// Row filter.
    pub filter: Option<Expr>,
    /// Output columns.
    pub columns: Vec<Expr>,
    /// Remove duplicate output rows.
    pub distinct: bool,
    /// Sort keys.
    pub order_by: Vec<OrderBy>,
    /// Output rows to skip.
    pub offset: usize,
    /// Maximum output rows.
    pub limit: Option<usize>,
}

impl Select {
    /// Creates a select over one table with no columns.
    #[must_use]
    pub fn from(table: TableRef) -> Self {
        Self {
            from: table,
            joins: Vec::new(),
            filter: None,
            columns: Vec::new(),
            distinct: false,
            order_by: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Returns every table the select reads.
    pub fn tables(&self) -> impl Iterator<Item = &TableRef> {
        std::iter::once(&self.from).chain(self.joins.iter().map(|j| &j.table))
    }
}

/// A native write.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert one row. Unlisted columns are null.
    Insert {
        /// Target table.
        table: String,
        /// `(column, value)` pairs.
        values: Vec<(String, Expr)>,
    },
    /// Update every row matching the filter.
    Update {
        /// Target table with alias for the filter.
        table: TableRef,
        /// `(column, new value)` pairs, evaluated against the old row.
        assignments: Vec<(String, Expr)>,
        /// Row filter; all rows when absent.
        filter: Option<Expr>,
    },
    /// Delete every row matching the filter.
    Delete {
        /// Target table with alias for the filter.
        table: TableRef,
        /// Row filter; all rows when absent.
        filter: Option<Expr>,
    },
}

impl Mutation {
    /// Returns the name of the mutated table.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. } => table,
            Self::Update { table, .. } | Self::Delete { table, .. } => &table.table,
        }
    }

    /// Returns a short verb for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}
