//! Execution plans.

use entiql_store::{Expr, JoinKind, OrderBy};
use entiql_value::{Value, ValueType};
use std::collections::BTreeSet;
use std::fmt;

/// What a plan does when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    /// Read query.
    Select,
    /// Bulk update.
    Update,
    /// Bulk delete.
    Delete,
}

impl PlanKind {
    /// Returns true for bulk update and delete.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

/// An aliased entity source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBinding {
    /// Entity name.
    pub entity: String,
    /// Alias; generated for implicit and unaliased fetch joins.
    pub alias: String,
    /// Backing table.
    pub table: String,
}

/// A join, explicit or implied by a path.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    /// Joined source.
    pub source: SourceBinding,
    /// Inner or left.
    pub kind: JoinKind,
    /// Whether the target is loaded into the owner's relation slot.
    pub fetch: bool,
    /// Alias of the owning side.
    pub owner_alias: String,
    /// Relation navigated.
    pub relation: String,
    /// True when the relation is collection-valued.
    pub collection: bool,
    /// True for joins added by a path expression.
    pub implicit: bool,
    /// Native join condition.
    pub on: Expr,
}

/// Expected type of a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterType {
    /// Any value.
    Any,
    /// A value of this storage type.
    Value(ValueType),
    /// A label of the named enumeration.
    Enum(String),
}

impl ParameterType {
    /// Returns true if `value` may be bound. Null is always accepted.
    ///
    /// Enum labels are checked by the executor, which holds the registry.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Value(ty) => value.is_compatible(*ty),
            Self::Enum(_) => value.is_compatible(ValueType::Text),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any value"),
            Self::Value(ty) => write!(f, "{ty}"),
            Self::Enum(name) => write!(f, "a {name} label"),
        }
    }
}

/// A named placeholder and its position in the native parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    /// Name without the colon.
    pub name: String,
    /// Expected type.
    pub expected: ParameterType,
}

/// One element of a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionItem {
    /// A whole entity, read from `width` native columns starting at `start`.
    Entity {
        /// Entity name.
        entity: String,
        /// Source alias.
        alias: String,
        /// First native column.
        start: usize,
    },
    /// One native column.
    Scalar {
        /// Native column.
        index: usize,
    },
}

/// Shape of one result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// One item per result.
    Single(ProjectionItem),
    /// Several items per result.
    Tuple(Vec<ProjectionItem>),
    /// Scalars passed positionally to an output shape.
    Constructor {
        /// Output shape name as registered.
        shape: String,
        /// Parameter names, in order.
        names: Vec<String>,
        /// Arguments.
        items: Vec<ProjectionItem>,
    },
}

impl Projection {
    /// Items in result order.
    #[must_use]
    pub fn items(&self) -> &[ProjectionItem] {
        match self {
            Self::Single(item) => std::slice::from_ref(item),
            Self::Tuple(items) | Self::Constructor { items, .. } => items,
        }
    }
}

/// An entity loaded by a fetch join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSpec {
    /// Alias of the entity owning the relation.
    pub owner_alias: String,
    /// Relation filled in.
    pub relation: String,
    /// Target entity name.
    pub entity: String,
    /// Alias of the fetched source.
    pub alias: String,
    /// First native column of the target.
    pub start: usize,
    /// True for collection-valued relations.
    pub collection: bool,
}

/// A translated, immutable query.
///
/// Expressions are already in native form; placeholders appear as
/// positional parameters indexed into [`Self::parameters`]. Plans are
/// shared through the plan cache, so paging lives on the query, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub(crate) query: String,
    pub(crate) kind: PlanKind,
    pub(crate) root: SourceBinding,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) filter: Option<Expr>,
    pub(crate) columns: Vec<Expr>,
    pub(crate) projection: Projection,
    pub(crate) fetches: Vec<FetchSpec>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) distinct: bool,
    pub(crate) parameters: Vec<ParameterSpec>,
    pub(crate) assignments: Vec<(String, Expr)>,
    pub(crate) requires_deduplication: bool,
    pub(crate) entity_types: BTreeSet<String>,
}

impl ExecutionPlan {
    /// Query text the plan was translated from.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Plan kind.
    #[must_use]
    pub const fn kind(&self) -> PlanKind {
        self.kind
    }

    /// Root source.
    #[must_use]
    pub const fn root(&self) -> &SourceBinding {
        &self.root
    }

    /// Joins in evaluation order.
    #[must_use]
    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    /// Native predicate.
    #[must_use]
    pub const fn filter(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    /// Native output columns: projection columns, then fetched columns.
    #[must_use]
    pub fn columns(&self) -> &[Expr] {
        &self.columns
    }

    /// Result shape.
    #[must_use]
    pub const fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Fetch joins, in declaration order.
    #[must_use]
    pub fn fetches(&self) -> &[FetchSpec] {
        &self.fetches
    }

    /// Sort keys.
    #[must_use]
    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Whether `distinct` was requested.
    #[must_use]
    pub const fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Declared placeholders, in native parameter order.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// Column assignments of an update plan.
    #[must_use]
    pub fn assignments(&self) -> &[(String, Expr)] {
        &self.assignments
    }

    /// True when a collection fetch join may repeat root rows.
    #[must_use]
    pub const fn requires_deduplication(&self) -> bool {
        self.requires_deduplication
    }

    /// Every entity type the plan reads or writes.
    #[must_use]
    pub const fn entity_types(&self) -> &BTreeSet<String> {
        &self.entity_types
    }

    /// Position of a placeholder in the native parameter list.
    #[must_use]
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }
}
