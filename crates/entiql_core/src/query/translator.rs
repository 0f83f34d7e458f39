//! Binds a parsed statement against the registry into an [`ExecutionPlan`].

use super::ast::{
    AstExpr, DeleteStatement, JoinType, PathExpr, RangeDecl, SelectItem, SelectStatement,
    Statement, UpdateStatement,
};
use super::parser::parse;
use super::plan::{
    ExecutionPlan, FetchSpec, JoinClause, ParameterSpec, ParameterType, PlanKind, Projection,
    ProjectionItem, SourceBinding,
};
use crate::error::{ParseError, ParseResult};
use crate::registry::{
    EntityDescriptor, EntityRegistry, FieldDescriptor, FieldType, RelationDescriptor,
};
use entiql_store::{AggregateFunc, BinaryOp, Expr, JoinKind, OrderBy, UnaryOp};
use entiql_value::{Value, ValueType};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Translates query text into an execution plan.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed text or anything that does not
/// bind against the registry.
pub fn translate(query: &str, registry: &EntityRegistry) -> ParseResult<ExecutionPlan> {
    let statement = parse(query)?;
    let mut binder = Binder::new(registry);
    let plan = match statement {
        Statement::Select(select) => binder.select(query, select)?,
        Statement::Update(update) => binder.update(query, update)?,
        Statement::Delete(delete) => binder.delete(query, delete)?,
    };
    debug!(
        kind = ?plan.kind,
        root = %plan.root.entity,
        joins = plan.joins.len(),
        parameters = plan.parameters.len(),
        dedup = plan.requires_deduplication,
        "translated query"
    );
    Ok(plan)
}

/// Static type of a bound expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ExprType {
    Null,
    /// Placeholder or datastore function; checked at run time.
    Unknown,
    Value(ValueType),
    /// Qualified enumeration name.
    Enum(String),
    /// Entity name; the expression is its identity column.
    Entity(String),
}

impl ExprType {
    const BOOL: Self = Self::Value(ValueType::Bool);
    const INTEGER: Self = Self::Value(ValueType::Integer);
    const TEXT: Self = Self::Value(ValueType::Text);

    fn is_concrete(&self) -> bool {
        !matches!(self, Self::Null | Self::Unknown)
    }

    fn compatible(&self, other: &Self) -> bool {
        !self.is_concrete() || !other.is_concrete() || self == other
    }

    fn parameter_type(&self) -> Option<ParameterType> {
        match self {
            Self::Null | Self::Unknown => None,
            Self::Value(ty) => Some(ParameterType::Value(*ty)),
            Self::Enum(name) => Some(ParameterType::Enum(name.clone())),
            Self::Entity(_) => Some(ParameterType::Value(ValueType::Integer)),
        }
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Unknown => f.write_str("unknown"),
            Self::Value(ty) => write!(f, "{ty}"),
            Self::Enum(name) => write!(f, "enum {name}"),
            Self::Entity(name) => write!(f, "entity {name}"),
        }
    }
}

/// A bound expression with what the binder learned about it.
#[derive(Debug, Clone)]
struct Typed {
    expr: Expr,
    ty: ExprType,
    /// Set when the expression is a bare placeholder.
    param: Option<usize>,
    /// Contains an aggregate.
    aggregate: bool,
    /// References a column outside any aggregate.
    bare: bool,
}

impl Typed {
    fn new(expr: Expr, ty: ExprType) -> Self {
        Self {
            expr,
            ty,
            param: None,
            aggregate: false,
            bare: false,
        }
    }

    fn literal(value: Value, ty: ExprType) -> Self {
        Self::new(Expr::Literal(value), ty)
    }

    fn derived(expr: Expr, ty: ExprType, parts: &[&Self]) -> Self {
        Self {
            expr,
            ty,
            param: None,
            aggregate: parts.iter().any(|p| p.aggregate),
            bare: parts.iter().any(|p| p.bare),
        }
    }
}

/// Outcome of resolving a path.
enum Resolved {
    Field {
        alias: String,
        field: FieldDescriptor,
    },
    Entity {
        alias: String,
        entity: Arc<EntityDescriptor>,
    },
    /// Single-valued association as the last segment.
    Reference {
        owner_alias: String,
        owner: Arc<EntityDescriptor>,
        relation: RelationDescriptor,
    },
    /// Collection-valued association as the last segment.
    Collection {
        owner_alias: String,
        owner: Arc<EntityDescriptor>,
        relation: RelationDescriptor,
    },
    EnumLiteral {
        enumeration: String,
        label: String,
    },
}

struct Binder<'r> {
    registry: &'r EntityRegistry,
    sources: Vec<(String, Arc<EntityDescriptor>)>,
    joins: Vec<JoinClause>,
    implicit: HashMap<(String, String), String>,
    parameters: Vec<ParameterSpec>,
    generated: usize,
    /// Bulk statements cannot join.
    allow_joins: bool,
}

impl<'r> Binder<'r> {
    fn new(registry: &'r EntityRegistry) -> Self {
        Self {
            registry,
            sources: Vec::new(),
            joins: Vec::new(),
            implicit: HashMap::new(),
            parameters: Vec::new(),
            generated: 0,
            allow_joins: true,
        }
    }

    fn source(&self, alias: &str) -> Option<&Arc<EntityDescriptor>> {
        self.sources
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, entity)| entity)
    }

    fn declare(&mut self, alias: &str, entity: Arc<EntityDescriptor>) -> ParseResult<()> {
        if self.source(alias).is_some() {
            return Err(ParseError::AmbiguousAlias {
                alias: alias.to_string(),
            });
        }
        self.sources.push((alias.to_string(), entity));
        Ok(())
    }

    fn generate_alias(&mut self) -> String {
        self.generated += 1;
        format!("#{}", self.generated)
    }

    fn bind_root(&mut self, range: &RangeDecl) -> ParseResult<SourceBinding> {
        let entity = Arc::clone(self.registry.require_entity(&range.entity)?);
        let binding = SourceBinding {
            entity: entity.name.clone(),
            alias: range.alias.clone(),
            table: entity.table.clone(),
        };
        self.declare(&range.alias, entity)?;
        Ok(binding)
    }

    fn target_of(&self, relation: &RelationDescriptor) -> ParseResult<Arc<EntityDescriptor>> {
        self.registry
            .require_entity(&relation.target)
            .map(Arc::clone)
    }

    fn join_condition(
        &self,
        owner_alias: &str,
        owner: &EntityDescriptor,
        relation: &RelationDescriptor,
        target_alias: &str,
        target: &EntityDescriptor,
    ) -> ParseResult<Expr> {
        if let Some(join_column) = &relation.join_column {
            return Ok(Expr::eq(
                Expr::column(owner_alias, join_column),
                Expr::column(target_alias, target.id_column()),
            ));
        }
        let owning_column = relation
            .mapped_by
            .as_deref()
            .and_then(|mapped_by| target.find_relation(mapped_by))
            .and_then(|owning| owning.join_column.as_ref())
            .ok_or_else(|| {
                ParseError::invalid_path(
                    format!("{owner_alias}.{}", relation.name),
                    "relation has no owning side",
                )
            })?;
        Ok(Expr::eq(
            Expr::column(target_alias, owning_column),
            Expr::column(owner_alias, owner.id_column()),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn add_join(
        &mut self,
        owner_alias: &str,
        owner: &EntityDescriptor,
        relation: &RelationDescriptor,
        alias: String,
        kind: JoinKind,
        fetch: bool,
        implicit: bool,
    ) -> ParseResult<Arc<EntityDescriptor>> {
        let target = self.target_of(relation)?;
        let on = self.join_condition(owner_alias, owner, relation, &alias, &target)?;
        self.declare(&alias, Arc::clone(&target))?;
        self.joins.push(JoinClause {
            source: SourceBinding {
                entity: target.name.clone(),
                alias,
                table: target.table.clone(),
            },
            kind,
            fetch,
            owner_alias: owner_alias.to_string(),
            relation: relation.name.clone(),
            collection: relation.cardinality.is_collection(),
            implicit,
            on,
        });
        Ok(target)
    }

    /// Inner join implied by navigating a single-valued association.
    fn implicit_join(
        &mut self,
        path: &PathExpr,
        owner_alias: &str,
        owner: &EntityDescriptor,
        relation: &RelationDescriptor,
    ) -> ParseResult<(String, Arc<EntityDescriptor>)> {
        let key = (owner_alias.to_string(), relation.name.clone());
        if let Some(alias) = self.implicit.get(&key) {
            let alias = alias.clone();
            let target = self.target_of(relation)?;
            return Ok((alias, target));
        }
        if !self.allow_joins {
            return Err(ParseError::invalid_path(
                path.text(),
                "bulk statements cannot navigate associations",
            ));
        }
        let alias = self.generate_alias();
        let target = self.add_join(
            owner_alias,
            owner,
            relation,
            alias.clone(),
            JoinKind::Inner,
            false,
            true,
        )?;
        self.implicit.insert(key, alias.clone());
        Ok((alias, target))
    }

    fn resolve(&mut self, path: &PathExpr) -> ParseResult<Resolved> {
        let first = &path.segments[0];
        let Some(root) = self.source(first).cloned() else {
            return self.resolve_enum_literal(path);
        };

        let mut alias = first.clone();
        let mut entity = root;
        let rest = &path.segments[1..];
        for (i, segment) in rest.iter().enumerate() {
            let last = i + 1 == rest.len();
            if let Some(field) = entity.find_field(segment) {
                if !last {
                    return Err(ParseError::invalid_path(
                        path.text(),
                        format!("{segment} is not an association"),
                    ));
                }
                return Ok(Resolved::Field {
                    alias,
                    field: field.clone(),
                });
            }
            let Some(relation) = entity.find_relation(segment).cloned() else {
                return Err(ParseError::unknown_field(&entity.name, segment));
            };
            if last {
                return Ok(if relation.cardinality.is_collection() {
                    Resolved::Collection {
                        owner_alias: alias,
                        owner: entity,
                        relation,
                    }
                } else {
                    Resolved::Reference {
                        owner_alias: alias,
                        owner: entity,
                        relation,
                    }
                });
            }
            if relation.cardinality.is_collection() {
                return Err(ParseError::invalid_path(
                    path.text(),
                    format!("cannot navigate through collection {segment}; join it instead"),
                ));
            }
            let (next_alias, next_entity) = self.implicit_join(path, &alias, &entity, &relation)?;
            alias = next_alias;
            entity = next_entity;
        }
        Ok(Resolved::Entity { alias, entity })
    }

    fn resolve_enum_literal(&self, path: &PathExpr) -> ParseResult<Resolved> {
        if let Some((label, prefix)) = path.segments.split_last() {
            if !prefix.is_empty() {
                if let Some(enumeration) = self.registry.enumeration(&prefix.join(".")) {
                    if !enumeration.has_label(label) {
                        return Err(ParseError::UnknownEnumLabel {
                            enumeration: enumeration.qualified_name(),
                            label: label.clone(),
                        });
                    }
                    return Ok(Resolved::EnumLiteral {
                        enumeration: enumeration.qualified_name(),
                        label: label.clone(),
                    });
                }
            }
        }
        Err(ParseError::UnknownAlias {
            alias: path.segments[0].clone(),
        })
    }

    fn field_type(&self, ty: &FieldType) -> ExprType {
        match ty {
            FieldType::Enum(name) => ExprType::Enum(
                self.registry
                    .enumeration(name)
                    .map_or_else(|| name.clone(), |e| e.qualified_name()),
            ),
            other => ExprType::Value(other.value_type()),
        }
    }

    fn parameter(&mut self, name: &str) -> usize {
        if let Some(index) = self.parameters.iter().position(|p| p.name == name) {
            return index;
        }
        self.parameters.push(ParameterSpec {
            name: name.to_string(),
            expected: ParameterType::Any,
        });
        self.parameters.len() - 1
    }

    /// Requires `operand` to have type `ty`, constraining a bare placeholder.
    fn expect_type(&mut self, operand: &Typed, ty: &ExprType, context: &str) -> ParseResult<()> {
        if let Some(index) = operand.param {
            let Some(expected) = ty.parameter_type() else {
                return Ok(());
            };
            let spec = &mut self.parameters[index];
            if spec.expected == ParameterType::Any {
                spec.expected = expected;
                return Ok(());
            }
            if spec.expected != expected {
                return Err(ParseError::type_mismatch(format!(
                    "parameter :{} is used as both {} and {}",
                    spec.name, spec.expected, expected
                )));
            }
            return Ok(());
        }
        if operand.ty.compatible(ty) {
            Ok(())
        } else {
            Err(ParseError::type_mismatch(format!(
                "{context} expects {ty}, found {}",
                operand.ty
            )))
        }
    }

    /// Checks two operands that must agree, constraining placeholders.
    fn unify(&mut self, left: &Typed, right: &Typed, context: &str) -> ParseResult<ExprType> {
        match (left.param, right.param) {
            (Some(_), Some(_)) => Ok(ExprType::Unknown),
            (Some(_), None) => {
                self.expect_type(left, &right.ty, context)?;
                Ok(right.ty.clone())
            }
            (None, Some(_)) => {
                self.expect_type(right, &left.ty, context)?;
                Ok(left.ty.clone())
            }
            (None, None) => {
                if left.ty.compatible(&right.ty) {
                    Ok(if left.ty.is_concrete() {
                        left.ty.clone()
                    } else {
                        right.ty.clone()
                    })
                } else {
                    Err(ParseError::type_mismatch(format!(
                        "{context}: cannot compare {} with {}",
                        left.ty, right.ty
                    )))
                }
            }
        }
    }

    fn bind_path(&mut self, path: &PathExpr) -> ParseResult<Typed> {
        let typed = match self.resolve(path)? {
            Resolved::Field { alias, field } => {
                let ty = self.field_type(&field.ty);
                Typed::new(Expr::column(alias, field.column), ty)
            }
            Resolved::Entity { alias, entity } => Typed::new(
                Expr::column(alias, entity.id_column()),
                ExprType::Entity(entity.name.clone()),
            ),
            Resolved::Reference {
                owner_alias,
                owner,
                relation,
            } => match &relation.join_column {
                Some(join_column) => Typed::new(
                    Expr::column(owner_alias, join_column),
                    ExprType::Entity(relation.target.clone()),
                ),
                None => {
                    let (alias, target) =
                        self.implicit_join(path, &owner_alias, &owner, &relation)?;
                    Typed::new(
                        Expr::column(alias, target.id_column()),
                        ExprType::Entity(target.name.clone()),
                    )
                }
            },
            Resolved::Collection { .. } => {
                return Err(ParseError::invalid_path(
                    path.text(),
                    "collection-valued paths are only allowed as join sources",
                ))
            }
            Resolved::EnumLiteral { enumeration, label } => {
                return Ok(Typed::literal(
                    Value::Text(label),
                    ExprType::Enum(enumeration),
                ))
            }
        };
        Ok(Typed {
            bare: true,
            ..typed
        })
    }

    fn bind_bool(&mut self, expr: &AstExpr, context: &str) -> ParseResult<Typed> {
        let typed = self.bind_expr(expr)?;
        self.expect_type(&typed, &ExprType::BOOL, context)?;
        Ok(typed)
    }

    fn bind_expr(&mut self, expr: &AstExpr) -> ParseResult<Typed> {
        match expr {
            AstExpr::Path(path) => self.bind_path(path),
            AstExpr::Str(s) => Ok(Typed::literal(Value::Text(s.clone()), ExprType::TEXT)),
            AstExpr::Int(n) => Ok(Typed::literal(Value::Integer(*n), ExprType::INTEGER)),
            AstExpr::Bool(b) => Ok(Typed::literal(Value::Bool(*b), ExprType::BOOL)),
            AstExpr::Null => Ok(Typed::literal(Value::Null, ExprType::Null)),
            AstExpr::Param { name, .. } => {
                let index = self.parameter(name);
                Ok(Typed {
                    param: Some(index),
                    ..Typed::new(Expr::Param(index), ExprType::Unknown)
                })
            }
            AstExpr::Unary { op, expr } => {
                let (ty, context) = match op {
                    UnaryOp::Not => (ExprType::BOOL, "not"),
                    UnaryOp::Neg => (ExprType::INTEGER, "unary minus"),
                };
                let operand = self.bind_expr(expr)?;
                self.expect_type(&operand, &ty, context)?;
                let native = Expr::Unary {
                    op: *op,
                    expr: Box::new(operand.expr.clone()),
                };
                Ok(Typed::derived(native, ty, &[&operand]))
            }
            AstExpr::Binary { op, left, right } => self.bind_binary(*op, left, right),
            AstExpr::IsNull { expr, negated } => {
                let operand = self.bind_expr(expr)?;
                let native = Expr::IsNull {
                    expr: Box::new(operand.expr.clone()),
                    negated: *negated,
                };
                Ok(Typed::derived(native, ExprType::BOOL, &[&operand]))
            }
            AstExpr::Like {
                expr,
                pattern,
                negated,
            } => {
                let operand = self.bind_expr(expr)?;
                let pattern = self.bind_expr(pattern)?;
                self.expect_type(&operand, &ExprType::TEXT, "like")?;
                self.expect_type(&pattern, &ExprType::TEXT, "like pattern")?;
                let native = Expr::Like {
                    expr: Box::new(operand.expr.clone()),
                    pattern: Box::new(pattern.expr.clone()),
                    negated: *negated,
                };
                Ok(Typed::derived(native, ExprType::BOOL, &[&operand, &pattern]))
            }
            AstExpr::InList {
                expr,
                list,
                negated,
            } => {
                let operand = self.bind_expr(expr)?;
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    let item = self.bind_expr(item)?;
                    self.unify(&operand, &item, "in")?;
                    items.push(item);
                }
                let native = Expr::InList {
                    expr: Box::new(operand.expr.clone()),
                    list: items.iter().map(|i| i.expr.clone()).collect(),
                    negated: *negated,
                };
                let mut parts = vec![&operand];
                parts.extend(items.iter());
                Ok(Typed::derived(native, ExprType::BOOL, &parts))
            }
            AstExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let operand = self.bind_expr(expr)?;
                let low = self.bind_expr(low)?;
                let high = self.bind_expr(high)?;
                self.unify(&operand, &low, "between")?;
                self.unify(&operand, &high, "between")?;
                let native = Expr::Between {
                    expr: Box::new(operand.expr.clone()),
                    low: Box::new(low.expr.clone()),
                    high: Box::new(high.expr.clone()),
                    negated: *negated,
                };
                Ok(Typed::derived(
                    native,
                    ExprType::BOOL,
                    &[&operand, &low, &high],
                ))
            }
            AstExpr::Case {
                branches,
                otherwise,
            } => self.bind_case(branches, otherwise.as_deref()),
            AstExpr::Call {
                name,
                args,
                distinct,
                star,
                offset,
            } => self.bind_call(name, args, *distinct, *star, *offset),
            AstExpr::NativeCall { name, args } => {
                let mut native_args = Vec::with_capacity(args.len());
                for arg in args {
                    native_args.push(self.bind_expr(arg)?.expr);
                }
                Ok(Typed::new(
                    Expr::Function {
                        name: name.clone(),
                        args: native_args,
                    },
                    ExprType::Unknown,
                ))
            }
        }
    }

    fn bind_binary(&mut self, op: BinaryOp, left: &AstExpr, right: &AstExpr) -> ParseResult<Typed> {
        let left = self.bind_expr(left)?;
        let right = self.bind_expr(right)?;
        let ty = if op.is_logical() {
            let context = if op == BinaryOp::And { "and" } else { "or" };
            self.expect_type(&left, &ExprType::BOOL, context)?;
            self.expect_type(&right, &ExprType::BOOL, context)?;
            ExprType::BOOL
        } else if op.is_comparison() {
            self.unify(&left, &right, "comparison")?;
            ExprType::BOOL
        } else {
            self.expect_type(&left, &ExprType::INTEGER, "arithmetic")?;
            self.expect_type(&right, &ExprType::INTEGER, "arithmetic")?;
            ExprType::INTEGER
        };
        let native = Expr::binary(op, left.expr.clone(), right.expr.clone());
        Ok(Typed::derived(native, ty, &[&left, &right]))
    }

    fn bind_case(
        &mut self,
        branches: &[(AstExpr, AstExpr)],
        otherwise: Option<&AstExpr>,
    ) -> ParseResult<Typed> {
        let mut bound = Vec::with_capacity(branches.len());
        let mut results = Vec::with_capacity(branches.len() + 1);
        for (condition, result) in branches {
            let condition = self.bind_bool(condition, "case condition")?;
            let result = self.bind_expr(result)?;
            bound.push(condition);
            results.push(result);
        }
        let otherwise = otherwise.map(|e| self.bind_expr(e)).transpose()?;
        if let Some(otherwise) = &otherwise {
            results.push(otherwise.clone());
        }

        let mut ty = ExprType::Null;
        for result in &results {
            if !result.ty.is_concrete() {
                continue;
            }
            if ty.is_concrete() && ty != result.ty {
                return Err(ParseError::malformed_case(format!(
                    "branches have incompatible types {ty} and {}",
                    result.ty
                )));
            }
            ty = result.ty.clone();
        }
        for result in &results {
            if result.param.is_some() {
                self.expect_type(result, &ty, "case branch")?;
            }
        }

        let native = Expr::Case {
            branches: bound
                .iter()
                .zip(&results)
                .map(|(c, r)| (c.expr.clone(), r.expr.clone()))
                .collect(),
            otherwise: otherwise.as_ref().map(|o| Box::new(o.expr.clone())),
        };
        let parts: Vec<&Typed> = bound.iter().chain(results.iter()).collect();
        if !ty.is_concrete() {
            ty = ExprType::Unknown;
        }
        Ok(Typed::derived(native, ty, &parts))
    }

    fn bind_call(
        &mut self,
        name: &str,
        args: &[AstExpr],
        distinct: bool,
        star: bool,
        offset: usize,
    ) -> ParseResult<Typed> {
        let aggregate = match name {
            "count" => Some(AggregateFunc::Count),
            "sum" => Some(AggregateFunc::Sum),
            "min" => Some(AggregateFunc::Min),
            "max" => Some(AggregateFunc::Max),
            _ => None,
        };

        if let Some(func) = aggregate {
            if star && func != AggregateFunc::Count {
                return Err(ParseError::syntax(offset, format!("{name}(*) is not allowed")));
            }
            let arg = if star {
                None
            } else {
                let [arg] = args else {
                    return Err(arity(name, "1", args.len()));
                };
                Some(self.bind_expr(arg)?)
            };
            if arg.as_ref().is_some_and(|a| a.aggregate) {
                return Err(ParseError::type_mismatch(format!(
                    "aggregate {name} cannot contain another aggregate"
                )));
            }
            let ty = match (func, &arg) {
                (AggregateFunc::Count, _) => ExprType::INTEGER,
                (AggregateFunc::Sum, Some(arg)) => {
                    self.expect_type(arg, &ExprType::INTEGER, name)?;
                    ExprType::INTEGER
                }
                (_, Some(arg)) => arg.ty.clone(),
                (_, None) => ExprType::Unknown,
            };
            let native = Expr::Aggregate {
                func,
                arg: arg.map(|a| Box::new(a.expr)),
                distinct,
            };
            return Ok(Typed {
                aggregate: true,
                ..Typed::new(native, ty)
            });
        }

        if distinct || star {
            return Err(ParseError::syntax(
                offset,
                format!("distinct and * are only allowed in aggregates, not in {name}"),
            ));
        }

        if matches!(name, "coalesce" | "nullif") {
            return self.bind_null_function(name, args);
        }

        use ExprType as T;
        let (params, result, min, max) = match name {
            "concat" => (vec![], T::TEXT, 2, usize::MAX),
            "substring" => (vec![T::TEXT, T::INTEGER, T::INTEGER], T::TEXT, 2, 3),
            "locate" => (vec![T::TEXT, T::TEXT, T::INTEGER], T::INTEGER, 2, 3),
            "length" => (vec![T::TEXT], T::INTEGER, 1, 1),
            "lower" | "upper" | "trim" => (vec![T::TEXT], T::TEXT, 1, 1),
            "abs" => (vec![T::INTEGER], T::INTEGER, 1, 1),
            "mod" => (vec![T::INTEGER, T::INTEGER], T::INTEGER, 2, 2),
            _ => {
                return Err(ParseError::UnknownFunction {
                    name: name.to_string(),
                })
            }
        };
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("{min} or {max}")
            };
            return Err(arity(name, &expected, args.len()));
        }

        let mut bound = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let arg = self.bind_expr(arg)?;
            let expected = params.get(i).cloned().unwrap_or(T::TEXT);
            self.expect_type(&arg, &expected, name)?;
            bound.push(arg);
        }
        let native = Expr::Function {
            name: name.to_string(),
            args: bound.iter().map(|a| a.expr.clone()).collect(),
        };
        let parts: Vec<&Typed> = bound.iter().collect();
        Ok(Typed::derived(native, result, &parts))
    }

    /// `coalesce(a, b, ...)` and `nullif(a, b)`: every argument shares one
    /// type, which is also the result type.
    fn bind_null_function(&mut self, name: &str, args: &[AstExpr]) -> ParseResult<Typed> {
        let (min, expected) = if name == "coalesce" {
            (1, "at least 1")
        } else {
            (2, "2")
        };
        if args.len() < min || (name == "nullif" && args.len() != 2) {
            return Err(arity(name, expected, args.len()));
        }
        let bound = args
            .iter()
            .map(|arg| self.bind_expr(arg))
            .collect::<ParseResult<Vec<_>>>()?;
        let mut ty = bound[0].ty.clone();
        for pair in bound.windows(2) {
            let unified = self.unify(&pair[0], &pair[1], name)?;
            if unified.is_concrete() {
                ty = unified;
            }
        }
        let native = Expr::Function {
            name: name.to_string(),
            args: bound.iter().map(|a| a.expr.clone()).collect(),
        };
        let parts: Vec<&Typed> = bound.iter().collect();
        Ok(Typed::derived(native, ty, &parts))
    }

    fn bind_joins(&mut self, select: &SelectStatement) -> ParseResult<bool> {
        let mut requires_deduplication = false;
        for join in &select.joins {
            let (owner_alias, owner, relation) = match self.resolve(&join.path)? {
                Resolved::Reference {
                    owner_alias,
                    owner,
                    relation,
                }
                | Resolved::Collection {
                    owner_alias,
                    owner,
                    relation,
                } => (owner_alias, owner, relation),
                _ => {
                    return Err(ParseError::invalid_path(
                        join.path.text(),
                        "joins need an association path",
                    ))
                }
            };
            let alias = match &join.alias {
                Some(alias) => alias.clone(),
                None => self.generate_alias(),
            };
            let kind = match join.join_type {
                JoinType::Inner => JoinKind::Inner,
                JoinType::Left => JoinKind::Left,
            };
            self.add_join(&owner_alias, &owner, &relation, alias, kind, join.fetch, false)?;
            if join.fetch && relation.cardinality.is_collection() {
                requires_deduplication = true;
            }
        }
        Ok(requires_deduplication)
    }

    fn select(&mut self, query: &str, select: SelectStatement) -> ParseResult<ExecutionPlan> {
        let root = self.bind_root(&select.from)?;
        let requires_deduplication = self.bind_joins(&select)?;

        let mut columns = Vec::new();
        let mut items = Vec::new();
        let mut constructor = None;
        let mut any_aggregate = false;
        let mut any_bare = false;

        for item in &select.items {
            match item {
                SelectItem::Constructor {
                    type_name, args, ..
                } => {
                    if select.items.len() != 1 {
                        return Err(ParseError::InvalidProjection {
                            message: "a constructor must be the only select item".to_string(),
                        });
                    }
                    let (shape, names, aggregate, bare) =
                        self.bind_constructor(type_name, args, &mut columns, &mut items)?;
                    any_aggregate |= aggregate;
                    any_bare |= bare;
                    constructor = Some((shape, names));
                }
                SelectItem::Expr(expr) => {
                    if let Some(entity_item) = self.bind_entity_item(expr, &mut columns)? {
                        items.push(entity_item);
                        any_bare = true;
                        continue;
                    }
                    let typed = self.bind_expr(expr)?;
                    any_aggregate |= typed.aggregate;
                    any_bare |= typed.bare;
                    items.push(ProjectionItem::Scalar {
                        index: columns.len(),
                    });
                    columns.push(typed.expr);
                }
            }
        }

        if any_aggregate && any_bare {
            return Err(ParseError::InvalidProjection {
                message: "aggregates cannot be mixed with plain columns or entities".to_string(),
            });
        }

        let fetches = self.bind_fetches(&items, &mut columns)?;

        let filter = match &select.filter {
            Some(filter) => Some(self.bind_filter(filter)?),
            None => None,
        };

        let mut order_by = Vec::with_capacity(select.order_by.len());
        for item in &select.order_by {
            let typed = self.bind_expr(&item.expr)?;
            order_by.push(OrderBy {
                expr: typed.expr,
                descending: item.descending,
            });
        }

        let projection = match constructor {
            Some((shape, names)) => Projection::Constructor {
                shape,
                names,
                items,
            },
            None if items.len() == 1 => Projection::Single(items.remove(0)),
            None => Projection::Tuple(items),
        };

        Ok(self.finish(
            query,
            PlanKind::Select,
            root,
            filter,
            columns,
            projection,
            fetches,
            order_by,
            select.distinct,
            Vec::new(),
            requires_deduplication,
        ))
    }

    /// Binds `alias` or `alias.association` as a whole-entity projection.
    fn bind_entity_item(
        &mut self,
        expr: &AstExpr,
        columns: &mut Vec<Expr>,
    ) -> ParseResult<Option<ProjectionItem>> {
        let AstExpr::Path(path) = expr else {
            return Ok(None);
        };
        let (alias, entity) = match self.resolve(path)? {
            Resolved::Entity { alias, entity } => (alias, entity),
            Resolved::Reference {
                owner_alias,
                owner,
                relation,
            } => self.implicit_join(path, &owner_alias, &owner, &relation)?,
            Resolved::Collection { .. } => {
                return Err(ParseError::invalid_path(
                    path.text(),
                    "select a collection by joining it",
                ))
            }
            _ => return Ok(None),
        };
        let start = columns.len();
        columns.extend(entity.columns().into_iter().map(|c| Expr::column(&alias, c)));
        Ok(Some(ProjectionItem::Entity {
            entity: entity.name.clone(),
            alias,
            start,
        }))
    }

    /// Returns the shape name, its parameter names, and whether any argument
    /// aggregates or reads a plain column.
    fn bind_constructor(
        &mut self,
        type_name: &str,
        args: &[AstExpr],
        columns: &mut Vec<Expr>,
        items: &mut Vec<ProjectionItem>,
    ) -> ParseResult<(String, Vec<String>, bool, bool)> {
        let mut any_aggregate = false;
        let mut any_bare = false;
        let shape = self
            .registry
            .shape(type_name)
            .cloned()
            .ok_or_else(|| ParseError::UnknownOutputType {
                name: type_name.to_string(),
            })?;
        if shape.params.len() != args.len() {
            return Err(ParseError::ConstructorArity {
                name: shape.name.clone(),
                expected: shape.params.len(),
                found: args.len(),
            });
        }
        for (param, arg) in shape.params.iter().zip(args) {
            let typed = self.bind_expr(arg)?;
            if let ExprType::Entity(entity) = &typed.ty {
                return Err(ParseError::InvalidProjection {
                    message: format!(
                        "constructor argument {} of {} must be a scalar, found entity {entity}",
                        param.name, shape.name
                    ),
                });
            }
            if let Some(ty) = &param.ty {
                let expected = self.field_type(ty);
                self.expect_type(
                    &typed,
                    &expected,
                    &format!("argument {} of {}", param.name, shape.name),
                )?;
            }
            any_aggregate |= typed.aggregate;
            any_bare |= typed.bare;
            items.push(ProjectionItem::Scalar {
                index: columns.len(),
            });
            columns.push(typed.expr);
        }
        let names = shape.params.iter().map(|p| p.name.clone()).collect();
        Ok((shape.name, names, any_aggregate, any_bare))
    }

    fn bind_fetches(
        &self,
        items: &[ProjectionItem],
        columns: &mut Vec<Expr>,
    ) -> ParseResult<Vec<FetchSpec>> {
        let mut materialized: Vec<&str> = items
            .iter()
            .filter_map(|item| match item {
                ProjectionItem::Entity { alias, .. } => Some(alias.as_str()),
                ProjectionItem::Scalar { .. } => None,
            })
            .collect();

        let mut fetches = Vec::new();
        for join in self.joins.iter().filter(|j| j.fetch) {
            if !materialized.contains(&join.owner_alias.as_str()) {
                return Err(ParseError::InvalidFetch {
                    message: format!(
                        "the owner {} of fetched association {} is not selected",
                        join.owner_alias, join.relation
                    ),
                });
            }
            let target = self.registry.require_entity(&join.source.entity)?;
            let start = columns.len();
            columns.extend(
                target
                    .columns()
                    .into_iter()
                    .map(|c| Expr::column(&join.source.alias, c)),
            );
            fetches.push(FetchSpec {
                owner_alias: join.owner_alias.clone(),
                relation: join.relation.clone(),
                entity: target.name.clone(),
                alias: join.source.alias.clone(),
                start,
                collection: join.collection,
            });
            materialized.push(&join.source.alias);
        }
        Ok(fetches)
    }

    fn bind_filter(&mut self, filter: &AstExpr) -> ParseResult<Expr> {
        let typed = self.bind_bool(filter, "where clause")?;
        if typed.aggregate {
            return Err(ParseError::type_mismatch(
                "aggregate functions are not allowed in where clauses",
            ));
        }
        Ok(typed.expr)
    }

    fn update(&mut self, query: &str, update: UpdateStatement) -> ParseResult<ExecutionPlan> {
        self.allow_joins = false;
        let root = self.bind_root(&update.target)?;
        let entity = Arc::clone(self.registry.require_entity(&root.entity)?);

        let mut assignments = Vec::with_capacity(update.assignments.len());
        for (path, value) in &update.assignments {
            let (column, ty, nullable) = self.assignment_target(&root, &entity, path)?;
            let typed = self.bind_expr(value)?;
            if typed.aggregate {
                return Err(ParseError::type_mismatch(
                    "aggregate functions are not allowed in assignments",
                ));
            }
            if typed.ty == ExprType::Null && !nullable {
                return Err(ParseError::type_mismatch(format!(
                    "{} is not nullable",
                    path.text()
                )));
            }
            self.expect_type(&typed, &ty, &format!("assignment to {}", path.text()))?;
            assignments.push((column, typed.expr));
        }

        let filter = match &update.filter {
            Some(filter) => Some(self.bind_filter(filter)?),
            None => None,
        };

        Ok(self.finish(
            query,
            PlanKind::Update,
            root,
            filter,
            Vec::new(),
            Projection::Tuple(Vec::new()),
            Vec::new(),
            Vec::new(),
            false,
            assignments,
            false,
        ))
    }

    fn assignment_target(
        &self,
        root: &SourceBinding,
        entity: &EntityDescriptor,
        path: &PathExpr,
    ) -> ParseResult<(String, ExprType, bool)> {
        let [alias, member] = path.segments.as_slice() else {
            return Err(ParseError::invalid_path(
                path.text(),
                "assignments take the form alias.field",
            ));
        };
        if *alias != root.alias {
            return Err(ParseError::UnknownAlias {
                alias: alias.clone(),
            });
        }
        if *member == entity.id_field {
            return Err(ParseError::invalid_path(
                path.text(),
                "the identity field cannot be assigned",
            ));
        }
        if let Some(field) = entity.find_field(member) {
            return Ok((field.column.clone(), self.field_type(&field.ty), field.nullable));
        }
        match entity.find_relation(member) {
            Some(relation) => match &relation.join_column {
                Some(join_column) => Ok((
                    join_column.clone(),
                    ExprType::Entity(relation.target.clone()),
                    true,
                )),
                None => Err(ParseError::invalid_path(
                    path.text(),
                    "only the owning side of a relation can be assigned",
                )),
            },
            None => Err(ParseError::unknown_field(&entity.name, member)),
        }
    }

    fn delete(&mut self, query: &str, delete: DeleteStatement) -> ParseResult<ExecutionPlan> {
        self.allow_joins = false;
        let root = self.bind_root(&delete.target)?;
        let filter = match &delete.filter {
            Some(filter) => Some(self.bind_filter(filter)?),
            None => None,
        };
        Ok(self.finish(
            query,
            PlanKind::Delete,
            root,
            filter,
            Vec::new(),
            Projection::Tuple(Vec::new()),
            Vec::new(),
            Vec::new(),
            false,
            Vec::new(),
            false,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &mut self,
        query: &str,
        kind: PlanKind,
        root: SourceBinding,
        filter: Option<Expr>,
        columns: Vec<Expr>,
        projection: Projection,
        fetches: Vec<FetchSpec>,
        order_by: Vec<OrderBy>,
        distinct: bool,
        assignments: Vec<(String, Expr)>,
        requires_deduplication: bool,
    ) -> ExecutionPlan {
        let entity_types: BTreeSet<String> = self
            .sources
            .iter()
            .map(|(_, entity)| entity.name.clone())
            .collect();
        ExecutionPlan {
            query: query.to_string(),
            kind,
            root,
            joins: std::mem::take(&mut self.joins),
            filter,
            columns,
            projection,
            fetches,
            order_by,
            distinct,
            parameters: std::mem::take(&mut self.parameters),
            assignments,
            requires_deduplication,
            entity_types,
        }
    }
}

fn arity(name: &str, expected: &str, found: usize) -> ParseError {
    ParseError::FunctionArity {
        name: name.to_string(),
        expected: expected.to_string(),
        found,
    }
}
