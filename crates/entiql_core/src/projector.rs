//! Result projector: turns native rows into entities, scalars, tuples and
//! constructed rows.

use crate::context::{EntityRef, Identity, PersistenceContext};
use crate::error::{CoreError, CoreResult};
use crate::query::{ExecutionPlan, FetchSpec, Projection, ProjectionItem};
use crate::registry::{EntityDescriptor, EntityRegistry};
use entiql_value::{FromRow, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// One query result.
#[derive(Debug, Clone)]
pub enum Projected {
    /// A tracked entity.
    Entity(EntityRef),
    /// A single value; also a null entity from an outer join.
    Scalar(Value),
    /// Several items, in select-list order.
    Tuple(Vec<Projected>),
    /// Values passed to an output shape. Never tracked.
    Constructed(ConstructedRow),
}

impl Projected {
    /// The entity, if this is one.
    #[must_use]
    pub const fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// The value, if this is a scalar.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

impl Serialize for Projected {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Entity(entity) => entity.serialize(serializer),
            Self::Scalar(value) => value.serialize(serializer),
            Self::Tuple(items) => items.serialize(serializer),
            Self::Constructed(row) => row.serialize(serializer),
        }
    }
}

/// Result of a `new T(...)` projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructedRow {
    type_name: String,
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl ConstructedRow {
    /// Output shape name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Parameter names, in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Values, in parameter order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of a named parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.values[i])
    }

    /// Consumes the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Converts the row into a caller type.
    ///
    /// # Errors
    ///
    /// Returns a value error if the arity or a value type does not match.
    pub fn convert<T: FromRow>(self) -> CoreResult<T> {
        Ok(T::from_row(self.values)?)
    }
}

impl Serialize for ConstructedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry("@type", &self.type_name)?;
        for (name, value) in self.names.iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Projects the rows of one plan. Holds the de-duplication state, so one
/// projector serves exactly one execution.
pub(crate) struct Projector {
    plan: Arc<ExecutionPlan>,
    descriptors: HashMap<String, Arc<EntityDescriptor>>,
    constructor_names: Option<(String, Arc<[String]>)>,
    /// Fetch owners already returned, for de-duplicating plans.
    seen: HashSet<Vec<Option<Identity>>>,
    /// Collections initialised during this execution; others were already
    /// loaded and are left alone.
    filling: HashSet<(Identity, String)>,
}

impl Projector {
    pub(crate) fn new(plan: Arc<ExecutionPlan>, registry: &EntityRegistry) -> CoreResult<Self> {
        let mut descriptors = HashMap::new();
        for name in plan.entity_types() {
            let descriptor = registry.require_entity(name).map_err(CoreError::from)?;
            descriptors.insert(name.clone(), Arc::clone(descriptor));
        }
        let constructor_names = match plan.projection() {
            Projection::Constructor { shape, names, .. } => {
                Some((shape.clone(), Arc::from(names.as_slice())))
            }
            _ => None,
        };
        Ok(Self {
            plan,
            descriptors,
            constructor_names,
            seen: HashSet::new(),
            filling: HashSet::new(),
        })
    }

    fn descriptor(&self, entity: &str) -> CoreResult<&Arc<EntityDescriptor>> {
        self.descriptors
            .get(entity)
            .ok_or_else(|| CoreError::mapping(format!("entity {entity} is not registered")))
    }

    fn entity_at(
        &self,
        context: &mut PersistenceContext,
        entity: &str,
        start: usize,
        row: &[Value],
    ) -> CoreResult<Option<EntityRef>> {
        let descriptor = self.descriptor(entity)?;
        let width = descriptor.columns().len();
        let slice = row.get(start..start + width).ok_or_else(|| {
            CoreError::mapping(format!(
                "row of {} columns is too short for {entity} at {start}",
                row.len()
            ))
        })?;
        Ok(context.materialize(descriptor, slice))
    }

    fn item(
        &self,
        context: &mut PersistenceContext,
        item: &ProjectionItem,
        row: &[Value],
    ) -> CoreResult<Projected> {
        match item {
            ProjectionItem::Entity { entity, start, .. } => {
                Ok(match self.entity_at(context, entity, *start, row)? {
                    Some(entity) => Projected::Entity(entity),
                    None => Projected::Scalar(Value::Null),
                })
            }
            ProjectionItem::Scalar { index } => {
                row.get(*index).cloned().map(Projected::Scalar).ok_or_else(|| {
                    CoreError::mapping(format!("row has no column {index}"))
                })
            }
        }
    }

    /// Projects one row. Returns `None` for a row whose fetch owners were
    /// already returned by a de-duplicating plan.
    pub(crate) fn project(
        &mut self,
        context: &mut PersistenceContext,
        row: &[Value],
    ) -> CoreResult<Option<Projected>> {
        let plan = Arc::clone(&self.plan);
        let mut owners: HashMap<&str, Option<EntityRef>> = HashMap::new();
        let items = plan.projection().items();
        let mut projected = Vec::with_capacity(items.len());
        for item in items {
            let value = self.item(context, item, row)?;
            if let ProjectionItem::Entity { alias, .. } = item {
                owners.insert(alias.as_str(), value.as_entity().cloned());
            }
            projected.push(value);
        }

        for fetch in plan.fetches() {
            let target = self.entity_at(context, &fetch.entity, fetch.start, row)?;
            let owner = owners.get(fetch.owner_alias.as_str()).cloned().flatten();
            if let Some(owner) = owner {
                self.attach(&owner, fetch, target.as_ref());
            }
            owners.insert(fetch.alias.as_str(), target);
        }

        if plan.requires_deduplication() {
            let key: Vec<Option<Identity>> = projected
                .iter()
                .filter_map(|p| match p {
                    Projected::Entity(e) => Some(e.identity()),
                    Projected::Scalar(Value::Null) => Some(None),
                    _ => None,
                })
                .collect();
            if !self.seen.insert(key) {
                trace!("suppressed repeated fetch owner");
                return Ok(None);
            }
        }

        let result = match plan.projection() {
            Projection::Single(_) => projected.pop(),
            Projection::Tuple(_) => Some(Projected::Tuple(projected)),
            Projection::Constructor { .. } => {
                let (type_name, names) = self
                    .constructor_names
                    .clone()
                    .ok_or_else(|| CoreError::mapping("constructor projection without a shape"))?;
                Some(Projected::Constructed(ConstructedRow {
                    type_name,
                    names,
                    values: projected
                        .into_iter()
                        .map(|p| match p {
                            Projected::Scalar(v) => Ok(v),
                            other => Err(CoreError::mapping(format!(
                                "constructor argument projected as {other:?}"
                            ))),
                        })
                        .collect::<CoreResult<_>>()?,
                }))
            }
        };
        trace!(query = plan.query(), "projected row");
        Ok(result)
    }

    /// Fills the owner's relation slot from a fetched target.
    fn attach(&mut self, owner: &EntityRef, fetch: &FetchSpec, target: Option<&EntityRef>) {
        if fetch.collection {
            let Some(owner_identity) = owner.identity() else {
                return;
            };
            let key = (owner_identity, fetch.relation.clone());
            if owner.begin_collection(&fetch.relation) {
                self.filling.insert(key.clone());
            }
            if self.filling.contains(&key) {
                if let Some(member) = target.and_then(EntityRef::identity) {
                    owner.push_member(&fetch.relation, member);
                }
            }
        } else {
            owner.mark_reference_loaded(&fetch.relation, target.and_then(EntityRef::identity));
        }
    }
}
