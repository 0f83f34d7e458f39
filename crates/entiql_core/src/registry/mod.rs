//! Entity registry.
//!
//! The registry holds every entity, enumeration and output shape a query may
//! refer to. It is built once, validated as a whole, and immutable
//! afterwards; named queries are translated as part of the build so a bad
//! declaration fails early.

mod declaration;
mod descriptor;

pub use declaration::RegistryDeclaration;
pub use descriptor::{
    Cardinality, EntityDescriptor, EnumDescriptor, FieldDescriptor, FieldType, NamedQuery,
    OutputShape, RelationDescriptor, ShapeParam,
};

use crate::error::{CoreError, CoreResult, ParseError, ParseResult};
use crate::query::{translate, ExecutionPlan};
use entiql_store::{Datastore, TableSpec};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Immutable mapping metadata.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Arc<EntityDescriptor>>,
    enums: Vec<EnumDescriptor>,
    shapes: Vec<OutputShape>,
    named_queries: HashMap<String, Arc<ExecutionPlan>>,
}

impl EntityRegistry {
    /// Starts a registry declaration.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Builds a registry from a JSON declaration document.
    ///
    /// # Errors
    ///
    /// Returns a mapping error if the document is malformed or the
    /// declaration is invalid.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let declaration: RegistryDeclaration = serde_json::from_str(json)?;
        declaration.into_builder().build()
    }

    /// Builds a registry from a JSON declaration file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, otherwise as
    /// [`Self::from_json`].
    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Looks up an entity.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.get(name)
    }

    /// Looks up an entity, failing with [`ParseError::UnknownEntity`].
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not mapped.
    pub fn require_entity(&self, name: &str) -> ParseResult<&Arc<EntityDescriptor>> {
        self.entity(name).ok_or_else(|| ParseError::UnknownEntity {
            name: name.to_string(),
        })
    }

    /// Iterates over all entities in name order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    /// Looks up an enumeration by simple or qualified name.
    #[must_use]
    pub fn enumeration(&self, name: &str) -> Option<&EnumDescriptor> {
        self.enums.iter().find(|e| e.is_named(name))
    }

    /// Looks up an output shape by full or simple name.
    #[must_use]
    pub fn shape(&self, name: &str) -> Option<&OutputShape> {
        self.shapes
            .iter()
            .find(|s| s.name == name)
            .or_else(|| self.shapes.iter().find(|s| s.is_named(name)))
    }

    /// Returns the translated plan of a named query.
    #[must_use]
    pub fn named_query(&self, name: &str) -> Option<Arc<ExecutionPlan>> {
        self.named_queries.get(name).cloned()
    }

    /// Names of all named queries, sorted.
    #[must_use]
    pub fn named_query_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.named_queries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Table definitions for every entity.
    #[must_use]
    pub fn table_specs(&self) -> Vec<TableSpec> {
        self.entities.values().map(|e| e.table_spec()).collect()
    }

    /// Creates the tables of every entity in the datastore.
    ///
    /// # Errors
    ///
    /// Returns an error if the datastore rejects a table definition.
    pub fn create_tables(&self, store: &dyn Datastore) -> CoreResult<()> {
        for spec in self.table_specs() {
            store.ensure_table(&spec)?;
        }
        Ok(())
    }
}

/// Collects declarations and validates them into an [`EntityRegistry`].
///
/// # Example
///
/// ```rust
/// use entiql_core::{EntityDescriptor, EntityRegistry, FieldDescriptor, FieldType};
///
/// let registry = EntityRegistry::builder()
///     .entity(
///         EntityDescriptor::new("Team", "team", "id")
///             .field(FieldDescriptor::new("id", FieldType::Integer))
///             .field(FieldDescriptor::new("name", FieldType::Text)),
///     )
///     .build()
///     .unwrap();
/// assert!(registry.entity("Team").is_some());
/// ```
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityDescriptor>,
    enums: Vec<EnumDescriptor>,
    shapes: Vec<OutputShape>,
}

impl RegistryBuilder {
    /// Adds an entity.
    #[must_use]
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.entities.push(descriptor);
        self
    }

    /// Adds an enumeration.
    #[must_use]
    pub fn enumeration(mut self, descriptor: EnumDescriptor) -> Self {
        self.enums.push(descriptor);
        self
    }

    /// Adds an output shape.
    #[must_use]
    pub fn shape(mut self, shape: OutputShape) -> Self {
        self.shapes.push(shape);
        self
    }

    /// Validates the declarations and translates named queries.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Mapping`] for any inconsistent declaration or
    /// named query that fails to translate.
    pub fn build(self) -> CoreResult<EntityRegistry> {
        let mut registry = EntityRegistry::default();

        for mut entity in self.entities {
            for field in &mut entity.fields {
                if field.column.is_empty() {
                    field.column = field.name.clone();
                }
            }
            if registry.entities.contains_key(&entity.name) {
                return Err(CoreError::mapping(format!(
                    "entity {} is declared twice",
                    entity.name
                )));
            }
            registry
                .entities
                .insert(entity.name.clone(), Arc::new(entity));
        }

        let mut enum_names = HashSet::new();
        for enumeration in &self.enums {
            if !enum_names.insert(enumeration.qualified_name()) {
                return Err(CoreError::mapping(format!(
                    "enumeration {} is declared twice",
                    enumeration.qualified_name()
                )));
            }
            validate_enum(enumeration)?;
        }
        registry.enums = self.enums;

        let mut shape_names = HashSet::new();
        for shape in &self.shapes {
            if !shape_names.insert(shape.name.as_str()) {
                return Err(CoreError::mapping(format!(
                    "output shape {} is declared twice",
                    shape.name
                )));
            }
            for param in &shape.params {
                if let Some(FieldType::Enum(name)) = &param.ty {
                    if registry.enumeration(name).is_none() {
                        return Err(CoreError::mapping(format!(
                            "output shape {} refers to unknown enumeration {name}",
                            shape.name
                        )));
                    }
                }
            }
        }
        registry.shapes = self.shapes;

        let mut tables = HashSet::new();
        for entity in registry.entities.values() {
            if !tables.insert(entity.table.as_str()) {
                return Err(CoreError::mapping(format!(
                    "table {} is mapped by more than one entity",
                    entity.table
                )));
            }
            validate_entity(&registry, entity)?;
        }

        let declared: Vec<NamedQuery> = registry
            .entities
            .values()
            .flat_map(|e| e.named_queries.iter().cloned())
            .collect();
        for named in declared {
            let plan = translate(&named.query, &registry).map_err(|err| {
                CoreError::mapping(format!("named query {} is invalid: {err}", named.name))
            })?;
            if registry
                .named_queries
                .insert(named.name.clone(), Arc::new(plan))
                .is_some()
            {
                return Err(CoreError::mapping(format!(
                    "named query {} is declared twice",
                    named.name
                )));
            }
        }

        debug!(
            entities = registry.entities.len(),
            enums = registry.enums.len(),
            shapes = registry.shapes.len(),
            named_queries = registry.named_queries.len(),
            "built entity registry"
        );
        Ok(registry)
    }
}

fn validate_enum(enumeration: &EnumDescriptor) -> CoreResult<()> {
    if enumeration.labels.is_empty() {
        return Err(CoreError::mapping(format!(
            "enumeration {} has no labels",
            enumeration.qualified_name()
        )));
    }
    let mut seen = HashSet::new();
    for label in &enumeration.labels {
        if !seen.insert(label.as_str()) {
            return Err(CoreError::mapping(format!(
                "enumeration {} repeats label {label}",
                enumeration.qualified_name()
            )));
        }
    }
    Ok(())
}

fn validate_entity(registry: &EntityRegistry, entity: &EntityDescriptor) -> CoreResult<()> {
    let fail = |message: String| Err(CoreError::mapping(format!("{}: {message}", entity.name)));

    match entity.find_field(&entity.id_field) {
        None => return fail(format!("identity field {} is not declared", entity.id_field)),
        Some(id) if id.ty != FieldType::Integer => {
            return fail(format!("identity field {} must be an integer", id.name));
        }
        Some(id) if id.nullable => {
            return fail(format!("identity field {} must not be nullable", id.name));
        }
        Some(_) => {}
    }

    let mut names = HashSet::new();
    for name in entity
        .fields
        .iter()
        .map(|f| &f.name)
        .chain(entity.relations.iter().map(|r| &r.name))
    {
        if !names.insert(name.as_str()) {
            return fail(format!("member {name} is declared twice"));
        }
    }

    let mut columns = HashSet::new();
    for column in entity.columns() {
        if !columns.insert(column.clone()) {
            return fail(format!("column {column} is mapped twice"));
        }
    }

    for field in &entity.fields {
        if let FieldType::Enum(name) = &field.ty {
            if registry.enumeration(name).is_none() {
                return fail(format!(
                    "field {} refers to unknown enumeration {name}",
                    field.name
                ));
            }
        }
    }

    for relation in &entity.relations {
        let Some(target) = registry.entity(&relation.target) else {
            return fail(format!(
                "relation {} targets unknown entity {}",
                relation.name, relation.target
            ));
        };
        match (relation.cardinality, &relation.join_column, &relation.mapped_by) {
            (Cardinality::ManyToOne, Some(_), None) | (Cardinality::OneToOne, Some(_), None) => {}
            (Cardinality::OneToMany, None, Some(mapped_by))
            | (Cardinality::OneToOne, None, Some(mapped_by)) => {
                let owning = target.find_relation(mapped_by);
                let valid = owning.is_some_and(|owning| {
                    owning.is_owning()
                        && owning.target == entity.name
                        && (relation.cardinality == Cardinality::OneToOne)
                            == (owning.cardinality == Cardinality::OneToOne)
                });
                if !valid {
                    return fail(format!(
                        "relation {} is mapped by {}.{mapped_by}, which is not a matching owning relation",
                        relation.name, target.name
                    ));
                }
            }
            _ => {
                return fail(format!(
                    "relation {} needs exactly one of join_column (owning) or mapped_by (inverse)",
                    relation.name
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team() -> EntityDescriptor {
        EntityDescriptor::new("Team", "team", "id")
            .field(FieldDescriptor::new("id", FieldType::Integer))
            .field(FieldDescriptor::new("name", FieldType::Text))
            .relation(RelationDescriptor::one_to_many("members", "Member", "team"))
    }

    fn member() -> EntityDescriptor {
        EntityDescriptor::new("Member", "member", "id")
            .field(FieldDescriptor::new("id", FieldType::Integer))
            .field(FieldDescriptor::new("username", FieldType::Text).nullable())
            .field(FieldDescriptor::new(
                "memberType",
                FieldType::Enum("MemberType".to_string()),
            ))
            .relation(RelationDescriptor::many_to_one("team", "Team", "team_id"))
    }

    fn member_type() -> EnumDescriptor {
        EnumDescriptor::new("MemberType", ["ADMIN", "USER"]).package("jpql")
    }

    fn assert_mapping_error(result: CoreResult<EntityRegistry>, needle: &str) {
        match result {
            Err(CoreError::Mapping { message }) => {
                assert!(message.contains(needle), "{message} does not mention {needle}");
            }
            other => panic!("expected mapping error, got {other:?}"),
        }
    }

    #[test]
    fn builds_valid_registry() {
        let registry = EntityRegistry::builder()
            .entity(team())
            .entity(member().named_query(
                "Member.findByUsername",
                "select m from Member m where m.username = :username",
            ))
            .enumeration(member_type())
            .shape(OutputShape::new("jpql.MemberDTO").param("username", Some(FieldType::Text)))
            .build()
            .unwrap();

        assert!(registry.entity("Member").is_some());
        assert!(registry.enumeration("jpql.MemberType").is_some());
        assert!(registry.shape("MemberDTO").is_some());
        assert_eq!(registry.named_query_names(), vec!["Member.findByUsername"]);
        assert_eq!(registry.table_specs().len(), 2);
        assert!(matches!(
            registry.require_entity("Nope"),
            Err(ParseError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn rejects_unknown_relation_target() {
        let result = EntityRegistry::builder()
            .entity(member())
            .enumeration(member_type())
            .build();
        assert_mapping_error(result, "unknown entity Team");
    }

    #[test]
    fn rejects_bad_identity() {
        let entity = EntityDescriptor::new("Thing", "thing", "code")
            .field(FieldDescriptor::new("code", FieldType::Text));
        assert_mapping_error(
            EntityRegistry::builder().entity(entity).build(),
            "must be an integer",
        );
    }

    #[test]
    fn rejects_unknown_enum() {
        let result = EntityRegistry::builder()
            .entity(team())
            .entity(member())
            .build();
        assert_mapping_error(result, "unknown enumeration MemberType");
    }

    #[test]
    fn rejects_mismatched_mapped_by() {
        let team = EntityDescriptor::new("Team", "team", "id")
            .field(FieldDescriptor::new("id", FieldType::Integer))
            .relation(RelationDescriptor::one_to_many("members", "Member", "squad"));
        let result = EntityRegistry::builder()
            .entity(team)
            .entity(member())
            .enumeration(member_type())
            .build();
        assert_mapping_error(result, "not a matching owning relation");
    }

    #[test]
    fn rejects_invalid_named_query() {
        let result = EntityRegistry::builder()
            .entity(team().named_query("Team.broken", "select t from Team t where t.nope = 1"))
            .entity(member())
            .enumeration(member_type())
            .build();
        assert_mapping_error(result, "Team.broken");
    }

    #[test]
    fn rejects_duplicate_enum_label() {
        let result = EntityRegistry::builder()
            .enumeration(EnumDescriptor::new("MemberType", ["ADMIN", "ADMIN"]))
            .build();
        assert_mapping_error(result, "repeats label ADMIN");
    }
}
