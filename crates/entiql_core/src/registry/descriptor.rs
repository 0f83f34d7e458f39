//! Static mapping descriptors.

use entiql_store::TableSpec;
use entiql_value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a mapped field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// 64-bit integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Boolean.
    Bool,
    /// Byte string.
    Bytes,
    /// Label of the named enumeration, stored as text.
    Enum(String),
}

impl FieldType {
    /// Returns the storage type of this field.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Integer => ValueType::Integer,
            Self::Text | Self::Enum(_) => ValueType::Text,
            Self::Bool => ValueType::Bool,
            Self::Bytes => ValueType::Bytes,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enum(name) => write!(f, "enum {name}"),
            other => f.write_str(other.value_type().name()),
        }
    }
}

/// A mapped scalar field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name used in queries.
    pub name: String,
    /// Column name; defaults to the field name.
    #[serde(default)]
    pub column: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Whether null is allowed.
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDescriptor {
    /// Creates a non-nullable field stored in a column of the same name.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            ty,
            nullable: false,
        }
    }

    /// Stores the field in a differently named column.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Allows null values.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Single-valued, at most one owner per target.
    OneToOne,
    /// Collection-valued; the inverse of a many-to-one.
    OneToMany,
    /// Single-valued, many owners per target.
    ManyToOne,
}

impl Cardinality {
    /// Returns true for collection-valued relationships.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::OneToMany)
    }
}

/// A relationship to another entity.
///
/// The owning side names the `join_column` that holds the target identity;
/// the inverse side names the owning relation through `mapped_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Relation name used in paths.
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Cardinality.
    pub cardinality: Cardinality,
    /// Foreign-key column on this entity's table (owning side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_column: Option<String>,
    /// Name of the owning relation on the target (inverse side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_by: Option<String>,
}

impl RelationDescriptor {
    /// Owning many-to-one relation.
    pub fn many_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        join_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ManyToOne,
            join_column: Some(join_column.into()),
            mapped_by: None,
        }
    }

    /// Inverse one-to-many relation.
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::OneToMany,
            join_column: None,
            mapped_by: Some(mapped_by.into()),
        }
    }

    /// Owning one-to-one relation.
    pub fn one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        join_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::OneToOne,
            join_column: Some(join_column.into()),
            mapped_by: None,
        }
    }

    /// Inverse one-to-one relation.
    pub fn one_to_one_inverse(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::OneToOne,
            join_column: None,
            mapped_by: Some(mapped_by.into()),
        }
    }

    /// Returns true if this side holds the foreign key.
    #[must_use]
    pub const fn is_owning(&self) -> bool {
        self.join_column.is_some()
    }
}

/// A query declared with an entity and translated when the registry is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedQuery {
    /// Query name, conventionally `Entity.purpose`.
    pub name: String,
    /// Query text.
    pub query: String,
}

/// Mapping metadata for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity name used in queries.
    pub name: String,
    /// Backing table.
    pub table: String,
    /// Name of the identity field; must be an integer field.
    #[serde(rename = "id")]
    pub id_field: String,
    /// Scalar fields, identity included, in declaration order.
    pub fields: Vec<FieldDescriptor>,
    /// Relationships.
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
    /// Queries declared with this entity.
    #[serde(default)]
    pub named_queries: Vec<NamedQuery>,
}

impl EntityDescriptor {
    /// Creates a descriptor with no fields.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        id_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            id_field: id_field.into(),
            fields: Vec::new(),
            relations: Vec::new(),
            named_queries: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    /// Declares a named query.
    #[must_use]
    pub fn named_query(mut self, name: impl Into<String>, query: impl Into<String>) -> Self {
        self.named_queries.push(NamedQuery {
            name: name.into(),
            query: query.into(),
        });
        self
    }

    /// Returns the position of a field.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the position of a relation.
    #[must_use]
    pub fn relation_index(&self, name: &str) -> Option<usize> {
        self.relations.iter().position(|r| r.name == name)
    }

    /// Looks up a relation by name.
    #[must_use]
    pub fn find_relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Position of the identity field. Validated at registration.
    #[must_use]
    pub fn id_index(&self) -> usize {
        self.field_index(&self.id_field).unwrap_or(0)
    }

    /// Column holding the identity.
    #[must_use]
    pub fn id_column(&self) -> &str {
        self.fields
            .get(self.id_index())
            .map_or(self.id_field.as_str(), |f| f.column.as_str())
    }

    /// Storage columns: field columns, then owning join columns.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| f.column.clone())
            .chain(self.relations.iter().filter_map(|r| r.join_column.clone()))
            .collect()
    }

    /// Positions within [`Self::columns`] of each relation's join column.
    pub(crate) fn join_column_positions(&self) -> Vec<Option<usize>> {
        let mut next = self.fields.len();
        self.relations
            .iter()
            .map(|r| {
                r.join_column.as_ref().map(|_| {
                    next += 1;
                    next - 1
                })
            })
            .collect()
    }

    /// Table definition for the datastore.
    #[must_use]
    pub fn table_spec(&self) -> TableSpec {
        TableSpec::new(&self.table, self.id_column(), self.columns())
    }
}

/// A named enumeration stored by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDescriptor {
    /// Simple name, e.g. `MemberType`.
    pub name: String,
    /// Optional namespace, e.g. `jpql` for `jpql.MemberType`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Labels in declaration order.
    pub labels: Vec<String>,
}

impl EnumDescriptor {
    /// Creates an enumeration.
    pub fn new(
        name: impl Into<String>,
        labels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            package: None,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Places the enumeration in a namespace.
    #[must_use]
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Name including the namespace, if any.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.package {
            Some(package) => format!("{package}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Returns true if `name` is the simple or the qualified name.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.qualified_name() == name
    }

    /// Returns true if the label belongs to this enumeration.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Returns true if `value` is null or one of the labels.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Text(label) => self.has_label(label),
            _ => false,
        }
    }
}

/// One parameter of an output shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeParam {
    /// Parameter name.
    pub name: String,
    /// Declared type; unchecked when absent.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<FieldType>,
}

/// Target of a `new T(...)` projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputShape {
    /// Type name, optionally qualified (`jpql.MemberDTO`).
    pub name: String,
    /// Constructor parameters in order.
    pub params: Vec<ShapeParam>,
}

impl OutputShape {
    /// Creates a shape with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Appends a parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, ty: Option<FieldType>) -> Self {
        self.params.push(ShapeParam {
            name: name.into(),
            ty,
        });
        self
    }

    /// Last segment of the name.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Returns true if `name` is the full or the simple name.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.simple_name() == name
    }
}
