//! Serializable registry declaration.

use super::{EntityDescriptor, EnumDescriptor, OutputShape, RegistryBuilder};
use serde::{Deserialize, Serialize};

/// A registry declaration as stored in a JSON document.
///
/// ```json
/// {
///   "entities": [{
///     "name": "Team", "table": "team", "id": "id",
///     "fields": [{"name": "id", "type": "integer"}, {"name": "name", "type": "text"}]
///   }],
///   "enums": [{"name": "MemberType", "package": "jpql", "labels": ["ADMIN", "USER"]}]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDeclaration {
    /// Entity declarations.
    #[serde(default)]
    pub entities: Vec<EntityDescriptor>,
    /// Enumerations.
    #[serde(default)]
    pub enums: Vec<EnumDescriptor>,
    /// Output shapes for constructor projections.
    #[serde(default)]
    pub shapes: Vec<OutputShape>,
}

impl RegistryDeclaration {
    /// Turns the declaration into a builder.
    #[must_use]
    pub fn into_builder(self) -> RegistryBuilder {
        let builder = self
            .entities
            .into_iter()
            .fold(RegistryBuilder::default(), RegistryBuilder::entity);
        let builder = self
            .enums
            .into_iter()
            .fold(builder, RegistryBuilder::enumeration);
        self.shapes.into_iter().fold(builder, RegistryBuilder::shape)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{EntityRegistry, FieldType};
    use crate::error::CoreError;
    use std::io::Write;

    const DOCUMENT: &str = r#"{
        "entities": [
            {
                "name": "Team", "table": "team", "id": "id",
                "fields": [
                    {"name": "id", "type": "integer"},
                    {"name": "name", "type": "text"}
                ],
                "relations": [
                    {"name": "members", "target": "Member", "cardinality": "one_to_many", "mapped_by": "team"}
                ]
            },
            {
                "name": "Member", "table": "member", "id": "id",
                "fields": [
                    {"name": "id", "type": "integer"},
                    {"name": "username", "type": "text", "nullable": true},
                    {"name": "age", "type": "integer"},
                    {"name": "memberType", "column": "member_type", "type": {"enum": "MemberType"}}
                ],
                "relations": [
                    {"name": "team", "target": "Team", "cardinality": "many_to_one", "join_column": "team_id"}
                ],
                "named_queries": [
                    {"name": "Member.findByUsername", "query": "select m from Member m where m.username = :username"}
                ]
            }
        ],
        "enums": [{"name": "MemberType", "package": "jpql", "labels": ["ADMIN", "USER"]}],
        "shapes": [{"name": "jpql.MemberDTO", "params": [{"name": "username", "type": "text"}, {"name": "age"}]}]
    }"#;

    #[test]
    fn loads_json_document() {
        let registry = EntityRegistry::from_json(DOCUMENT).unwrap();
        let member = registry.entity("Member").unwrap();
        assert_eq!(member.fields[1].column, "username");
        assert_eq!(member.fields[3].column, "member_type");
        assert_eq!(member.fields[3].ty, FieldType::Enum("MemberType".to_string()));
        assert!(registry.named_query("Member.findByUsername").is_some());
        assert_eq!(registry.shape("MemberDTO").unwrap().params.len(), 2);
    }

    #[test]
    fn loads_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOCUMENT.as_bytes()).unwrap();
        let registry = EntityRegistry::from_json_file(file.path()).unwrap();
        assert!(registry.entity("Team").is_some());
    }

    #[test]
    fn malformed_document_is_a_mapping_error() {
        let err = EntityRegistry::from_json("{\"entities\": 3}").unwrap_err();
        assert!(matches!(err, CoreError::Mapping { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EntityRegistry::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
