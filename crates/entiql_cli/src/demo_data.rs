//! Demo schema and seed data.
//!
//! Two teams and three members, the data set the walkthrough scenarios and
//! the default `query` command run against.

use entiql_core::{
    CoreResult, EntityDescriptor, EntityManager, EntityRef, EntityRegistry, EnumDescriptor,
    FieldDescriptor, FieldType, OutputShape, RegistryDeclaration, RelationDescriptor,
};
use entiql_value::{FromRow, Value, ValueResult};
use std::sync::Arc;

/// Builds the Member/Team registry.
pub fn registry() -> CoreResult<Arc<EntityRegistry>> {
    let declaration = RegistryDeclaration {
        entities: vec![
            EntityDescriptor::new("Team", "team", "id")
                .field(FieldDescriptor::new("id", FieldType::Integer))
                .field(FieldDescriptor::new("name", FieldType::Text).nullable())
                .relation(RelationDescriptor::one_to_many("members", "Member", "team")),
            EntityDescriptor::new("Member", "member", "id")
                .field(FieldDescriptor::new("id", FieldType::Integer))
                .field(FieldDescriptor::new("username", FieldType::Text).nullable())
                .field(FieldDescriptor::new("age", FieldType::Integer))
                .field(
                    FieldDescriptor::new("memberType", FieldType::Enum("MemberType".into()))
                        .column("member_type")
                        .nullable(),
                )
                .relation(RelationDescriptor::many_to_one("team", "Team", "team_id"))
                .named_query(
                    "Member.findByUsername",
                    "select m from Member m where m.username = :username",
                ),
        ],
        enums: vec![EnumDescriptor::new("MemberType", ["ADMIN", "USER"]).package("jpql")],
        shapes: vec![OutputShape::new("jpql.MemberDTO")
            .param("username", Some(FieldType::Text))
            .param("age", Some(FieldType::Integer))],
    };
    Ok(Arc::new(declaration.into_builder().build()?))
}

/// Row of `new jpql.MemberDTO(m.username, m.age)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDto {
    /// Username.
    pub username: Option<String>,
    /// Age.
    pub age: i64,
}

impl FromRow for MemberDto {
    fn from_row(values: Vec<Value>) -> ValueResult<Self> {
        let (username, age) = <(Option<String>, i64)>::from_row(values)?;
        Ok(Self { username, age })
    }
}

fn member(
    em: &mut EntityManager,
    username: &str,
    age: i64,
    member_type: &str,
    team: Option<&EntityRef>,
) -> CoreResult<()> {
    let member = em.new_entity("Member")?;
    member.set("username", username)?;
    member.set("age", age)?;
    member.set("memberType", member_type)?;
    member.set_reference("team", team)?;
    em.persist(&member)
}

/// Seeds teamA (회원1, 회원2) and teamB (회원3), commits, and clears the
/// context.
pub fn seed_teams(em: &mut EntityManager) -> CoreResult<()> {
    em.transaction(|em| {
        let team_a = em.new_entity("Team")?;
        team_a.set("name", "teamA")?;
        em.persist(&team_a)?;
        let team_b = em.new_entity("Team")?;
        team_b.set("name", "teamB")?;
        em.persist(&team_b)?;

        member(em, "회원1", 10, "ADMIN", Some(&team_a))?;
        member(em, "회원2", 20, "USER", Some(&team_a))?;
        member(em, "회원3", 30, "USER", Some(&team_b))
    })?;
    em.clear();
    Ok(())
}

/// Seeds `count` members aged by index, commits, and clears the context.
pub fn seed_members(em: &mut EntityManager, count: usize) -> CoreResult<()> {
    em.transaction(|em| {
        for i in 0..count {
            let age = i64::try_from(i).unwrap_or(i64::MAX);
            member(em, &format!("member{i}"), age, "USER", None)?;
        }
        Ok(())
    })?;
    em.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open;

    #[test]
    fn seeds_the_walkthrough_data() {
        let mut em = open(registry().unwrap()).unwrap();
        seed_teams(&mut em).unwrap();
        let names: Vec<String> = em
            .create_query("select m.username from Member m order by m.age")
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(names, ["회원1", "회원2", "회원3"]);
        assert!(em.context().is_empty());
    }

    #[test]
    fn dto_rows_convert() {
        let mut em = open(registry().unwrap()).unwrap();
        seed_members(&mut em, 3).unwrap();
        let dtos: Vec<MemberDto> = em
            .create_query("select new jpql.MemberDTO(m.username, m.age) from Member m order by m.age")
            .unwrap()
            .constructed()
            .unwrap();
        assert_eq!(
            dtos[2],
            MemberDto {
                username: Some("member2".into()),
                age: 2
            }
        );
    }
}
