//! Test fixtures and entity manager helpers.
//!
//! Provides the Member/Team schema used across the test suite, an entity
//! manager wired to a fresh in-memory datastore, and seed data for the
//! common scenarios.

use entiql_core::{
    Config, CoreResult, EntityDescriptor, EntityManager, EntityRef, EntityRegistry,
    EnumDescriptor, FieldDescriptor, FieldType, OutputShape, RegistryDeclaration,
    RelationDescriptor,
};
use entiql_store::{Datastore, InMemoryDatastore};
use entiql_value::{FromRow, Value, ValueResult};
use std::path::Path;
use std::sync::Arc;

/// Query of the `Member.findByUsername` named query.
pub const FIND_BY_USERNAME: &str = "select m from Member m where m.username = :username";

/// The Member/Team declaration.
///
/// - `Team(id, name)` with an inverse `members` collection
/// - `Member(id, username, age, memberType)` with an owning `team`
///   reference stored in `team_id`
/// - `jpql.MemberType` with labels `ADMIN` and `USER`
/// - `jpql.MemberDTO(username: text, age: integer)`
pub fn declaration() -> RegistryDeclaration {
    RegistryDeclaration {
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
                .named_query("Member.findByUsername", FIND_BY_USERNAME),
        ],
        enums: vec![EnumDescriptor::new("MemberType", ["ADMIN", "USER"]).package("jpql")],
        shapes: vec![OutputShape::new("jpql.MemberDTO")
            .param("username", Some(FieldType::Text))
            .param("age", Some(FieldType::Integer))],
    }
}

/// The Member/Team registry.
///
/// # Panics
///
/// Panics if the fixture declaration fails to build.
pub fn schema() -> Arc<EntityRegistry> {
    Arc::new(
        declaration()
            .into_builder()
            .build()
            .expect("fixture schema must build"),
    )
}

/// Writes the fixture declaration as a JSON document.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_schema(path: impl AsRef<Path>) {
    let json = serde_json::to_string_pretty(&declaration()).expect("declaration serializes");
    std::fs::write(path, json).expect("failed to write schema file");
}

/// DTO built from `new jpql.MemberDTO(m.username, m.age)`.
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

/// An entity manager over a fresh in-memory datastore holding the fixture
/// schema.
pub struct TestContext {
    /// The entity manager.
    pub em: EntityManager,
    /// The datastore, for inspecting rows directly.
    pub store: Arc<InMemoryDatastore>,
}

impl TestContext {
    /// Creates a context with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a context with a custom configuration.
    ///
    /// # Panics
    ///
    /// Panics if the fixture tables cannot be created.
    pub fn with_config(config: Config) -> Self {
        let registry = schema();
        let store = Arc::new(InMemoryDatastore::new());
        registry
            .create_tables(store.as_ref())
            .expect("failed to create fixture tables");
        let em = EntityManager::with_config(
            registry,
            Arc::clone(&store) as Arc<dyn Datastore>,
            config,
        );
        Self { em, store }
    }

    /// Opens a second entity manager over the same datastore, with its own
    /// empty persistence context.
    pub fn second_manager(&self) -> EntityManager {
        EntityManager::with_config(
            Arc::clone(self.em.registry()),
            Arc::clone(&self.store) as Arc<dyn Datastore>,
            self.em.config().clone(),
        )
    }

    /// Number of rows in a table.
    ///
    /// # Panics
    ///
    /// Panics if the table does not exist.
    pub fn rows(&self, table: &str) -> usize {
        self.store.row_count(table).expect("unknown table")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestContext {
    type Target = EntityManager;

    fn deref(&self) -> &Self::Target {
        &self.em
    }
}

impl std::ops::DerefMut for TestContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.em
    }
}

/// Creates an entity manager over a fresh fixture datastore wired to
/// `store`.
///
/// # Panics
///
/// Panics if the fixture tables cannot be created.
pub fn manager_over(store: Arc<dyn Datastore>, config: Config) -> EntityManager {
    let registry = schema();
    registry
        .create_tables(store.as_ref())
        .expect("failed to create fixture tables");
    EntityManager::with_config(registry, store, config)
}

/// Runs a test with a fresh [`TestContext`].
pub fn with_context<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestContext) -> R,
{
    let mut ctx = TestContext::new();
    f(&mut ctx)
}

/// Persists a team.
///
/// # Errors
///
/// Returns any lifecycle error.
pub fn new_team(em: &mut EntityManager, name: &str) -> CoreResult<EntityRef> {
    let team = em.new_entity("Team")?;
    team.set("name", name)?;
    em.persist(&team)?;
    Ok(team)
}

/// Persists a member.
///
/// # Errors
///
/// Returns any lifecycle error.
pub fn new_member(
    em: &mut EntityManager,
    username: &str,
    age: i64,
    member_type: Option<&str>,
    team: Option<&EntityRef>,
) -> CoreResult<EntityRef> {
    let member = em.new_entity("Member")?;
    member.set("username", username)?;
    member.set("age", age)?;
    member.set("memberType", member_type)?;
    member.set_reference("team", team)?;
    em.persist(&member)?;
    Ok(member)
}

/// Seed data sets.
pub mod scenarios {
    use super::*;

    /// Identities of the seeded team data set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TeamSeed {
        /// `teamA`.
        pub team_a: i64,
        /// `teamB`.
        pub team_b: i64,
        /// `회원1`, `회원2` in teamA and `회원3` in teamB.
        pub members: [i64; 3],
    }

    /// Seeds two teams and three members, commits, and clears the context.
    ///
    /// `회원1` (age 10, ADMIN) and `회원2` (age 20, USER) belong to
    /// `teamA`; `회원3` (age 30, USER) belongs to `teamB`.
    ///
    /// # Errors
    ///
    /// Returns any lifecycle or datastore error.
    pub fn seed_teams(em: &mut EntityManager) -> CoreResult<TeamSeed> {
        let seed = em.transaction(|em| {
            let team_a = new_team(em, "teamA")?;
            let team_b = new_team(em, "teamB")?;
            let m1 = new_member(em, "회원1", 10, Some("ADMIN"), Some(&team_a))?;
            let m2 = new_member(em, "회원2", 20, Some("USER"), Some(&team_a))?;
            let m3 = new_member(em, "회원3", 30, Some("USER"), Some(&team_b))?;
            Ok(TeamSeed {
                team_a: key(&team_a)?,
                team_b: key(&team_b)?,
                members: [key(&m1)?, key(&m2)?, key(&m3)?],
            })
        })?;
        em.clear();
        Ok(seed)
    }

    /// Seeds `count` members named `member0..` with age equal to their
    /// index, commits, and clears the context.
    ///
    /// # Errors
    ///
    /// Returns any lifecycle or datastore error.
    pub fn seed_members(em: &mut EntityManager, count: usize) -> CoreResult<()> {
        em.transaction(|em| {
            for i in 0..count {
                let age = i64::try_from(i).unwrap_or(i64::MAX);
                new_member(em, &format!("member{i}"), age, Some("USER"), None)?;
            }
            Ok(())
        })?;
        em.clear();
        Ok(())
    }

    fn key(entity: &EntityRef) -> CoreResult<i64> {
        entity.get_as::<i64>("id")
    }
}

#[cfg(test)]
mod tests {
    use super::scenarios::*;
    use super::*;

    #[test]
    fn test_context_starts_empty() {
        let ctx = TestContext::new();
        assert_eq!(ctx.rows("member"), 0);
        assert_eq!(ctx.rows("team"), 0);
        assert!(ctx.context().is_empty());
    }

    #[test]
    fn seed_teams_commits_and_clears() {
        with_context(|ctx| {
            let seed = seed_teams(ctx).unwrap();
            assert_eq!(seed.team_a, 1);
            assert_eq!(seed.members, [1, 2, 3]);
            assert_eq!(ctx.rows("team"), 2);
            assert_eq!(ctx.rows("member"), 3);
            assert!(ctx.context().is_empty());
            assert!(!ctx.is_active());
        });
    }

    #[test]
    fn seed_members_counts() {
        with_context(|ctx| {
            seed_members(ctx, 15).unwrap();
            assert_eq!(ctx.rows("member"), 15);
        });
    }

    #[test]
    fn schema_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        write_schema(&path);
        let registry = EntityRegistry::from_json_file(&path).unwrap();
        assert!(registry.named_query("Member.findByUsername").is_some());
        assert!(registry.enumeration("jpql.MemberType").is_some());
        assert!(registry.shape("MemberDTO").is_some());
    }
}
