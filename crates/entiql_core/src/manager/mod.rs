//! Entity manager: the unit-of-work facade.

mod query;

pub use query::{Query, ResultStream};

use crate::config::{Config, FlushMode};
use crate::context::{EntityRef, FlushSummary, Identity, ObjectState, PersistenceContext};
use crate::error::{CoreError, CoreResult};
use crate::executor::QueryExecutor;
use crate::query::{translate, ExecutionPlan};
use crate::registry::{EntityDescriptor, EntityRegistry};
use entiql_store::{Datastore, Expr};
use entiql_value::Value;
use lru::LruCache;
use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Owns a persistence context and runs queries and lifecycle operations
/// against one datastore.
///
/// An entity manager is used by one flow at a time. The registry and the
/// datastore may be shared between managers.
///
/// # Example
///
/// ```rust,ignore
/// let mut em = EntityManager::new(registry, store);
/// em.transaction(|em| {
///     let member = em.new_entity("Member")?;
///     member.set("username", "member1")?;
///     em.persist(&member)
/// })?;
/// ```
pub struct EntityManager {
    registry: Arc<EntityRegistry>,
    store: Arc<dyn Datastore>,
    config: Config,
    context: PersistenceContext,
    plans: Option<LruCache<String, Arc<ExecutionPlan>>>,
}

impl EntityManager {
    /// Creates a manager with the default configuration.
    pub fn new(registry: Arc<EntityRegistry>, store: Arc<dyn Datastore>) -> Self {
        Self::with_config(registry, store, Config::default())
    }

    /// Creates a manager with a custom configuration.
    pub fn with_config(
        registry: Arc<EntityRegistry>,
        store: Arc<dyn Datastore>,
        config: Config,
    ) -> Self {
        let plans = NonZeroUsize::new(config.plan_cache_capacity).map(LruCache::new);
        Self {
            registry,
            store,
            config,
            context: PersistenceContext::new(),
            plans,
        }
    }

    /// Mapping metadata.
    #[must_use]
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Backing datastore.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The persistence context, for inspection.
    #[must_use]
    pub const fn context(&self) -> &PersistenceContext {
        &self.context
    }

    /// Translates a query, reusing a cached plan for identical text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] if the query does not translate.
    pub fn plan(&mut self, query: &str) -> CoreResult<Arc<ExecutionPlan>> {
        if let Some(plan) = self.plans.as_mut().and_then(|cache| cache.get(query)) {
            trace!(query, "plan cache hit");
            return Ok(Arc::clone(plan));
        }
        let plan = Arc::new(translate(query, &self.registry)?);
        if let Some(cache) = self.plans.as_mut() {
            cache.put(query.to_string(), Arc::clone(&plan));
        }
        Ok(plan)
    }

    /// Number of cached plans.
    #[must_use]
    pub fn cached_plans(&self) -> usize {
        self.plans.as_ref().map_or(0, LruCache::len)
    }

    /// Creates a query from text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] if the query does not translate.
    pub fn create_query(&mut self, query: &str) -> CoreResult<Query<'_>> {
        let plan = self.plan(query)?;
        Ok(Query::new(self, plan))
    }

    /// Creates a query from a named query declared in the registry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownNamedQuery`] if no such query exists.
    pub fn create_named_query(&mut self, name: &str) -> CoreResult<Query<'_>> {
        let plan = self
            .registry
            .named_query(name)
            .ok_or_else(|| CoreError::UnknownNamedQuery {
                name: name.to_string(),
            })?;
        Ok(Query::new(self, plan))
    }

    fn descriptor(&self, entity: &str) -> CoreResult<Arc<EntityDescriptor>> {
        Ok(Arc::clone(self.registry.require_entity(entity)?))
    }

    /// Creates a NEW object with every field null. It is not tracked until
    /// persisted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] for an unknown entity.
    pub fn new_entity(&self, entity: &str) -> CoreResult<EntityRef> {
        Ok(EntityRef::new_transient(self.descriptor(entity)?))
    }

    /// Makes a NEW object managed, assigning its identity from the
    /// datastore's sequence. The row is inserted on the next flush.
    ///
    /// Persisting a managed object does nothing; persisting a removed one
    /// cancels the removal.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for a detached object.
    pub fn persist(&mut self, entity: &EntityRef) -> CoreResult<()> {
        if self.context.tracks(entity) {
            if entity.state() == ObjectState::Removed {
                self.context.unremove(entity);
            }
            return Ok(());
        }
        if entity.state() != ObjectState::New {
            return Err(CoreError::invalid_operation(format!(
                "cannot persist a {:?} {}",
                entity.state(),
                entity.entity_name()
            )));
        }
        if entity.identity().is_none() {
            let id = self.store.next_identity(&entity.descriptor().table)?;
            entity.assign_id(Value::Integer(id));
        }
        let identity = self.context.register(entity)?;
        debug!(%identity, "persisted object");
        Ok(())
    }

    /// Schedules a managed object for deletion on the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the object is not managed
    /// by this entity manager.
    pub fn remove(&mut self, entity: &EntityRef) -> CoreResult<()> {
        self.context.mark_removed(entity)
    }

    /// Returns the object with this identity: from the context if cached,
    /// otherwise loaded from the datastore and registered.
    ///
    /// A cached object flagged as possibly stale is returned as is, with a
    /// warning; call [`Self::refresh`] to reload it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] for an unknown entity, or a datastore
    /// error.
    pub fn find(&mut self, entity: &str, id: impl Into<Value>) -> CoreResult<Option<EntityRef>> {
        let descriptor = self.descriptor(entity)?;
        let identity = Identity::new(&descriptor.name, id);
        if let Some(found) = self.context.find(&identity) {
            if self.context.is_possibly_stale(&found) {
                warn!(%identity, "returning a cached object a bulk statement may have changed");
            }
            return Ok(Some(found));
        }
        if self.context.is_tracked(&identity) {
            // Removed in this context.
            return Ok(None);
        }
        let rows = self.load_rows(&descriptor, identity.key())?;
        Ok(rows
            .first()
            .and_then(|row| self.context.materialize(&descriptor, row)))
    }

    fn load_rows(
        &self,
        descriptor: &EntityDescriptor,
        key: &Value,
    ) -> CoreResult<Vec<Vec<Value>>> {
        let filter = Expr::eq(Expr::column("e", descriptor.id_column()), Expr::Param(0));
        QueryExecutor::new(&self.registry, self.store.as_ref()).load(
            descriptor,
            filter,
            std::slice::from_ref(key),
        )
    }

    /// Reloads a managed object from the datastore, discarding unflushed
    /// changes and clearing its stale flag. Loaded collections are reset.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the object is not managed
    /// or its row no longer exists.
    pub fn refresh(&mut self, entity: &EntityRef) -> CoreResult<()> {
        if !self.context.contains(entity) || entity.state() != ObjectState::Managed {
            return Err(CoreError::invalid_operation(format!(
                "only managed objects can be refreshed, this {} is {:?}",
                entity.entity_name(),
                entity.state()
            )));
        }
        let key = entity.id();
        let rows = self.load_rows(entity.descriptor(), &key)?;
        let row = rows.first().ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "{}#{key} no longer exists in the datastore",
                entity.entity_name()
            ))
        })?;
        entity.reload(row);
        debug!(entity = entity.entity_name(), %key, "refreshed object");
        Ok(())
    }

    /// Returns true if the object is managed by this entity manager.
    #[must_use]
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.context.contains(entity)
    }

    /// Stops tracking one object, discarding its unflushed changes.
    pub fn detach(&mut self, entity: &EntityRef) {
        self.context.detach(entity);
    }

    /// Writes pending changes to the datastore.
    ///
    /// # Errors
    ///
    /// Returns the first failing write; unwritten changes stay pending.
    pub fn flush(&mut self) -> CoreResult<FlushSummary> {
        if self.context.has_pending_changes() {
            self.ensure_transaction()?;
        }
        self.context.flush(&self.registry, self.store.as_ref())
    }

    /// Flushes before a query when the flush mode asks for it and a pending
    /// change touches one of the query's entity types.
    pub(crate) fn auto_flush(&mut self, types: &BTreeSet<String>) -> CoreResult<()> {
        if self.config.flush_mode == FlushMode::Auto && self.context.has_pending_changes_for(types)
        {
            debug!(?types, "flushing before query");
            self.flush()?;
        }
        Ok(())
    }

    pub(crate) fn ensure_transaction(&self) -> CoreResult<()> {
        if self.config.auto_begin && !self.store.in_transaction() {
            self.store.begin_transaction()?;
            debug!("began transaction on first write");
        }
        Ok(())
    }

    /// Detaches every managed object.
    pub fn clear(&mut self) {
        self.context.clear();
    }

    /// Loads a relation of a managed object from the datastore and records
    /// the result in its relation slot. Returns the related objects.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] for an unknown relation,
    /// [`CoreError::InvalidOperation`] for an object without an identity,
    /// or a datastore error.
    pub fn load_relation(&mut self, entity: &EntityRef, relation: &str) -> CoreResult<Vec<EntityRef>> {
        let descriptor = entity.relation_descriptor(relation)?.clone();
        let target = self.descriptor(&descriptor.target)?;
        let Some(identity) = entity.identity() else {
            return Err(CoreError::invalid_operation(format!(
                "cannot load {}.{relation} before the object has an identity",
                entity.entity_name()
            )));
        };
        self.auto_flush(&BTreeSet::from([target.name.clone()]))?;

        if descriptor.is_owning() {
            let target_identity = entity.reference(relation)?.target().cloned();
            let loaded = match &target_identity {
                Some(key) => self.find(&target.name, key.key().clone())?,
                None => None,
            };
            entity.mark_reference_loaded(relation, target_identity);
            return Ok(loaded.into_iter().collect());
        }

        let owning_column = descriptor
            .mapped_by
            .as_deref()
            .and_then(|mapped_by| target.find_relation(mapped_by))
            .and_then(|owning| owning.join_column.clone())
            .ok_or_else(|| {
                CoreError::mapping(format!(
                    "{}.{relation} has no owning side",
                    entity.entity_name()
                ))
            })?;
        let filter = Expr::eq(Expr::column("e", owning_column), Expr::Param(0));
        let rows = QueryExecutor::new(&self.registry, self.store.as_ref()).load(
            &target,
            filter,
            std::slice::from_ref(identity.key()),
        )?;
        let related: Vec<EntityRef> = rows
            .iter()
            .filter_map(|row| self.context.materialize(&target, row))
            .filter(|e| e.state() != ObjectState::Removed)
            .collect();
        let identities = related.iter().filter_map(EntityRef::identity).collect::<Vec<_>>();

        if descriptor.cardinality.is_collection() {
            entity.set_collection(relation, identities);
        } else {
            entity.mark_reference_loaded(relation, identities.into_iter().next());
        }
        debug!(
            owner = %identity,
            relation,
            loaded = related.len(),
            "loaded relation"
        );
        Ok(related)
    }

    /// Resolves a relation from the persistence context without touching
    /// the datastore.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the relation has not been
    /// loaded by a fetch join or [`Self::load_relation`].
    pub fn related(&self, entity: &EntityRef, relation: &str) -> CoreResult<Vec<EntityRef>> {
        let descriptor = entity.relation_descriptor(relation)?;
        let not_loaded = || {
            CoreError::invalid_operation(format!(
                "{}.{relation} is not loaded; fetch it or call load_relation",
                entity.entity_name()
            ))
        };
        if descriptor.cardinality.is_collection() {
            let collection = entity.collection(relation)?;
            let members = collection.members().ok_or_else(not_loaded)?;
            return Ok(members
                .iter()
                .filter_map(|identity| self.context.find(identity))
                .collect());
        }
        let reference = entity.reference(relation)?;
        let cached = reference.target().and_then(|i| self.context.find(i));
        match cached {
            Some(target) => Ok(vec![target]),
            None if reference.is_loaded() => Ok(Vec::new()),
            None => Err(not_loaded()),
        }
    }

    /// Begins a datastore transaction.
    ///
    /// # Errors
    ///
    /// Returns a datastore error if a transaction is already active.
    pub fn begin(&mut self) -> CoreResult<()> {
        self.store.begin_transaction()?;
        debug!("began transaction");
        Ok(())
    }

    /// Flushes pending changes, then commits the datastore transaction.
    ///
    /// # Errors
    ///
    /// Returns the flush or commit error. The transaction stays open, so
    /// the caller should roll back.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.flush()?;
        self.store.commit()?;
        debug!("committed transaction");
        Ok(())
    }

    /// Rolls back the datastore transaction and clears the persistence
    /// context.
    ///
    /// # Errors
    ///
    /// Returns a datastore error if no transaction is active. The context is
    /// cleared either way.
    pub fn rollback(&mut self) -> CoreResult<()> {
        let result = self.store.rollback();
        self.context.clear();
        result?;
        debug!("rolled back transaction");
        Ok(())
    }

    /// Returns true while a datastore transaction is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.store.in_transaction()
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on
    /// `Err` or a failed commit.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of begin or commit.
    pub fn transaction<F, T>(&mut self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Self) -> CoreResult<T>,
    {
        self.begin()?;
        let result = f(self).and_then(|value| self.commit().map(|()| value));
        if result.is_err() && self.store.in_transaction() {
            if let Err(err) = self.rollback() {
                warn!(error = %err, "rollback after failed transaction failed");
            }
        }
        result
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("config", &self.config)
            .field("managed", &self.context.len())
            .field("cached_plans", &self.cached_plans())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EntityDescriptor, FieldDescriptor, FieldType, RelationDescriptor};
    use entiql_store::InMemoryDatastore;

    fn registry() -> Arc<EntityRegistry> {
        let registry = EntityRegistry::builder()
            .entity(
                EntityDescriptor::new("Team", "team", "id")
                    .field(FieldDescriptor::new("id", FieldType::Integer))
                    .field(FieldDescriptor::new("name", FieldType::Text))
                    .relation(RelationDescriptor::one_to_many("members", "Member", "team")),
            )
            .entity(
                EntityDescriptor::new("Member", "member", "id")
                    .field(FieldDescriptor::new("id", FieldType::Integer))
                    .field(FieldDescriptor::new("username", FieldType::Text))
                    .field(FieldDescriptor::new("age", FieldType::Integer))
                    .relation(RelationDescriptor::many_to_one("team", "Team", "team_id")),
            )
            .build()
            .unwrap();
        Arc::new(registry)
    }

    fn manager_with(config: Config) -> (EntityManager, Arc<InMemoryDatastore>) {
        let registry = registry();
        let store = Arc::new(InMemoryDatastore::new());
        registry.create_tables(store.as_ref()).unwrap();
        let em = EntityManager::with_config(registry, Arc::clone(&store) as Arc<dyn Datastore>, config);
        (em, store)
    }

    fn manager() -> (EntityManager, Arc<InMemoryDatastore>) {
        manager_with(Config::default())
    }

    fn member(em: &mut EntityManager, name: &str, age: i64, team: Option<&EntityRef>) -> EntityRef {
        let member = em.new_entity("Member").unwrap();
        member.set("username", name).unwrap();
        member.set("age", age).unwrap();
        member.set_reference("team", team).unwrap();
        em.persist(&member).unwrap();
        member
    }

    fn team(em: &mut EntityManager, name: &str) -> EntityRef {
        let team = em.new_entity("Team").unwrap();
        team.set("name", name).unwrap();
        em.persist(&team).unwrap();
        team
    }

    #[test]
    fn persist_assigns_identity_and_find_hits_cache() {
        let (mut em, store) = manager();
        let m = member(&mut em, "member1", 10, None);
        assert_eq!(m.state(), ObjectState::Managed);
        assert_eq!(m.id(), Value::Integer(1));

        let found = em.find("Member", 1).unwrap().unwrap();
        assert!(found.same_as(&m));
        assert_eq!(store.row_count("member").unwrap(), 0);

        em.flush().unwrap();
        assert_eq!(store.row_count("member").unwrap(), 1);
    }

    #[test]
    fn find_loads_once_per_identity() {
        let (mut em, _store) = manager();
        member(&mut em, "member1", 10, None);
        em.flush().unwrap();
        em.clear();

        let first = em.find("Member", 1).unwrap().unwrap();
        let second = em.find("Member", 1).unwrap().unwrap();
        assert!(first.same_as(&second));
        assert_eq!(first.get("username").unwrap(), Value::from("member1"));
        assert!(em.find("Member", 99).unwrap().is_none());
    }

    #[test]
    fn removed_objects_are_not_found() {
        let (mut em, store) = manager();
        let m = member(&mut em, "member1", 10, None);
        em.flush().unwrap();

        em.remove(&m).unwrap();
        assert!(em.find("Member", 1).unwrap().is_none());
        assert!(!em.contains(&m));

        em.persist(&m).unwrap();
        assert_eq!(m.state(), ObjectState::Managed);

        em.remove(&m).unwrap();
        em.flush().unwrap();
        assert_eq!(store.row_count("member").unwrap(), 0);
        assert_eq!(m.state(), ObjectState::Detached);
        assert!(matches!(
            em.persist(&m),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn auto_flush_before_query() {
        let (mut em, _store) = manager();
        member(&mut em, "member1", 10, None);
        let found = em
            .create_query("select m from Member m")
            .unwrap()
            .entities()
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn commit_mode_defers_flush() {
        let (mut em, store) = manager_with(Config::new().flush_mode(FlushMode::Commit));
        member(&mut em, "member1", 10, None);
        let found = em
            .create_query("select m from Member m")
            .unwrap()
            .entities()
            .unwrap();
        assert!(found.is_empty());

        em.begin().unwrap();
        em.commit().unwrap();
        assert_eq!(store.row_count("member").unwrap(), 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let (mut em, store) = manager();
        let result: CoreResult<()> = em.transaction(|em| {
            member(em, "member1", 10, None);
            em.flush()?;
            Err(CoreError::invalid_operation("stop"))
        });
        assert!(result.is_err());
        assert!(!em.is_active());
        assert!(em.context().is_empty());
        assert_eq!(store.row_count("member").unwrap(), 0);
    }

    #[test]
    fn transaction_commits_on_success() {
        let (mut em, store) = manager();
        let id = em
            .transaction(|em| Ok(member(em, "member1", 10, None).id()))
            .unwrap();
        assert_eq!(id, Value::Integer(1));
        assert!(!em.is_active());
        assert_eq!(store.row_count("member").unwrap(), 1);
    }

    #[test]
    fn auto_begin_opens_transaction_on_write() {
        let (mut em, _store) = manager_with(Config::new().auto_begin(true));
        member(&mut em, "member1", 10, None);
        assert!(!em.is_active());
        em.flush().unwrap();
        assert!(em.is_active());
        em.rollback().unwrap();
        assert!(em.context().is_empty());
    }

    #[test]
    fn relations_load_on_demand() {
        let (mut em, _store) = manager();
        let a = team(&mut em, "teamA");
        member(&mut em, "member1", 10, Some(&a));
        member(&mut em, "member2", 20, Some(&a));
        em.flush().unwrap();
        em.clear();

        let a = em.find("Team", 1).unwrap().unwrap();
        assert!(matches!(
            em.related(&a, "members"),
            Err(CoreError::InvalidOperation { .. })
        ));
        let members = em.load_relation(&a, "members").unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(em.related(&a, "members").unwrap().len(), 2);

        let m = &members[0];
        let owner = em.related(m, "team").unwrap();
        assert!(owner[0].same_as(&a));
    }

    #[test]
    fn owning_reference_loads_through_find() {
        let (mut em, _store) = manager();
        let a = team(&mut em, "teamA");
        member(&mut em, "member1", 10, Some(&a));
        em.flush().unwrap();
        em.clear();

        let m = em.find("Member", 1).unwrap().unwrap();
        assert!(matches!(
            em.related(&m, "team"),
            Err(CoreError::InvalidOperation { .. })
        ));
        let loaded = em.load_relation(&m, "team").unwrap();
        assert_eq!(loaded[0].get("name").unwrap(), Value::from("teamA"));
        assert!(m.reference("team").unwrap().is_loaded());
    }

    #[test]
    fn refresh_clears_staleness() {
        let (mut em, _store) = manager();
        let m = member(&mut em, "member1", 10, None);
        let affected = em
            .create_query("update Member m set m.age = 30")
            .unwrap()
            .execute_update()
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(m.get("age").unwrap(), Value::Integer(10));
        assert!(em.context().is_possibly_stale(&m));

        em.refresh(&m).unwrap();
        assert_eq!(m.get("age").unwrap(), Value::Integer(30));
        assert!(!em.context().is_possibly_stale(&m));

        let transient = em.new_entity("Member").unwrap();
        assert!(em.refresh(&transient).is_err());
    }

    #[test]
    fn plans_are_cached_by_text() {
        let (mut em, _store) = manager();
        let first = em.plan("select m from Member m").unwrap();
        let second = em.plan("select m from Member m").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(em.cached_plans(), 1);

        let (mut uncached, _store) = manager_with(Config::new().plan_cache_capacity(0));
        uncached.plan("select m from Member m").unwrap();
        assert_eq!(uncached.cached_plans(), 0);
    }

    #[test]
    fn unknown_named_query() {
        let (mut em, _store) = manager();
        assert!(matches!(
            em.create_named_query("Member.missing"),
            Err(CoreError::UnknownNamedQuery { name }) if name == "Member.missing"
        ));
        assert!(matches!(em.new_entity("Ghost"), Err(CoreError::Parse(_))));
    }
}
