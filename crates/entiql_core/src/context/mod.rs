//! Persistence context: the identity map and unit of work.
//!
//! The context owns every object loaded or registered through one
//! `EntityManager`. It guarantees at most one live object per [`Identity`],
//! records which objects are new, changed or removed, and writes those
//! changes on [`PersistenceContext::flush`]: inserts in registration order,
//! then updates, then deletes in removal order.
//!
//! Bulk statements bypass the context. After one runs, every cached object
//! of the affected type is flagged as possibly stale; its values stay as
//! they were until it is refreshed or the context is cleared.

mod identity;
mod object;

pub use identity::Identity;
pub use object::{EntityRef, LazyCollection, LazyRef, ObjectState};

use crate::error::{CoreError, CoreResult};
use crate::registry::{EntityDescriptor, EntityRegistry, FieldType};
use entiql_store::{Datastore, Expr, Mutation, TableRef};
use entiql_value::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Statement counts of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Rows deleted.
    pub deleted: usize,
}

impl FlushSummary {
    /// Returns true if nothing was written.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Identity-mapped cache of tracked objects.
#[derive(Debug, Default)]
pub struct PersistenceContext {
    identity_map: HashMap<Identity, EntityRef>,
    /// Registration order, used for the update phase.
    order: Vec<Identity>,
    pending_inserts: Vec<Identity>,
    pending_removals: Vec<Identity>,
    stale_types: BTreeSet<String>,
}

impl PersistenceContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked objects, including those scheduled for removal.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identity_map.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identity_map.is_empty()
    }

    /// Tracked objects in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityRef> {
        self.order.iter().filter_map(|i| self.identity_map.get(i))
    }

    /// Starts tracking an object.
    ///
    /// NEW objects are scheduled for insertion; MANAGED objects are tracked
    /// as loaded. Registering the tracked instance again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the object has no identity,
    /// is removed or detached, or another object with the same identity is
    /// already tracked.
    pub fn register(&mut self, entity: &EntityRef) -> CoreResult<Identity> {
        let identity = entity.identity().ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "cannot register a {} without an identity",
                entity.entity_name()
            ))
        })?;
        if let Some(existing) = self.identity_map.get(&identity) {
            if existing.same_as(entity) {
                return Ok(identity);
            }
            return Err(CoreError::invalid_operation(format!(
                "another instance of {identity} is already managed"
            )));
        }
        match entity.state() {
            ObjectState::New => self.pending_inserts.push(identity.clone()),
            ObjectState::Managed => {}
            state => {
                return Err(CoreError::invalid_operation(format!(
                    "cannot register {identity} in state {state:?}"
                )))
            }
        }
        self.identity_map.insert(identity.clone(), entity.clone());
        self.order.push(identity.clone());
        trace!(%identity, "registered object");
        Ok(identity)
    }

    /// Returns the tracked object for a row, creating and registering it if
    /// the identity is not tracked yet. Existing objects are returned
    /// unchanged. Returns `None` when the row's key is null.
    pub(crate) fn materialize(
        &mut self,
        descriptor: &Arc<EntityDescriptor>,
        row: &[Value],
    ) -> Option<EntityRef> {
        let key = row.get(descriptor.id_index()).filter(|k| !k.is_null())?;
        let identity = Identity::new(&descriptor.name, key.clone());
        if let Some(existing) = self.identity_map.get(&identity) {
            return Some(existing.clone());
        }
        let entity = EntityRef::from_row(Arc::clone(descriptor), row);
        self.identity_map.insert(identity.clone(), entity.clone());
        self.order.push(identity.clone());
        trace!(%identity, "materialized object");
        Some(entity)
    }

    /// Looks up an object in the cache only. Objects scheduled for removal
    /// are not returned.
    #[must_use]
    pub fn find(&self, identity: &Identity) -> Option<EntityRef> {
        self.identity_map
            .get(identity)
            .filter(|e| e.state() != ObjectState::Removed)
            .cloned()
    }

    /// Returns true if this exact object is tracked and not removed.
    #[must_use]
    pub fn contains(&self, entity: &EntityRef) -> bool {
        entity.state() != ObjectState::Removed && self.tracks(entity)
    }

    /// Returns true if some object with this identity is tracked, in any
    /// state.
    pub(crate) fn is_tracked(&self, identity: &Identity) -> bool {
        self.identity_map.contains_key(identity)
    }

    /// Returns true if this exact object is tracked, in any state.
    pub(crate) fn tracks(&self, entity: &EntityRef) -> bool {
        entity
            .identity()
            .and_then(|i| self.identity_map.get(&i))
            .is_some_and(|e| e.same_as(entity))
    }

    /// Schedules an object for deletion.
    ///
    /// A NEW object that was never flushed is simply forgotten and becomes
    /// DETACHED. Removing a removed object again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the object is not tracked
    /// by this context.
    pub fn mark_removed(&mut self, entity: &EntityRef) -> CoreResult<()> {
        if !self.tracks(entity) {
            return Err(CoreError::invalid_operation(format!(
                "cannot remove an untracked {}",
                entity.entity_name()
            )));
        }
        let Some(identity) = entity.identity() else {
            return Ok(());
        };
        match entity.state() {
            ObjectState::New => {
                self.forget(&identity);
                entity.set_state(ObjectState::Detached);
            }
            ObjectState::Managed => {
                entity.set_state(ObjectState::Removed);
                self.pending_removals.push(identity);
            }
            ObjectState::Removed | ObjectState::Detached => {}
        }
        Ok(())
    }

    /// Undoes a pending removal.
    pub(crate) fn unremove(&mut self, entity: &EntityRef) {
        if let Some(identity) = entity.identity() {
            self.pending_removals.retain(|i| *i != identity);
            entity.set_state(ObjectState::Managed);
        }
    }

    /// Stops tracking one object. Its pending changes are discarded.
    pub fn detach(&mut self, entity: &EntityRef) {
        if !self.tracks(entity) {
            return;
        }
        if let Some(identity) = entity.identity() {
            self.forget(&identity);
        }
        entity.set_state(ObjectState::Detached);
    }

    fn forget(&mut self, identity: &Identity) {
        self.identity_map.remove(identity);
        self.order.retain(|i| i != identity);
        self.pending_inserts.retain(|i| i != identity);
        self.pending_removals.retain(|i| i != identity);
    }

    /// Detaches every tracked object and empties the identity map.
    pub fn clear(&mut self) {
        for entity in self.identity_map.values() {
            entity.set_state(ObjectState::Detached);
        }
        let count = self.identity_map.len();
        self.identity_map.clear();
        self.order.clear();
        self.pending_inserts.clear();
        self.pending_removals.clear();
        self.stale_types.clear();
        debug!(detached = count, "cleared persistence context");
    }

    /// Returns true if any insert, update or delete is waiting.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        !self.pending_inserts.is_empty()
            || !self.pending_removals.is_empty()
            || self
                .entities()
                .any(|e| e.state() == ObjectState::Managed && e.is_dirty())
    }

    /// Returns true if a pending change touches one of the entity types.
    #[must_use]
    pub fn has_pending_changes_for(&self, types: &BTreeSet<String>) -> bool {
        let touches = |i: &Identity| types.contains(i.entity());
        self.pending_inserts.iter().any(touches)
            || self.pending_removals.iter().any(touches)
            || self.entities().any(|e| {
                types.contains(e.entity_name())
                    && e.state() == ObjectState::Managed
                    && e.is_dirty()
            })
    }

    /// Flags every cached object of `entity` as possibly stale.
    pub fn mark_stale(&mut self, entity: &str) {
        let mut flagged = 0_usize;
        for object in self.identity_map.values() {
            if object.entity_name() == entity {
                object.borrow_mut().possibly_stale = true;
                flagged += 1;
            }
        }
        self.stale_types.insert(entity.to_string());
        debug!(entity, flagged, "marked cached objects possibly stale");
    }

    /// Returns true if a bulk statement may have changed the object's row
    /// since it was loaded.
    #[must_use]
    pub fn is_possibly_stale(&self, entity: &EntityRef) -> bool {
        entity.borrow().possibly_stale
    }

    /// Entity types touched by bulk statements since the last clear.
    #[must_use]
    pub const fn stale_entity_types(&self) -> &BTreeSet<String> {
        &self.stale_types
    }

    /// Writes pending changes: inserts, then updates of dirty columns, then
    /// deletes.
    ///
    /// Each change is dropped from the pending set only once the datastore
    /// has accepted it, so after a failure the remaining changes are still
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] for a field value the registry
    /// rejects, or the datastore's error.
    pub fn flush(
        &mut self,
        registry: &EntityRegistry,
        store: &dyn Datastore,
    ) -> CoreResult<FlushSummary> {
        let mut summary = FlushSummary::default();

        while let Some(identity) = self.pending_inserts.first().cloned() {
            if let Some(entity) = self.identity_map.get(&identity) {
                validate(registry, entity)?;
                let columns = entity.row_columns();
                let (values, params): (Vec<_>, Vec<_>) = columns
                    .into_iter()
                    .enumerate()
                    .map(|(i, (column, value))| ((column, Expr::Param(i)), value))
                    .unzip();
                let mutation = Mutation::Insert {
                    table: entity.descriptor().table.clone(),
                    values,
                };
                store.execute_mutation(&mutation, &params)?;
                entity.set_state(ObjectState::Managed);
                entity.mark_clean();
                summary.inserted += 1;
            }
            self.pending_inserts.remove(0);
        }

        for identity in &self.order {
            let Some(entity) = self.identity_map.get(identity) else {
                continue;
            };
            if entity.state() != ObjectState::Managed {
                continue;
            }
            let changed = entity.dirty_columns();
            if changed.is_empty() {
                continue;
            }
            validate(registry, entity)?;
            let descriptor = entity.descriptor();
            let mut params: Vec<Value> = Vec::with_capacity(changed.len() + 1);
            let mut assignments = Vec::with_capacity(changed.len());
            for (column, value) in changed {
                assignments.push((column, Expr::Param(params.len())));
                params.push(value);
            }
            let filter = Expr::eq(
                Expr::column("t", descriptor.id_column()),
                Expr::Param(params.len()),
            );
            params.push(identity.key().clone());
            let mutation = Mutation::Update {
                table: TableRef::new(&descriptor.table, "t"),
                assignments,
                filter: Some(filter),
            };
            store.execute_mutation(&mutation, &params)?;
            entity.mark_clean();
            summary.updated += 1;
        }

        while let Some(identity) = self.pending_removals.first().cloned() {
            if let Some(entity) = self.identity_map.get(&identity).cloned() {
                let descriptor = entity.descriptor();
                let mutation = Mutation::Delete {
                    table: TableRef::new(&descriptor.table, "t"),
                    filter: Some(Expr::eq(
                        Expr::column("t", descriptor.id_column()),
                        Expr::Param(0),
                    )),
                };
                store.execute_mutation(&mutation, &[identity.key().clone()])?;
                self.forget(&identity);
                entity.set_state(ObjectState::Detached);
                summary.deleted += 1;
            } else {
                self.pending_removals.remove(0);
            }
        }

        if !summary.is_empty() {
            debug!(
                inserted = summary.inserted,
                updated = summary.updated,
                deleted = summary.deleted,
                "flushed persistence context"
            );
        }
        Ok(summary)
    }
}

/// Checks nullability and enumeration labels before a write.
fn validate(registry: &EntityRegistry, entity: &EntityRef) -> CoreResult<()> {
    let descriptor = entity.descriptor();
    for (field, value) in descriptor.fields.iter().zip(entity.values()) {
        if value.is_null() {
            if !field.nullable {
                return Err(CoreError::invalid_value(
                    &descriptor.name,
                    &field.name,
                    "field is not nullable",
                ));
            }
            continue;
        }
        if let FieldType::Enum(name) = &field.ty {
            let accepted = registry
                .enumeration(name)
                .is_some_and(|e| e.accepts(&value));
            if !accepted {
                return Err(CoreError::invalid_value(
                    &descriptor.name,
                    &field.name,
                    format!("{value} is not a {name} label"),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EnumDescriptor, FieldDescriptor, RelationDescriptor};
    use entiql_store::InMemoryDatastore;

    fn registry() -> EntityRegistry {
        EntityRegistry::builder()
            .entity(
                EntityDescriptor::new("Team", "team", "id")
                    .field(FieldDescriptor::new("id", FieldType::Integer))
                    .field(FieldDescriptor::new("name", FieldType::Text)),
            )
            .entity(
                EntityDescriptor::new("Member", "member", "id")
                    .field(FieldDescriptor::new("id", FieldType::Integer))
                    .field(FieldDescriptor::new("username", FieldType::Text).nullable())
                    .field(
                        FieldDescriptor::new("memberType", FieldType::Enum("MemberType".into()))
                            .nullable(),
                    )
                    .relation(RelationDescriptor::many_to_one("team", "Team", "team_id")),
            )
            .enumeration(EnumDescriptor::new("MemberType", ["ADMIN", "USER"]))
            .build()
            .unwrap()
    }

    fn setup() -> (EntityRegistry, InMemoryDatastore) {
        let registry = registry();
        let store = InMemoryDatastore::new();
        registry.create_tables(&store).unwrap();
        (registry, store)
    }

    fn new_member(registry: &EntityRegistry, id: i64, name: &str) -> EntityRef {
        let m = EntityRef::new_transient(Arc::clone(registry.entity("Member").unwrap()));
        m.assign_id(Value::Integer(id));
        m.set("username", name).unwrap();
        m
    }

    #[test]
    fn register_and_find() {
        let (registry, _) = setup();
        let mut context = PersistenceContext::new();
        let m = new_member(&registry, 1, "member1");
        let identity = context.register(&m).unwrap();
        assert_eq!(identity, Identity::new("Member", 1));
        assert!(context.find(&identity).unwrap().same_as(&m));
        assert!(context.contains(&m));
        assert_eq!(context.register(&m).unwrap(), identity);

        let twin = new_member(&registry, 1, "other");
        assert!(matches!(
            context.register(&twin),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(context.has_pending_changes());
    }

    #[test]
    fn register_requires_identity() {
        let (registry, _) = setup();
        let mut context = PersistenceContext::new();
        let m = EntityRef::new_transient(Arc::clone(registry.entity("Member").unwrap()));
        assert!(context.register(&m).is_err());
    }

    #[test]
    fn materialize_reuses_tracked_objects() {
        let (registry, _) = setup();
        let descriptor = Arc::clone(registry.entity("Member").unwrap());
        let mut context = PersistenceContext::new();
        let row = [
            Value::Integer(1),
            Value::from("member1"),
            Value::Null,
            Value::Null,
        ];
        let a = context.materialize(&descriptor, &row).unwrap();
        a.set("username", "changed").unwrap();
        let b = context.materialize(&descriptor, &row).unwrap();
        assert!(a.same_as(&b));
        assert_eq!(b.get_as::<String>("username").unwrap(), "changed");

        let null_key = [Value::Null, Value::Null, Value::Null, Value::Null];
        assert!(context.materialize(&descriptor, &null_key).is_none());
    }

    #[test]
    fn flush_writes_insert_update_delete() {
        let (registry, store) = setup();
        let mut context = PersistenceContext::new();
        let a = new_member(&registry, 1, "a");
        let b = new_member(&registry, 2, "b");
        context.register(&a).unwrap();
        context.register(&b).unwrap();
        let summary = context.flush(&registry, &store).unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(a.state(), ObjectState::Managed);
        assert_eq!(store.row_count("member").unwrap(), 2);

        a.set("username", "a2").unwrap();
        context.mark_removed(&b).unwrap();
        assert_eq!(b.state(), ObjectState::Removed);
        assert!(context.find(&Identity::new("Member", 2)).is_none());

        let summary = context.flush(&registry, &store).unwrap();
        assert_eq!(
            summary,
            FlushSummary {
                inserted: 0,
                updated: 1,
                deleted: 1,
            }
        );
        assert_eq!(b.state(), ObjectState::Detached);
        assert!(!a.is_dirty());
        assert_eq!(store.row_count("member").unwrap(), 1);
        assert!(!context.has_pending_changes());
        assert!(context.flush(&registry, &store).unwrap().is_empty());
    }

    #[test]
    fn removing_new_object_forgets_it() {
        let (registry, store) = setup();
        let mut context = PersistenceContext::new();
        let m = new_member(&registry, 1, "a");
        context.register(&m).unwrap();
        context.mark_removed(&m).unwrap();
        assert_eq!(m.state(), ObjectState::Detached);
        assert!(context.is_empty());
        assert!(context.flush(&registry, &store).unwrap().is_empty());
        assert!(matches!(
            context.mark_removed(&m),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn flush_rejects_unknown_enum_label() {
        let (registry, store) = setup();
        let mut context = PersistenceContext::new();
        let m = new_member(&registry, 1, "a");
        m.set("memberType", "ROOT").unwrap();
        context.register(&m).unwrap();
        assert!(matches!(
            context.flush(&registry, &store),
            Err(CoreError::InvalidValue { .. })
        ));
        assert!(context.has_pending_changes());
        assert_eq!(store.row_count("member").unwrap(), 0);

        m.set("memberType", "ADMIN").unwrap();
        assert_eq!(context.flush(&registry, &store).unwrap().inserted, 1);
    }

    #[test]
    fn failed_flush_keeps_remaining_changes() {
        let (registry, store) = setup();
        let mut context = PersistenceContext::new();
        let a = new_member(&registry, 1, "a");
        context.register(&a).unwrap();
        context.flush(&registry, &store).unwrap();

        // A row with the same key written behind the context's back.
        let b = new_member(&registry, 2, "b");
        context.register(&b).unwrap();
        store
            .execute_mutation(
                &Mutation::Insert {
                    table: "member".into(),
                    values: vec![("id".into(), Expr::literal(2))],
                },
                &[],
            )
            .unwrap();

        assert!(matches!(
            context.flush(&registry, &store),
            Err(CoreError::Datastore(_))
        ));
        assert_eq!(b.state(), ObjectState::New);
        assert!(context.has_pending_changes_for(&BTreeSet::from(["Member".to_string()])));
        assert!(!context.has_pending_changes_for(&BTreeSet::from(["Team".to_string()])));
    }

    #[test]
    fn clear_detaches_everything() {
        let (registry, _) = setup();
        let mut context = PersistenceContext::new();
        let m = new_member(&registry, 1, "a");
        context.register(&m).unwrap();
        context.mark_stale("Member");
        context.clear();
        assert!(context.is_empty());
        assert_eq!(m.state(), ObjectState::Detached);
        assert!(context.stale_entity_types().is_empty());
        assert!(!context.contains(&m));
    }

    #[test]
    fn staleness_flags() {
        let (registry, _) = setup();
        let descriptor = Arc::clone(registry.entity("Member").unwrap());
        let mut context = PersistenceContext::new();
        let row = [Value::Integer(1), Value::from("a"), Value::Null, Value::Null];
        let m = context.materialize(&descriptor, &row).unwrap();
        assert!(!context.is_possibly_stale(&m));
        context.mark_stale("Team");
        assert!(!context.is_possibly_stale(&m));
        context.mark_stale("Member");
        assert!(context.is_possibly_stale(&m));
        assert_eq!(
            context.stale_entity_types().iter().collect::<Vec<_>>(),
            vec!["Member", "Team"]
        );
    }

    #[test]
    fn detach_discards_pending_changes() {
        let (registry, store) = setup();
        let mut context = PersistenceContext::new();
        let m = new_member(&registry, 1, "a");
        context.register(&m).unwrap();
        context.detach(&m);
        assert_eq!(m.state(), ObjectState::Detached);
        assert!(!context.has_pending_changes());
        assert!(context.flush(&registry, &store).unwrap().is_empty());
    }
}
