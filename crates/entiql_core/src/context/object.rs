//! Tracked objects and their handles.

use super::identity::Identity;
use crate::error::{CoreError, CoreResult};
use crate::registry::{EntityDescriptor, RelationDescriptor};
use entiql_value::{FromValue, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Lifecycle state of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Created by the application; inserted on the next flush once persisted.
    New,
    /// Loaded or flushed, and tracked by a context.
    Managed,
    /// Scheduled for deletion on the next flush.
    Removed,
    /// No longer tracked by any context.
    Detached,
}

/// Single-valued relation slot.
///
/// Holds the target's identity, never the target itself; resolve it with
/// `EntityManager::load_relation` or `EntityManager::related`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LazyRef {
    target: Option<Identity>,
    loaded: bool,
}

impl LazyRef {
    /// Identity of the referenced object, if known.
    #[must_use]
    pub const fn target(&self) -> Option<&Identity> {
        self.target.as_ref()
    }

    /// True once the target is known to be present in the context, or the
    /// reference is known to be empty.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// Collection-valued relation slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LazyCollection {
    members: Option<Vec<Identity>>,
}

impl LazyCollection {
    /// True once the members have been loaded.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.members.is_some()
    }

    /// Member identities in load order, if loaded.
    #[must_use]
    pub fn members(&self) -> Option<&[Identity]> {
        self.members.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RelationSlot {
    Reference(LazyRef),
    Collection(LazyCollection),
}

#[derive(Debug)]
pub(crate) struct TrackedObject {
    pub(crate) state: ObjectState,
    values: Vec<Value>,
    relations: Vec<RelationSlot>,
    /// Field values and reference targets as last read from or written to
    /// the datastore. Absent until the object first reaches the datastore.
    snapshot: Option<(Vec<Value>, Vec<Option<Identity>>)>,
    pub(crate) possibly_stale: bool,
}

impl TrackedObject {
    fn snapshot_of(&self) -> (Vec<Value>, Vec<Option<Identity>>) {
        let targets = self
            .relations
            .iter()
            .map(|slot| match slot {
                RelationSlot::Reference(r) => r.target.clone(),
                RelationSlot::Collection(_) => None,
            })
            .collect();
        (self.values.clone(), targets)
    }
}

/// Builds relation slots from a row laid out as `EntityDescriptor::columns`.
fn relation_slots(descriptor: &EntityDescriptor, row: Option<&[Value]>) -> Vec<RelationSlot> {
    descriptor
        .relations
        .iter()
        .zip(descriptor.join_column_positions())
        .map(|(relation, position)| {
            if relation.cardinality.is_collection() {
                return RelationSlot::Collection(LazyCollection::default());
            }
            let key = position
                .and_then(|p| row.and_then(|r| r.get(p)))
                .filter(|v| !v.is_null());
            RelationSlot::Reference(match key {
                Some(key) => LazyRef {
                    target: Some(Identity::new(&relation.target, key.clone())),
                    loaded: false,
                },
                // An owning side with a null join column is an empty, settled
                // reference; an inverse side is unknown until loaded.
                None => LazyRef {
                    target: None,
                    loaded: relation.is_owning() && row.is_some(),
                },
            })
        })
        .collect()
}

/// Shared handle to an object tracked by a persistence context.
///
/// Handles are cheap to clone; clones refer to the same object, so a change
/// made through one is visible through all. Use [`EntityRef::same_as`] to test
/// for reference identity.
#[derive(Clone)]
pub struct EntityRef {
    descriptor: Arc<EntityDescriptor>,
    inner: Rc<RefCell<TrackedObject>>,
}

impl EntityRef {
    /// Creates a NEW object with every field null.
    pub(crate) fn new_transient(descriptor: Arc<EntityDescriptor>) -> Self {
        let object = TrackedObject {
            state: ObjectState::New,
            values: vec![Value::Null; descriptor.fields.len()],
            relations: relation_slots(&descriptor, None),
            snapshot: None,
            possibly_stale: false,
        };
        Self {
            descriptor,
            inner: Rc::new(RefCell::new(object)),
        }
    }

    /// Creates a MANAGED object from a row laid out as
    /// [`EntityDescriptor::columns`].
    pub(crate) fn from_row(descriptor: Arc<EntityDescriptor>, row: &[Value]) -> Self {
        let mut object = TrackedObject {
            state: ObjectState::Managed,
            values: row[..descriptor.fields.len()].to_vec(),
            relations: relation_slots(&descriptor, Some(row)),
            snapshot: None,
            possibly_stale: false,
        };
        object.snapshot = Some(object.snapshot_of());
        Self {
            descriptor,
            inner: Rc::new(RefCell::new(object)),
        }
    }

    pub(crate) fn borrow(&self) -> Ref<'_, TrackedObject> {
        self.inner.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, TrackedObject> {
        self.inner.borrow_mut()
    }

    /// Entity metadata.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    /// Entity name.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.descriptor.name
    }

    /// Primary key value; null until persisted.
    #[must_use]
    pub fn id(&self) -> Value {
        self.borrow().values[self.descriptor.id_index()].clone()
    }

    /// Identity, once a primary key has been assigned.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        let id = self.id();
        (!id.is_null()).then(|| Identity::new(&self.descriptor.name, id))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ObjectState {
        self.borrow().state
    }

    /// Returns true if both handles refer to the same object.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn field_index(&self, field: &str) -> CoreResult<usize> {
        self.descriptor
            .field_index(field)
            .ok_or_else(|| CoreError::invalid_value(&self.descriptor.name, field, "no such field"))
    }

    fn relation_index(&self, relation: &str) -> CoreResult<usize> {
        self.descriptor.relation_index(relation).ok_or_else(|| {
            CoreError::invalid_value(&self.descriptor.name, relation, "no such relation")
        })
    }

    /// Reads a field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] if the field does not exist.
    pub fn get(&self, field: &str) -> CoreResult<Value> {
        let index = self.field_index(field)?;
        Ok(self.borrow().values[index].clone())
    }

    /// Reads a field and converts it.
    ///
    /// # Errors
    ///
    /// Returns an error if the field does not exist or the conversion fails.
    pub fn get_as<T: FromValue>(&self, field: &str) -> CoreResult<T> {
        Ok(T::from_value(self.get(field)?)?)
    }

    /// Assigns a field. The change is written on the next flush.
    ///
    /// Enumeration labels are checked at flush time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] for an unknown field or a value
    /// of the wrong type, and [`CoreError::InvalidOperation`] for the
    /// identity field.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        let index = self.field_index(field)?;
        if index == self.descriptor.id_index() {
            return Err(CoreError::invalid_operation(format!(
                "the identity of {} cannot be assigned",
                self.descriptor.name
            )));
        }
        let value = value.into();
        let descriptor = &self.descriptor.fields[index];
        if value.is_null() && !descriptor.nullable {
            return Err(CoreError::invalid_value(
                &self.descriptor.name,
                field,
                "field is not nullable",
            ));
        }
        if !value.is_compatible(descriptor.ty.value_type()) {
            return Err(CoreError::invalid_value(
                &self.descriptor.name,
                field,
                format!("expected {}, got {}", descriptor.ty, value.type_name()),
            ));
        }
        self.borrow_mut().values[index] = value;
        Ok(())
    }

    pub(crate) fn assign_id(&self, id: Value) {
        let index = self.descriptor.id_index();
        self.borrow_mut().values[index] = id;
    }

    /// Current single-valued relation slot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] if the relation does not exist or
    /// is collection-valued.
    pub fn reference(&self, relation: &str) -> CoreResult<LazyRef> {
        let index = self.relation_index(relation)?;
        match &self.borrow().relations[index] {
            RelationSlot::Reference(r) => Ok(r.clone()),
            RelationSlot::Collection(_) => Err(CoreError::invalid_value(
                &self.descriptor.name,
                relation,
                "relation is collection-valued",
            )),
        }
    }

    /// Current collection-valued relation slot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] if the relation does not exist or
    /// is single-valued.
    pub fn collection(&self, relation: &str) -> CoreResult<LazyCollection> {
        let index = self.relation_index(relation)?;
        match &self.borrow().relations[index] {
            RelationSlot::Collection(c) => Ok(c.clone()),
            RelationSlot::Reference(_) => Err(CoreError::invalid_value(
                &self.descriptor.name,
                relation,
                "relation is single-valued",
            )),
        }
    }

    /// Points an owning relation at `target`, or clears it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for the inverse side of a
    /// relation or a target without an identity, and
    /// [`CoreError::InvalidValue`] for a target of the wrong entity type.
    pub fn set_reference(&self, relation: &str, target: Option<&Self>) -> CoreResult<()> {
        let index = self.relation_index(relation)?;
        let descriptor = &self.descriptor.relations[index];
        if !descriptor.is_owning() {
            return Err(CoreError::invalid_operation(format!(
                "{}.{relation} is the inverse side; assign the owning side instead",
                self.descriptor.name
            )));
        }
        let identity = match target {
            None => None,
            Some(target) => {
                if target.entity_name() != descriptor.target {
                    return Err(CoreError::invalid_value(
                        &self.descriptor.name,
                        relation,
                        format!(
                            "expected {}, got {}",
                            descriptor.target,
                            target.entity_name()
                        ),
                    ));
                }
                let identity = target.identity().ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "persist the {} before referencing it",
                        target.entity_name()
                    ))
                })?;
                Some(identity)
            }
        };
        self.borrow_mut().relations[index] = RelationSlot::Reference(LazyRef {
            target: identity,
            loaded: true,
        });
        Ok(())
    }

    pub(crate) fn relation_descriptor(&self, relation: &str) -> CoreResult<&RelationDescriptor> {
        let index = self.relation_index(relation)?;
        Ok(&self.descriptor.relations[index])
    }

    /// Marks a reference as resolved. Inverse sides learn their target here;
    /// owning sides keep the target read from the join column.
    pub(crate) fn mark_reference_loaded(&self, relation: &str, target: Option<Identity>) {
        let Some(index) = self.descriptor.relation_index(relation) else {
            return;
        };
        let owning = self.descriptor.relations[index].is_owning();
        let mut object = self.borrow_mut();
        if let RelationSlot::Reference(slot) = &mut object.relations[index] {
            if !owning {
                slot.target = target;
            }
            slot.loaded = true;
        }
    }

    /// Starts a collection as empty if it is not loaded yet. Returns true if
    /// the collection was initialised by this call.
    pub(crate) fn begin_collection(&self, relation: &str) -> bool {
        let Some(index) = self.descriptor.relation_index(relation) else {
            return false;
        };
        let mut object = self.borrow_mut();
        match &mut object.relations[index] {
            RelationSlot::Collection(c) if c.members.is_none() => {
                c.members = Some(Vec::new());
                true
            }
            _ => false,
        }
    }

    /// Adds a member to a loaded collection, ignoring duplicates.
    pub(crate) fn push_member(&self, relation: &str, member: Identity) {
        let Some(index) = self.descriptor.relation_index(relation) else {
            return;
        };
        let mut object = self.borrow_mut();
        if let RelationSlot::Collection(LazyCollection {
            members: Some(members),
        }) = &mut object.relations[index]
        {
            if !members.contains(&member) {
                members.push(member);
            }
        }
    }

    pub(crate) fn set_collection(&self, relation: &str, members: Vec<Identity>) {
        if let Some(index) = self.descriptor.relation_index(relation) {
            self.borrow_mut().relations[index] = RelationSlot::Collection(LazyCollection {
                members: Some(members),
            });
        }
    }

    /// Overwrites the object's state with a fresh row and clears the stale
    /// flag. Loaded collections are reset.
    pub(crate) fn reload(&self, row: &[Value]) {
        let mut object = self.borrow_mut();
        object.values = row[..self.descriptor.fields.len()].to_vec();
        object.relations = relation_slots(&self.descriptor, Some(row));
        object.snapshot = Some(object.snapshot_of());
        object.possibly_stale = false;
    }

    /// Returns true if the object holds changes the datastore has not seen.
    ///
    /// NEW objects are always dirty; MANAGED and DETACHED objects are dirty
    /// when a field or an owning reference differs from its last flushed or
    /// loaded value.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let object = self.borrow();
        match object.state {
            ObjectState::New | ObjectState::Removed => true,
            ObjectState::Managed | ObjectState::Detached => !self.dirty_columns().is_empty(),
        }
    }

    /// `(column, value)` pairs for every changed field and owning reference.
    pub(crate) fn dirty_columns(&self) -> Vec<(String, Value)> {
        let object = self.borrow();
        let Some((values, targets)) = &object.snapshot else {
            return self.row_columns();
        };
        let mut changed = Vec::new();
        for ((field, current), loaded) in self.descriptor.fields.iter().zip(&object.values).zip(values)
        {
            if current != loaded {
                changed.push((field.column.clone(), current.clone()));
            }
        }
        for ((relation, slot), loaded) in self
            .descriptor
            .relations
            .iter()
            .zip(&object.relations)
            .zip(targets)
        {
            if let (Some(column), RelationSlot::Reference(slot)) = (&relation.join_column, slot) {
                if slot.target != *loaded {
                    changed.push((column.clone(), key_of(slot.target.as_ref())));
                }
            }
        }
        changed
    }

    /// `(column, value)` pairs for the whole row, in
    /// [`EntityDescriptor::columns`] order.
    pub(crate) fn row_columns(&self) -> Vec<(String, Value)> {
        let object = self.borrow();
        let fields = self
            .descriptor
            .fields
            .iter()
            .zip(&object.values)
            .map(|(f, v)| (f.column.clone(), v.clone()));
        let references = self
            .descriptor
            .relations
            .iter()
            .zip(&object.relations)
            .filter_map(|(relation, slot)| match (&relation.join_column, slot) {
                (Some(column), RelationSlot::Reference(r)) => {
                    Some((column.clone(), key_of(r.target.as_ref())))
                }
                _ => None,
            });
        fields.chain(references).collect()
    }

    /// Records the current values as written.
    pub(crate) fn mark_clean(&self) {
        let mut object = self.borrow_mut();
        object.snapshot = Some(object.snapshot_of());
    }

    pub(crate) fn set_state(&self, state: ObjectState) {
        self.borrow_mut().state = state;
    }

    /// Field values in declaration order.
    pub(crate) fn values(&self) -> Vec<Value> {
        self.borrow().values.clone()
    }
}

fn key_of(identity: Option<&Identity>) -> Value {
    identity.map_or(Value::Null, |i| i.key().clone())
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let object = self.borrow();
        f.debug_struct("EntityRef")
            .field("entity", &self.descriptor.name)
            .field("state", &object.state)
            .field("values", &object.values)
            .finish()
    }
}

/// Serializes as a map: `@entity`, every field, owning and loaded
/// references as target keys, and loaded collections as key arrays.
impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let object = self.borrow();
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("@entity", &self.descriptor.name)?;
        for (field, value) in self.descriptor.fields.iter().zip(&object.values) {
            map.serialize_entry(&field.name, value)?;
        }
        for (relation, slot) in self.descriptor.relations.iter().zip(&object.relations) {
            match slot {
                RelationSlot::Reference(r) if relation.is_owning() || r.loaded => {
                    map.serialize_entry(&relation.name, &key_of(r.target.as_ref()))?;
                }
                RelationSlot::Collection(LazyCollection {
                    members: Some(members),
                }) => {
                    let keys: Vec<&Value> = members.iter().map(Identity::key).collect();
                    map.serialize_entry(&relation.name, &keys)?;
                }
                _ => {}
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FieldDescriptor, FieldType};

    fn member() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::new("Member", "member", "id")
                .field(FieldDescriptor::new("id", FieldType::Integer))
                .field(FieldDescriptor::new("username", FieldType::Text).nullable())
                .field(FieldDescriptor::new("age", FieldType::Integer))
                .relation(RelationDescriptor::many_to_one("team", "Team", "team_id")),
        )
    }

    fn team() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::new("Team", "team", "id")
                .field(FieldDescriptor::new("id", FieldType::Integer))
                .field(FieldDescriptor::new("name", FieldType::Text))
                .relation(RelationDescriptor::one_to_many("members", "Member", "team")),
        )
    }

    fn loaded_member() -> EntityRef {
        EntityRef::from_row(
            member(),
            &[
                Value::Integer(1),
                Value::from("member1"),
                Value::Integer(10),
                Value::Integer(7),
            ],
        )
    }

    #[test]
    fn loaded_object_is_managed_and_clean() {
        let m = loaded_member();
        assert_eq!(m.state(), ObjectState::Managed);
        assert_eq!(m.identity(), Some(Identity::new("Member", 1)));
        assert_eq!(m.get_as::<String>("username").unwrap(), "member1");
        assert!(!m.is_dirty());

        let team = m.reference("team").unwrap();
        assert_eq!(team.target(), Some(&Identity::new("Team", 7)));
        assert!(!team.is_loaded());
    }

    #[test]
    fn set_tracks_dirty_columns() {
        let m = loaded_member();
        m.set("age", 11).unwrap();
        assert!(m.is_dirty());
        assert_eq!(m.dirty_columns(), vec![("age".to_string(), Value::Integer(11))]);

        m.set("age", 10).unwrap();
        assert!(!m.is_dirty());

        m.mark_clean();
        m.set("username", Value::Null).unwrap();
        assert_eq!(m.dirty_columns(), vec![("username".to_string(), Value::Null)]);
    }

    #[test]
    fn set_rejects_bad_values() {
        let m = loaded_member();
        assert!(matches!(
            m.set("age", "ten"),
            Err(CoreError::InvalidValue { .. })
        ));
        assert!(matches!(
            m.set("age", Value::Null),
            Err(CoreError::InvalidValue { .. })
        ));
        assert!(matches!(
            m.set("nope", 1),
            Err(CoreError::InvalidValue { .. })
        ));
        assert!(matches!(
            m.set("id", 2),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn references() {
        let t = EntityRef::from_row(team(), &[Value::Integer(3), Value::from("teamB")]);
        let m = loaded_member();
        m.set_reference("team", Some(&t)).unwrap();
        assert_eq!(m.dirty_columns(), vec![("team_id".to_string(), Value::Integer(3))]);
        assert!(m.reference("team").unwrap().is_loaded());

        assert!(matches!(
            t.set_reference("members", Some(&m)),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            m.set_reference("team", Some(&m)),
            Err(CoreError::InvalidValue { .. })
        ));

        let unsaved = EntityRef::new_transient(team());
        assert!(matches!(
            m.set_reference("team", Some(&unsaved)),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn collections_accumulate_without_duplicates() {
        let t = EntityRef::from_row(team(), &[Value::Integer(1), Value::from("teamA")]);
        assert!(!t.collection("members").unwrap().is_loaded());
        assert!(t.begin_collection("members"));
        assert!(!t.begin_collection("members"));
        t.push_member("members", Identity::new("Member", 1));
        t.push_member("members", Identity::new("Member", 2));
        t.push_member("members", Identity::new("Member", 1));
        let members = t.collection("members").unwrap();
        assert_eq!(members.members().unwrap().len(), 2);
        assert!(t.reference("members").is_err());
    }

    #[test]
    fn transient_object() {
        let m = EntityRef::new_transient(member());
        assert_eq!(m.state(), ObjectState::New);
        assert_eq!(m.identity(), None);
        assert!(m.is_dirty());
        assert!(m.reference("team").unwrap().target().is_none());
        m.assign_id(Value::Integer(5));
        assert_eq!(m.identity(), Some(Identity::new("Member", 5)));
        assert_eq!(m.row_columns().len(), 4);
    }

    #[test]
    fn handles_share_the_object() {
        let a = loaded_member();
        let b = a.clone();
        let c = loaded_member();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        b.set("age", 30).unwrap();
        assert_eq!(a.get("age").unwrap(), Value::Integer(30));
    }

    #[test]
    fn reload_discards_changes() {
        let m = loaded_member();
        m.set("age", 99).unwrap();
        m.borrow_mut().possibly_stale = true;
        m.reload(&[
            Value::Integer(1),
            Value::from("member1"),
            Value::Integer(20),
            Value::Null,
        ]);
        assert_eq!(m.get("age").unwrap(), Value::Integer(20));
        assert!(!m.is_dirty());
        assert!(!m.borrow().possibly_stale);
        assert!(m.reference("team").unwrap().is_loaded());
    }

    #[test]
    fn serializes_fields_and_references() {
        let m = loaded_member();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "@entity": "Member",
                "id": 1,
                "username": "member1",
                "age": 10,
                "team": 7,
            })
        );
    }
}
