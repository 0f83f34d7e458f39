//! Unit-of-work flush ordering and failure handling.

use entiql_core::{Config, CoreError, EntityManager, ObjectState};
use entiql_store::{Datastore, StoreError};
use entiql_testkit::prelude::*;
use std::sync::Arc;

fn recording_manager() -> (EntityManager, Arc<RecordingDatastore>) {
    let store = Arc::new(RecordingDatastore::new());
    let em = manager_over(Arc::clone(&store) as Arc<dyn Datastore>, Config::default());
    (em, store)
}

#[test]
fn flush_writes_inserts_then_updates_then_deletes() {
    let (mut em, store) = recording_manager();
    seed_teams(&mut em).unwrap();

    let doomed = em.find("Member", 3).unwrap().unwrap();
    let changed = em.find("Member", 1).unwrap().unwrap();
    store.reset();

    em.remove(&doomed).unwrap();
    changed.set("age", 11).unwrap();
    new_member(&mut em, "late", 40, None, None).unwrap();

    let summary = em.flush().unwrap();
    assert_eq!((summary.inserted, summary.updated, summary.deleted), (1, 1, 1));
    assert_eq!(
        store.writes(),
        vec![
            StoreCall::Insert("member".into()),
            StoreCall::Update("member".into()),
            StoreCall::Delete("member".into()),
        ]
    );
}

#[test]
fn inserts_follow_registration_order() {
    let (mut em, store) = recording_manager();
    em.transaction(|em| {
        let team = new_team(em, "teamA")?;
        new_member(em, "m1", 1, None, Some(&team))?;
        new_team(em, "teamB")?;
        Ok(())
    })
    .unwrap();

    assert_eq!(
        store.calls(),
        vec![
            StoreCall::Begin,
            StoreCall::Insert("team".into()),
            StoreCall::Insert("member".into()),
            StoreCall::Insert("team".into()),
            StoreCall::Commit,
        ]
    );
}

#[test]
fn updates_write_only_changed_objects() {
    let (mut em, store) = recording_manager();
    seed_teams(&mut em).unwrap();
    let members = em
        .create_query("select m from Member m")
        .unwrap()
        .entities()
        .unwrap();
    store.reset();

    members[1].set("username", "renamed").unwrap();
    members[2].set("age", 30).unwrap();
    let summary = em.flush().unwrap();
    assert_eq!(summary.updated, 1);
    assert!(em.flush().unwrap().is_empty());
    assert_eq!(store.writes().len(), 1);
}

#[test]
fn removed_new_objects_are_never_written() {
    let (mut em, store) = recording_manager();
    let member = new_member(&mut em, "ghost", 1, None, None).unwrap();
    em.remove(&member).unwrap();
    assert_eq!(member.state(), ObjectState::Detached);
    assert!(em.flush().unwrap().is_empty());
    assert!(store.writes().is_empty());
}

#[test]
fn failed_flush_keeps_remaining_changes_pending() {
    let failing = Arc::new(FailingDatastore::in_memory());
    let mut em = manager_over(Arc::clone(&failing) as Arc<dyn Datastore>, Config::default());
    new_member(&mut em, "a", 1, None, None).unwrap();
    new_member(&mut em, "b", 2, None, None).unwrap();

    failing.fail_writes_after(1);
    let err = em.flush().unwrap_err();
    assert!(matches!(
        err,
        CoreError::Datastore(StoreError::ConstraintViolation { .. })
    ));
    assert!(em.context().has_pending_changes());

    failing.reset();
    let summary = em.flush().unwrap();
    assert_eq!(summary.inserted, 1);
    assert!(!em.context().has_pending_changes());
}

#[test]
fn failed_commit_rolls_back_the_transaction() {
    let failing = Arc::new(FailingDatastore::in_memory());
    let mut em = manager_over(Arc::clone(&failing) as Arc<dyn Datastore>, Config::default());
    failing.set_fail_commit(true);

    let result = em.transaction(|em| new_member(em, "a", 1, None, None).map(|_| ()));
    assert!(matches!(
        result,
        Err(CoreError::Datastore(StoreError::Transaction { .. }))
    ));
    assert!(!em.is_active());
    assert!(em.context().is_empty());

    failing.reset();
    let count: Vec<i64> = em
        .create_query("select count(m) from Member m")
        .unwrap()
        .scalars()
        .unwrap();
    assert_eq!(count, [0]);
}

#[test]
fn query_failures_surface_as_datastore_errors() {
    let failing = Arc::new(FailingDatastore::in_memory());
    let mut em = manager_over(Arc::clone(&failing) as Arc<dyn Datastore>, Config::default());
    failing.set_fail_queries(true);
    assert!(matches!(
        em.create_query("select m from Member m").unwrap().result_list(),
        Err(CoreError::Datastore(StoreError::Connection { .. }))
    ));
    assert!(matches!(
        em.find("Member", 1),
        Err(CoreError::Datastore(StoreError::Connection { .. }))
    ));
}

#[test]
fn rollback_discards_flushed_rows() {
    with_context(|ctx| {
        ctx.begin().unwrap();
        new_member(ctx, "temp", 1, None, None).unwrap();
        ctx.flush().unwrap();
        assert_eq!(ctx.rows("member"), 1);
        ctx.rollback().unwrap();
        assert_eq!(ctx.rows("member"), 0);
        assert!(ctx.context().is_empty());
    });
}
