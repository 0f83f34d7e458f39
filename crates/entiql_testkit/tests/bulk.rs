//! Bulk update and delete against a populated persistence context.

use entiql_core::{Config, CoreError, FlushMode};
use entiql_testkit::prelude::*;

#[test]
fn bulk_update_leaves_cached_objects_stale() {
    with_context(|ctx| {
        let seed = seed_teams(ctx).unwrap();
        let member = ctx.find("Member", seed.members[0]).unwrap().unwrap();

        let affected = ctx
            .create_query("update Member m set m.age = 20")
            .unwrap()
            .execute_update()
            .unwrap();
        assert_eq!(affected, 3);

        assert_eq!(member.get_as::<i64>("age").unwrap(), 10);
        assert!(ctx.context().is_possibly_stale(&member));
        assert!(ctx.context().stale_entity_types().contains("Member"));

        // find hits the cache and still sees the old value.
        let cached = ctx.find("Member", seed.members[0]).unwrap().unwrap();
        assert!(cached.same_as(&member));
        assert_eq!(cached.get_as::<i64>("age").unwrap(), 10);

        ctx.clear();
        let fresh = ctx.find("Member", seed.members[0]).unwrap().unwrap();
        assert_eq!(fresh.get_as::<i64>("age").unwrap(), 20);
        assert!(!ctx.context().is_possibly_stale(&fresh));
    });
}

#[test]
fn refresh_picks_up_bulk_changes() {
    with_context(|ctx| {
        let seed = seed_teams(ctx).unwrap();
        let member = ctx.find("Member", seed.members[2]).unwrap().unwrap();
        ctx.create_query("update Member m set m.age = m.age + 1 where m.age >= :min")
            .unwrap()
            .set_parameter("min", 30)
            .execute_update()
            .unwrap();

        ctx.refresh(&member).unwrap();
        assert_eq!(member.get_as::<i64>("age").unwrap(), 31);
        assert!(!ctx.context().is_possibly_stale(&member));
    });
}

#[test]
fn bulk_statements_flush_pending_changes_first() {
    let mut ctx = TestContext::with_config(Config::new().flush_mode(FlushMode::Commit));
    new_member(&mut ctx, "fresh", 5, None, None).unwrap();
    assert_eq!(ctx.rows("member"), 0);

    let affected = ctx
        .create_query("update Member m set m.age = 6 where m.username = 'fresh'")
        .unwrap()
        .execute_update()
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(ctx.rows("member"), 1);
}

#[test]
fn bulk_delete_marks_type_stale() {
    with_context(|ctx| {
        let seed = seed_teams(ctx).unwrap();
        let member = ctx.find("Member", seed.members[0]).unwrap().unwrap();
        let team = ctx.find("Team", seed.team_a).unwrap().unwrap();

        let deleted = ctx
            .create_query("delete from Member m where m.age < 25")
            .unwrap()
            .execute_update()
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(ctx.rows("member"), 1);
        assert!(ctx.context().is_possibly_stale(&member));
        assert!(!ctx.context().is_possibly_stale(&team));

        assert!(ctx.refresh(&member).is_err());
    });
}

#[test]
fn enum_assignment_takes_labels() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        let affected = ctx
            .create_query("update Member m set m.memberType = :type where m.age > 15")
            .unwrap()
            .set_parameter("type", "ADMIN")
            .execute_update()
            .unwrap();
        assert_eq!(affected, 2);

        let admins: Vec<i64> = ctx
            .create_query("select count(m) from Member m where m.memberType = jpql.MemberType.ADMIN")
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(admins, [3]);

        assert!(matches!(
            ctx.create_query("update Member m set m.memberType = :type")
                .unwrap()
                .set_parameter("type", "ROOT")
                .execute_update(),
            Err(CoreError::ParameterType { .. })
        ));
    });
}

#[test]
fn select_plans_are_rejected() {
    with_context(|ctx| {
        assert!(matches!(
            ctx.create_query("select m from Member m")
                .unwrap()
                .execute_update(),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            ctx.create_query("delete from Member m")
                .unwrap()
                .result_list(),
            Err(CoreError::InvalidOperation { .. })
        ));
    });
}
