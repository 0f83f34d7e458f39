//! Query walkthrough over the Member/Team schema: typed results, parameters,
//! DTOs, paging, joins, enums, case expressions and functions.

use entiql_core::{CoreError, ParseError, Projected};
use entiql_value::Value;
use entiql_testkit::prelude::*;

#[test]
fn typed_entity_and_scalar_queries() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        let members = ctx
            .create_query("select m from Member m")
            .unwrap()
            .entities()
            .unwrap();
        assert_eq!(members.len(), 3);

        let names: Vec<String> = ctx
            .create_query("select m.username from Member m order by m.age desc")
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(names, ["회원3", "회원2", "회원1"]);

        let pairs: Vec<(String, i64)> = ctx
            .create_query("select m.username, m.age from Member m where m.age < 15")
            .unwrap()
            .constructed()
            .unwrap();
        assert_eq!(pairs, [("회원1".to_string(), 10)]);
    });
}

#[test]
fn named_parameters_filter_results() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        let found = ctx
            .create_query("select m from Member m where m.username = :username")
            .unwrap()
            .set_parameter("username", "회원1")
            .single_result()
            .unwrap();
        let member = found.as_entity().unwrap();
        assert_eq!(member.get_as::<i64>("age").unwrap(), 10);

        let none = ctx
            .create_query("select m from Member m where m.username = :username")
            .unwrap()
            .set_parameter(":username", "nobody")
            .single_result();
        assert!(matches!(none, Err(CoreError::NoResult)));

        let many = ctx
            .create_query("select m from Member m where m.age > :age")
            .unwrap()
            .set_parameter("age", 5)
            .single_result();
        assert!(matches!(many, Err(CoreError::NonUniqueResult)));
    });
}

#[test]
fn parameter_binding_errors() {
    with_context(|ctx| {
        let query = "select m from Member m where m.username = :username";
        assert!(matches!(
            ctx.create_query(query).unwrap().result_list(),
            Err(CoreError::MissingParameter { name }) if name == "username"
        ));
        assert!(matches!(
            ctx.create_query(query)
                .unwrap()
                .set_parameter("username", "a")
                .set_parameter("extra", 1)
                .result_list(),
            Err(CoreError::UnknownParameter { name }) if name == "extra"
        ));
        assert!(matches!(
            ctx.create_query(query)
                .unwrap()
                .set_parameter("username", 7)
                .result_list(),
            Err(CoreError::ParameterType { .. })
        ));
    });
}

fn names(ctx: &mut TestContext, ql: &str) -> Vec<String> {
    ctx.create_query(ql).unwrap().scalars().unwrap()
}

#[test]
fn predicates_and_distinct() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        assert_eq!(
            names(
                ctx,
                "select m.username from Member m where m.username like '회원%' and m.age between 15 and 30 order by m.age",
            ),
            ["회원2", "회원3"]
        );
        assert_eq!(
            names(
                ctx,
                "select m.username from Member m where m.age in (10, 30) order by m.age",
            ),
            ["회원1", "회원3"]
        );
        assert_eq!(
            names(
                ctx,
                "select m.username from Member m where not (m.age > 10) or m.username = '회원3' order by m.age",
            ),
            ["회원1", "회원3"]
        );
        assert_eq!(
            names(
                ctx,
                "select distinct t.name from Member m join m.team t order by t.name",
            ),
            ["teamA", "teamB"]
        );
    });
}

#[test]
fn constructor_projection_builds_untracked_dtos() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        let dtos: Vec<MemberDto> = ctx
            .create_query("select new jpql.MemberDTO(m.username, m.age) from Member m order by m.age")
            .unwrap()
            .constructed()
            .unwrap();
        assert_eq!(
            dtos[0],
            MemberDto {
                username: Some("회원1".into()),
                age: 10
            }
        );
        assert_eq!(dtos.len(), 3);
        assert!(ctx.context().is_empty());

        let rows = ctx
            .create_query("select new MemberDTO(m.username, m.age) from Member m where m.age = 20")
            .unwrap()
            .result_list()
            .unwrap();
        match &rows[0] {
            Projected::Constructed(row) => {
                assert_eq!(row.type_name(), "jpql.MemberDTO");
                assert_eq!(row.get("username"), Some(&Value::from("회원2")));
            }
            other => panic!("unexpected {other:?}"),
        }
    });
}

#[test]
fn paging_returns_the_requested_window() {
    with_context(|ctx| {
        seed_members(ctx, 15).unwrap();
        let page = ctx
            .create_query("select m from Member m")
            .unwrap()
            .first_result(1)
            .max_results(10)
            .entities()
            .unwrap();
        let ages: Vec<i64> = page.iter().map(|m| m.get_as("age").unwrap()).collect();
        assert_eq!(ages, (1..=10).collect::<Vec<_>>());

        let tail: Vec<i64> = ctx
            .create_query("select m.age from Member m order by m.age desc")
            .unwrap()
            .first_result(12)
            .max_results(10)
            .scalars()
            .unwrap();
        assert_eq!(tail, [2, 1, 0]);

        let past_end = ctx
            .create_query("select m from Member m")
            .unwrap()
            .first_result(20)
            .result_list()
            .unwrap();
        assert!(past_end.is_empty());
    });
}

#[test]
fn explicit_and_implicit_joins() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        let inner: Vec<String> = ctx
            .create_query(
                "select m.username from Member m inner join m.team t where t.name = :team order by m.age",
            )
            .unwrap()
            .set_parameter("team", "teamA")
            .scalars()
            .unwrap();
        assert_eq!(inner, ["회원1", "회원2"]);

        let implicit: Vec<String> = ctx
            .create_query("select m.username from Member m where m.team.name = 'teamB'")
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(implicit, ["회원3"]);

        let team_names: Vec<Option<String>> = ctx
            .create_query("select m.team.name from Member m order by m.age")
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(
            team_names,
            [Some("teamA".into()), Some("teamA".into()), Some("teamB".into())]
        );
    });
}

#[test]
fn left_join_keeps_members_without_team() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        ctx.transaction(|em| new_member(em, "loner", 50, None, None).map(|_| ()))
            .unwrap();

        let inner = ctx
            .create_query("select m, t from Member m join m.team t")
            .unwrap()
            .result_list()
            .unwrap();
        assert_eq!(inner.len(), 3);

        let left = ctx
            .create_query("select m, t from Member m left join m.team t order by m.age")
            .unwrap()
            .result_list()
            .unwrap();
        assert_eq!(left.len(), 4);
        match &left[3] {
            Projected::Tuple(items) => {
                assert!(items[0].as_entity().is_some());
                assert_eq!(items[1].as_scalar(), Some(&Value::Null));
            }
            other => panic!("unexpected {other:?}"),
        }
    });
}

#[test]
fn enum_literals_and_parameters() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        let by_literal: Vec<String> = ctx
            .create_query("select m.username from Member m where m.memberType = jpql.MemberType.ADMIN")
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(by_literal, ["회원1"]);

        let by_param: Vec<String> = ctx
            .create_query("select m.username from Member m where m.memberType = :type order by m.age")
            .unwrap()
            .set_parameter("type", "USER")
            .scalars()
            .unwrap();
        assert_eq!(by_param, ["회원2", "회원3"]);

        assert!(matches!(
            ctx.create_query("select m from Member m where m.memberType = jpql.MemberType.ROOT"),
            Err(CoreError::Parse(ParseError::UnknownEnumLabel { .. }))
        ));
    });
}

#[test]
fn case_expressions() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        let labels: Vec<String> = ctx
            .create_query(
                "select case when m.age <= 10 then '학생요금' when m.age >= 60 then '경로요금' else '일반요금' end \
                 from Member m order by m.age",
            )
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(labels, ["학생요금", "일반요금", "일반요금"]);

        let names: Vec<String> = ctx
            .create_query("select coalesce(m.username, '이름 없는 회원') from Member m where m.age = 10")
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(names, ["회원1"]);

        let nulled: Vec<Option<String>> = ctx
            .create_query("select nullif(m.username, '회원1') from Member m order by m.age")
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(nulled, [None, Some("회원2".into()), Some("회원3".into())]);
    });
}

#[test]
fn string_functions_and_aggregates() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        let row: Vec<(String, String, i64, i64)> = ctx
            .create_query(
                "select concat('a', 'b'), substring(m.username, 1, 1), locate('de', 'abcdefg'), length(m.username) \
                 from Member m where m.age = 10",
            )
            .unwrap()
            .constructed()
            .unwrap();
        assert_eq!(row, [("ab".to_string(), "회".to_string(), 4, 3)]);

        let stats: Vec<(i64, i64, i64, i64)> = ctx
            .create_query("select count(m), sum(m.age), min(m.age), max(m.age) from Member m")
            .unwrap()
            .constructed()
            .unwrap();
        assert_eq!(stats, [(3, 60, 10, 30)]);

        let joined: Vec<String> = ctx
            .create_query("select function('group_concat', m.username) from Member m where m.age < 25")
            .unwrap()
            .scalars()
            .unwrap();
        assert_eq!(joined, ["회원1,회원2"]);
    });
}

#[test]
fn named_query_runs_like_inline_text() {
    with_context(|ctx| {
        seed_teams(ctx).unwrap();
        let found = ctx
            .create_named_query("Member.findByUsername")
            .unwrap()
            .set_parameter("username", "회원3")
            .entities()
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_as::<i64>("age").unwrap(), 30);
        assert!(matches!(
            ctx.create_named_query("Member.nope"),
            Err(CoreError::UnknownNamedQuery { .. })
        ));
    });
}

#[test]
fn streams_project_rows_lazily() {
    with_context(|ctx| {
        seed_members(ctx, 5).unwrap();
        let mut stream = ctx
            .create_query("select m from Member m")
            .unwrap()
            .result_stream()
            .unwrap();
        let first = stream.next().unwrap().unwrap();
        assert!(first.as_entity().is_some());
        assert_eq!(stream.count(), 4);
        assert_eq!(ctx.context().len(), 5);
    });
}

#[test]
fn translation_errors_surface_at_create_query() {
    with_context(|ctx| {
        assert!(matches!(
            ctx.create_query("select m from Member"),
            Err(CoreError::Parse(ParseError::Syntax { .. }))
        ));
        assert!(matches!(
            ctx.create_query("select m from Ghost m"),
            Err(CoreError::Parse(ParseError::UnknownEntity { .. }))
        ));
        assert!(matches!(
            ctx.create_query("select m.nope from Member m"),
            Err(CoreError::Parse(ParseError::UnknownField { .. }))
        ));
        assert!(matches!(
            ctx.create_query("select case when m.age < 10 then 'a' else 1 end from Member m"),
            Err(CoreError::Parse(ParseError::MalformedCase { .. }))
        ));
    });
}
