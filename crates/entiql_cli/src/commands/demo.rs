//! Demo command implementation.
//!
//! Each scenario seeds a fresh store and prints the results of a few
//! queries, one JSON line per result.

use super::{open, print_affected, print_results, CliError, CliResult};
use crate::demo_data::{registry, seed_members, seed_teams, MemberDto};
use entiql_core::{EntityManager, EntityRef};
use tracing::info;

/// Scenario names accepted by [`run`].
pub const SCENARIOS: &[&str] = &[
    "typed",
    "parameter",
    "dto",
    "paging",
    "join",
    "enum",
    "case",
    "functions",
    "fetch-join",
    "collection-fetch",
    "named",
    "bulk",
];

/// Runs the demo command.
pub fn run(scenario: &str) -> CliResult<()> {
    if !SCENARIOS.contains(&scenario) {
        return Err(CliError::UnknownScenario(scenario.to_string()));
    }
    let mut em = open(registry()?)?;
    if scenario == "paging" {
        seed_members(&mut em, 100)?;
    } else {
        seed_teams(&mut em)?;
    }
    info!(scenario, "running scenario");

    match scenario {
        "typed" => typed(&mut em),
        "parameter" => parameter(&mut em),
        "dto" => dto(&mut em),
        "paging" => paging(&mut em),
        "join" => join(&mut em),
        "enum" => enumeration(&mut em),
        "case" => case(&mut em),
        "functions" => functions(&mut em),
        "fetch-join" => fetch_join(&mut em),
        "collection-fetch" => collection_fetch(&mut em),
        "named" => named(&mut em),
        _ => bulk(&mut em),
    }
}

fn show(em: &mut EntityManager, ql: &str) -> CliResult<()> {
    info!(query = ql);
    print_results(em.create_query(ql)?)?;
    Ok(())
}

fn typed(em: &mut EntityManager) -> CliResult<()> {
    show(em, "select m from Member m")?;
    show(em, "select m.username from Member m")?;
    show(em, "select m.username, m.age from Member m")
}

fn parameter(em: &mut EntityManager) -> CliResult<()> {
    let ql = "select m from Member m where m.username = :username";
    info!(query = ql, username = "회원1");
    let member = em
        .create_query(ql)?
        .set_parameter("username", "회원1")
        .single_result()?;
    println!("{}", serde_json::to_string(&member)?);
    Ok(())
}

fn dto(em: &mut EntityManager) -> CliResult<()> {
    let ql = "select new jpql.MemberDTO(m.username, m.age) from Member m";
    info!(query = ql);
    let dtos: Vec<MemberDto> = em.create_query(ql)?.constructed()?;
    for dto in &dtos {
        info!(username = ?dto.username, age = dto.age, "dto");
    }
    show(em, ql)
}

fn paging(em: &mut EntityManager) -> CliResult<()> {
    let ql = "select m from Member m order by m.age desc";
    info!(query = ql, first = 1, max = 10);
    print_results(em.create_query(ql)?.first_result(1).max_results(10))?;
    Ok(())
}

fn join(em: &mut EntityManager) -> CliResult<()> {
    show(
        em,
        "select m.username, t.name from Member m inner join m.team t",
    )?;
    show(em, "select m, t from Member m left join m.team t")?;
    show(em, "select m.team.name from Member m")
}

fn enumeration(em: &mut EntityManager) -> CliResult<()> {
    show(
        em,
        "select m.username, m.memberType from Member m where m.memberType = jpql.MemberType.ADMIN",
    )?;
    let ql = "select m.username from Member m where m.memberType = :type";
    info!(query = ql, member_type = "USER");
    print_results(em.create_query(ql)?.set_parameter("type", "USER"))?;
    Ok(())
}

fn case(em: &mut EntityManager) -> CliResult<()> {
    show(
        em,
        "select case when m.age <= 10 then '학생요금' when m.age >= 60 then '경로요금' else '일반요금' end from Member m",
    )?;
    show(em, "select coalesce(m.username, '이름 없는 회원') from Member m")?;
    show(em, "select nullif(m.username, '회원1') from Member m")
}

fn functions(em: &mut EntityManager) -> CliResult<()> {
    show(
        em,
        "select concat('a', 'b'), substring(m.username, 2, 3), locate('de', 'abcdefg') from Member m",
    )?;
    show(em, "select length(m.username), upper(m.username) from Member m")?;
    show(em, "select count(m), sum(m.age), min(m.age), max(m.age) from Member m")?;
    show(em, "select function('group_concat', m.username) from Member m")
}

fn fetch_join(em: &mut EntityManager) -> CliResult<()> {
    let ql = "select m from Member m join fetch m.team";
    info!(query = ql);
    let members = em.create_query(ql)?.entities()?;
    for member in &members {
        print_with_related(em, member, "team")?;
    }
    Ok(())
}

fn collection_fetch(em: &mut EntityManager) -> CliResult<()> {
    let plain = em
        .create_query("select t from Team t join t.members m")?
        .entities()?;
    info!(rows = plain.len(), "plain join repeats teams");

    let ql = "select t from Team t join fetch t.members";
    info!(query = ql);
    let teams = em.create_query(ql)?.entities()?;
    for team in &teams {
        print_with_related(em, team, "members")?;
    }
    Ok(())
}

fn named(em: &mut EntityManager) -> CliResult<()> {
    info!(query = "Member.findByUsername", username = "회원1");
    print_results(
        em.create_named_query("Member.findByUsername")?
            .set_parameter("username", "회원1"),
    )?;
    Ok(())
}

fn bulk(em: &mut EntityManager) -> CliResult<()> {
    let cached = em.find("Member", 1)?;
    let ql = "update Member m set m.age = 20";
    info!(query = ql);
    print_affected(em.create_query(ql)?)?;
    if let Some(member) = cached {
        info!(
            age = member.get_as::<i64>("age")?,
            stale = em.context().is_possibly_stale(&member),
            "cached member after bulk update"
        );
    }
    em.clear();
    show(em, "select m.username, m.age from Member m")
}

fn print_with_related(em: &EntityManager, entity: &EntityRef, relation: &str) -> CliResult<()> {
    let related = em.related(entity, relation)?;
    let line = serde_json::json!({
        "entity": entity,
        relation: related,
    });
    println!("{line}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scenario_runs() {
        for scenario in SCENARIOS {
            run(scenario).unwrap();
        }
    }

    #[test]
    fn unknown_scenario() {
        assert!(matches!(
            run("nope"),
            Err(CliError::UnknownScenario(_))
        ));
    }
}
