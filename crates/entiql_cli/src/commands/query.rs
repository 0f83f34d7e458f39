//! Query command implementation.

use super::{open, print_affected, print_results, CliError, CliResult};
use crate::demo_data::{registry, seed_teams};
use entiql_core::EntityRegistry;
use entiql_value::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs the query command.
///
/// Without a schema file the demo registry is used and the demo data set
/// is seeded first.
pub fn run(
    ql: &str,
    params: &[String],
    first: Option<usize>,
    max: Option<usize>,
    schema_file: Option<&Path>,
) -> CliResult<()> {
    let bindings = params
        .iter()
        .map(|p| parse_binding(p))
        .collect::<CliResult<Vec<_>>>()?;

    let mut em = match schema_file {
        Some(path) => open(Arc::new(EntityRegistry::from_json_file(path)?))?,
        None => {
            let mut em = open(registry()?)?;
            seed_teams(&mut em)?;
            em
        }
    };

    let mut query = em.create_query(ql)?;
    for (name, value) in bindings {
        query = query.set_parameter(&name, value);
    }
    if let Some(offset) = first {
        query = query.first_result(offset);
    }
    if let Some(limit) = max {
        query = query.max_results(limit);
    }

    if query.plan().kind().is_mutation() {
        let affected = print_affected(query)?;
        info!(affected, "statement executed");
    } else {
        let rows = print_results(query)?;
        info!(rows, "query executed");
    }
    Ok(())
}

/// Splits `name=value` and parses the value.
fn parse_binding(arg: &str) -> CliResult<(String, Value)> {
    let (name, raw) = arg
        .split_once('=')
        .ok_or_else(|| CliError::InvalidParameter(arg.to_string()))?;
    let name = name.trim().trim_start_matches(':');
    if name.is_empty() {
        return Err(CliError::InvalidParameter(arg.to_string()));
    }
    Ok((name.to_string(), parse_value(raw)))
}

/// Integers, `true`, `false` and `null` are typed; quoted or other text is
/// bound as text.
fn parse_value(raw: &str) -> Value {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Value::from(&raw[1..raw.len() - 1]);
    }
    match raw {
        "null" => Value::Null,
        "true" => Value::from(true),
        "false" => Value::from(false),
        _ => raw
            .parse::<i64>()
            .map_or_else(|_| Value::from(raw), Value::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_are_typed() {
        assert_eq!(
            parse_binding("age=20").unwrap(),
            ("age".to_string(), Value::from(20_i64))
        );
        assert_eq!(
            parse_binding(":username=회원1").unwrap(),
            ("username".to_string(), Value::from("회원1"))
        );
        assert_eq!(parse_value("'42'"), Value::from("42"));
        assert_eq!(parse_value("null"), Value::Null);
        assert_eq!(parse_value("true"), Value::from(true));
    }

    #[test]
    fn malformed_bindings_are_rejected() {
        assert!(matches!(
            parse_binding("age"),
            Err(CliError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_binding("=1"),
            Err(CliError::InvalidParameter(_))
        ));
    }

    #[test]
    fn seeded_query_runs() {
        run(
            "select m.username from Member m where m.age > :age",
            &["age=15".to_string()],
            None,
            Some(1),
            None,
        )
        .unwrap();
    }
}
