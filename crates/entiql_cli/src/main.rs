//! EntiQL CLI
//!
//! Runs object queries against an in-memory datastore seeded with the
//! Member/Team demo data.
//!
//! # Commands
//!
//! - `query` - Run one query and print each result as a JSON line
//! - `demo` - Run one of the walkthrough scenarios

mod commands;
mod demo_data;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// EntiQL command-line query runner.
#[derive(Parser)]
#[command(name = "entiql")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query against the seeded demo data
    Query {
        /// Query text
        ql: String,

        /// Parameter binding as name=value (repeatable)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Results to skip
        #[arg(long)]
        first: Option<usize>,

        /// Maximum number of results
        #[arg(long)]
        max: Option<usize>,

        /// Registry declaration file; the store starts empty when given
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Run a walkthrough scenario
    Demo {
        /// Scenario name (typed, parameter, dto, paging, join, enum, case,
        /// functions, fetch-join, collection-fetch, named, bulk)
        scenario: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Query {
            ql,
            params,
            first,
            max,
            schema,
        } => {
            commands::query::run(&ql, &params, first, max, schema.as_deref())?;
        }
        Commands::Demo { scenario } => {
            commands::demo::run(&scenario)?;
        }
        Commands::Version => {
            println!("EntiQL CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
