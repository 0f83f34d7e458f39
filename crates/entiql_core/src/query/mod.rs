//! Query language front end.
//!
//! Text goes through the lexer and parser into a syntax tree, which the
//! translator binds against the [`EntityRegistry`](crate::EntityRegistry)
//! to produce an [`ExecutionPlan`]. Plans are immutable and shared.

mod ast;
mod lexer;
mod parser;
mod plan;
mod translator;

pub use plan::{
    ExecutionPlan, FetchSpec, JoinClause, ParameterSpec, ParameterType, PlanKind, Projection,
    ProjectionItem, SourceBinding,
};
pub use translator::translate;
