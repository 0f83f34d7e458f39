//! # EntiQL Store
//!
//! The datastore collaborator of EntiQL: a small relational query model,
//! the [`Datastore`] trait the query layer executes against, and an
//! in-memory implementation.
//!
//! ## Design Principles
//!
//! - Datastores see tables, aliases and columns, never entities
//! - Parameters are positional; the query layer binds names to positions
//! - Must be `Send + Sync` so one store can back several entity managers
//!
//! ## Example
//!
//! ```rust
//! use entiql_store::{Datastore, Expr, InMemoryDatastore, Select, TableRef, TableSpec};
//!
//! let store = InMemoryDatastore::new();
//! store.ensure_table(&TableSpec::new("member", "id", ["id", "username"])).unwrap();
//!
//! let mut select = Select::from(TableRef::new("member", "m"));
//! select.columns.push(Expr::column("m", "username"));
//! assert_eq!(store.execute_query(&select, &[]).unwrap().count(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod datastore;
mod error;
mod eval;
mod memory;
mod native;

pub use datastore::{Datastore, Row, RowStream};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryDatastore;
pub use native::{
    AggregateFunc, BinaryOp, ColumnRef, Expr, Join, JoinKind, Mutation, OrderBy, Select,
    TableRef, TableSpec, UnaryOp,
};
