//! # EntiQL Testkit
//!
//! Test utilities for EntiQL.
//!
//! This crate provides:
//! - The Member/Team fixture schema and seed data
//! - Entity managers over fresh in-memory datastores
//! - Recording and failing datastore wrappers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use entiql_testkit::prelude::*;
//!
//! with_context(|ctx| {
//!     seed_teams(ctx).unwrap();
//!     let members = ctx
//!         .create_query("select m from Member m")
//!         .unwrap()
//!         .entities()
//!         .unwrap();
//!     assert_eq!(members.len(), 3);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stores;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::scenarios::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stores::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stores::*;
