//! # EntiQL Core
//!
//! Object query language and persistence context for EntiQL.
//!
//! This crate provides:
//! - [`EntityRegistry`] for entity, enumeration and output-shape metadata
//! - A query translator from object queries to [`ExecutionPlan`]s
//! - [`EntityManager`], which runs plans against a [`Datastore`] and keeps
//!   every loaded object in an identity-mapped [`PersistenceContext`]
//! - Result projection into entities, scalars, tuples and constructed rows
//! - Bulk update and delete that flag cached objects as possibly stale
//!
//! ## Example
//!
//! ```rust
//! use entiql_core::{EntityDescriptor, EntityManager, EntityRegistry, FieldDescriptor, FieldType};
//! use entiql_store::InMemoryDatastore;
//! use std::sync::Arc;
//!
//! let registry = EntityRegistry::builder()
//!     .entity(
//!         EntityDescriptor::new("Member", "member", "id")
//!             .field(FieldDescriptor::new("id", FieldType::Integer))
//!             .field(FieldDescriptor::new("username", FieldType::Text)),
//!     )
//!     .build()
//!     .unwrap();
//! let store = Arc::new(InMemoryDatastore::new());
//! registry.create_tables(store.as_ref()).unwrap();
//!
//! let mut em = EntityManager::new(Arc::new(registry), store);
//! em.transaction(|em| {
//!     let member = em.new_entity("Member")?;
//!     member.set("username", "member1")?;
//!     em.persist(&member)
//! })
//! .unwrap();
//!
//! let names: Vec<String> = em
//!     .create_query("select m.username from Member m")
//!     .unwrap()
//!     .scalars()
//!     .unwrap();
//! assert_eq!(names, ["member1"]);
//! ```
//!
//! [`Datastore`]: entiql_store::Datastore

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk;
mod config;
mod context;
mod error;
mod executor;
mod manager;
mod projector;
mod query;
mod registry;

pub use config::{Config, FlushMode};
pub use context::{
    EntityRef, FlushSummary, Identity, LazyCollection, LazyRef, ObjectState, PersistenceContext,
};
pub use error::{CoreError, CoreResult, ParseError, ParseResult};
pub use executor::Page;
pub use manager::{EntityManager, Query, ResultStream};
pub use projector::{ConstructedRow, Projected};
pub use query::{
    translate, ExecutionPlan, FetchSpec, JoinClause, ParameterSpec, ParameterType, PlanKind,
    Projection, ProjectionItem, SourceBinding,
};
pub use registry::{
    Cardinality, EntityDescriptor, EntityRegistry, EnumDescriptor, FieldDescriptor, FieldType,
    NamedQuery, OutputShape, RegistryBuilder, RegistryDeclaration, RelationDescriptor, ShapeParam,
};
