//! # EntiQL Value
//!
//! Dynamic values shared by every EntiQL crate.
//!
//! This crate provides:
//! - [`Value`], the column/parameter value that crosses the datastore boundary
//! - [`ValueType`], the declared type of a column or parameter slot
//! - [`FromValue`] and [`FromRow`] for typed extraction of query results
//!
//! ## Usage
//!
//! ```
//! use entiql_value::{FromValue, Value};
//!
//! let value = Value::from("member1");
//! let name = String::from_value(value).unwrap();
//! assert_eq!(name, "member1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod convert;
mod error;
mod value;

pub use convert::{FromRow, FromValue};
pub use error::{ValueError, ValueResult};
pub use value::{Value, ValueType};
