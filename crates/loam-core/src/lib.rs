//! Core types and traits for loam.
//!
//! `loam-core` is the **foundation layer** for the workspace. It defines the
//! value model, the per-attribute type contracts, the schema/catalog
//! structures, and the storage-facing traits that all other crates build on.
//!
//! # Role In The Architecture
//!
//! - **Contract layer**: [`Connection`] is the trait implemented by storage
//!   drivers; the engine never speaks to a database any other way.
//! - **Data model**: [`Value`] and [`Row`] represent statement parameters and
//!   query results; [`AttributeType`] owns validation and the stored/JSON
//!   representations of a single attribute.
//! - **Schema**: [`Schema`] describes one collection; [`Catalog`] is the
//!   explicit handle binding a set of schemas together and deriving the
//!   relation descriptors between them.
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from
//!   asupersync so every storage operation is cancel-correct.
//!
//! # Who Uses This Crate
//!
//! - `loam-query` consumes schema metadata and [`Value`] to build SQL.
//! - `loam-session` depends on [`Connection`], [`Row`], and the schema types
//!   for identity-mapped unit-of-work flows.
//!
//! Most applications should use the `loam` facade; reach for `loam-core`
//! directly when writing drivers or advanced integrations.

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod catalog;
pub mod connection;
pub mod error;
pub mod identity;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;

pub use catalog::{Catalog, CatalogBuilder};
pub use connection::Connection;
pub use error::{Error, Result};
pub use identity::AttributeIdentity;
pub use row::Row;
pub use schema::{
    AttributeDef, BeforeSetHook, Direction, RelationDef, RelationOptions, RelationSide, Schema,
    SchemaBuilder,
};
pub use types::{AttributeKind, AttributeType};
pub use value::Value;
