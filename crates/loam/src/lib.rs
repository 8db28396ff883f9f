//! Loam: an identity-mapped unit-of-work data mapper.
//!
//! This crate is the facade over the workspace; it re-exports everything an
//! application needs and adds nothing of its own.
//!
//! # The model
//!
//! - Declare [`Schema`]s and bind them into a [`Catalog`]; foreign-key
//!   attributes implicitly derive a pair of relation views (the one side
//!   on the referencing collection, the many side on the referenced one).
//! - Open a [`Session`] over a [`Connection`]. The session keeps exactly one
//!   [`Entity`] per persisted row and tracks which attributes changed.
//! - Link entities through their relation views; links between
//!   not-yet-persisted entities become intents that the commit pipeline
//!   fulfills once the referenced primary key exists.
//! - [`Session::commit`] flushes creations in dependency order, then
//!   deletions and updates, inside one storage transaction.
//!
//! # Quick start
//!
//! ```ignore
//! use loam::prelude::*;
//!
//! let types = SchemaBuilder::new("types")
//!     .attribute("id", AttributeType::new(AttributeKind::Uuid).primary_key(true))
//!     .attribute("name", AttributeType::new(AttributeKind::text()))
//!     .build()?;
//! let fish = SchemaBuilder::new("fish")
//!     .attribute("id", AttributeType::new(AttributeKind::Uuid).primary_key(true))
//!     .attribute("name", AttributeType::new(AttributeKind::text()))
//!     .attribute("type_id", AttributeType::new(AttributeKind::Uuid)
//!         .nullable(true)
//!         .references(AttributeIdentity::new("types", "id")))
//!     .build()?;
//! let catalog = Catalog::builder().schema(types).schema(fish).build()?;
//!
//! let session = Session::new(catalog, connection);
//! let trout = session.query("fish")?
//!     .filter(vec![Cond::eq("name", "trout")], Conjunctive::And)
//!     .first(&cx)
//!     .await;
//! ```

pub use loam_core::{
    AttributeDef, AttributeIdentity, AttributeKind, AttributeType, BeforeSetHook, Catalog,
    CatalogBuilder, Connection, Cx, Direction, Error, Outcome, RelationDef, RelationOptions,
    RelationSide, Result, Row, Schema, SchemaBuilder, Value,
};
pub use loam_query::{Comparator, Cond, Conjunctive, Delete, Insert, Select, Update};
pub use loam_session::{
    Entity, EntityHook, Query, RelationState, SerializeOptions, Session, SessionDebugInfo,
};

/// Everything most applications need, in one import.
pub mod prelude {
    pub use crate::{
        AttributeIdentity, AttributeKind, AttributeType, Catalog, Cond, Conjunctive, Connection,
        Cx, Direction, Entity, Error, Outcome, RelationOptions, Result, Row, Schema,
        SchemaBuilder, SerializeOptions, Session, Value,
    };
}
