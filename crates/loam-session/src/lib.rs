//! Identity-mapped unit-of-work sessions for loam.
//!
//! This crate is the engine room of the data mapper:
//!
//! - [`Entity`]: a shared handle over one logical row, with validated
//!   attribute access, first-change-wins dirty tracking, and relation views
//!   kept bidirectionally consistent in memory.
//! - [`Session`]: the unit of work. Owns the identity map (one entity per
//!   persisted row), schedules creations in dependency order, tears down
//!   relations on delete, and flushes everything inside a single storage
//!   transaction on [`Session::commit`].
//! - [`Query`]: the chainable query surface whose results are materialized
//!   through the session's identity map.
//!
//! Sessions are deliberately single-threaded: entities are `Rc`-shared
//! handles and one logical flow of control drives a session at a time.
//! Run one session per task; the store arbitrates between sessions.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(catalog, connection);
//! let trout = Entity::create(&fish_schema, vec![("name", Value::from("trout"))])?;
//! trout.set_one("type", Some(&freshwater))?;
//! session.add(&[trout.clone()])?;
//! session.commit(&cx).await.into_result()?;
//! ```

mod entity;
mod identity;
mod query;
mod session;

pub use entity::{Entity, RelationState, SerializeOptions};
pub use query::Query;
pub use session::{EntityHook, Session, SessionDebugInfo};
