//! Schema-validated SQL statement builders.
//!
//! Every builder is constructed from an `Arc<Schema>` and validates as it is
//! chained: unknown attributes, mistyped values, and malformed clause
//! combinations fail immediately with [`loam_core::Error::Query`] or a
//! validation error, never at execution time. Finished statements come out of
//! `build()` as `(sql, params)` with `$1..$n` placeholders and stored-form
//! parameter values, ready for a `Connection`.
//!
//! Builders are consuming: each chainable method takes `self` and returns
//! `Result<Self>`, so a statement is assembled in one expression.

pub mod builder;
pub mod cond;

pub use builder::{Delete, Insert, Select, Update};
pub use cond::{Comparator, Cond, Conjunctive};
