//! Error taxonomy for the loam workspace.
//!
//! One enum covers every layer so errors can cross crate boundaries without
//! wrapping. The broad split:
//!
//! - **Recoverable validation**: [`Error::AttributeType`],
//!   [`Error::AttributeValue`], and the aggregate [`Error::Attributes`].
//!   Batch updates collect these instead of stopping at the first failure.
//! - **Programmer errors**: [`Error::Schema`], [`Error::ModelState`],
//!   [`Error::Query`]. These indicate misuse of the API and are never
//!   aggregated.
//! - **Commit-time integrity**: [`Error::RelationalAttribute`] for a
//!   non-nullable foreign key with neither a value nor a pending link.
//! - **Storage**: [`Error::Storage`] wraps the driver's native failure.

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the engine.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Structural/definition problem: missing primary key, unknown attribute
    /// reference, ambiguous relation discovery.
    #[error("schema error: {0}")]
    Schema(String),

    /// A value's native representation does not match the declared attribute
    /// type. Never the result of a format or length check.
    #[error("attribute '{attribute}' expects {expected}, got {actual}")]
    AttributeType {
        /// The attribute that rejected the value.
        attribute: String,
        /// Type name the attribute expects.
        expected: &'static str,
        /// Type name of the offered value.
        actual: &'static str,
    },

    /// Right native type, invalid content: length overflow, malformed UUID,
    /// unparsable timestamp.
    #[error("attribute '{attribute}' rejected value: {reason}")]
    AttributeValue {
        /// The attribute that rejected the value.
        attribute: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Aggregate of per-attribute failures from a batch update. Individual
    /// detail is preserved, never swallowed.
    #[error("{} attribute error(s): {}", .0.len(), format_aggregate(.0))]
    Attributes(Vec<Error>),

    /// A non-nullable foreign key has no value and no pending relationship
    /// link to satisfy it at commit time.
    #[error("foreign key '{attribute}' on '{collection}' is not nullable and has no value or pending link")]
    RelationalAttribute {
        /// The foreign-key attribute.
        attribute: String,
        /// The collection owning the attribute.
        collection: String,
    },

    /// Operation forbidden by the current lifecycle state: mutating an
    /// unresolved relation view, writing after delete, mixing sessions.
    #[error("model state error: {0}")]
    ModelState(String),

    /// Malformed query construction: re-specified order/limit, invalid
    /// payload shape, comparator misuse.
    #[error("query error: {0}")]
    Query(String),

    /// Wrapped native storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

fn format_aggregate(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Construct a [`Error::Schema`].
    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    /// Construct a [`Error::ModelState`].
    pub fn model_state(message: impl Into<String>) -> Self {
        Error::ModelState(message.into())
    }

    /// Construct a [`Error::Query`].
    pub fn query(message: impl Into<String>) -> Self {
        Error::Query(message.into())
    }

    /// Construct a [`Error::Storage`].
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }

    /// Construct a [`Error::AttributeValue`].
    pub fn attribute_value(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::AttributeValue {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// True for [`Error::AttributeType`].
    #[must_use]
    pub fn is_attribute_type(&self) -> bool {
        matches!(self, Error::AttributeType { .. })
    }

    /// True for [`Error::AttributeValue`].
    #[must_use]
    pub fn is_attribute_value(&self) -> bool {
        matches!(self, Error::AttributeValue { .. })
    }

    /// True for [`Error::ModelState`].
    #[must_use]
    pub fn is_model_state(&self) -> bool {
        matches!(self, Error::ModelState(_))
    }

    /// True for [`Error::Schema`].
    #[must_use]
    pub fn is_schema(&self) -> bool {
        matches!(self, Error::Schema(_))
    }

    /// True for [`Error::Query`].
    #[must_use]
    pub fn is_query(&self) -> bool {
        matches!(self, Error::Query(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_preserves_individual_detail() {
        let err = Error::Attributes(vec![
            Error::AttributeType {
                attribute: "id".to_string(),
                expected: "integer",
                actual: "text",
            },
            Error::attribute_value("name", "longer than 8 characters"),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("2 attribute error(s)"));
        assert!(rendered.contains("'id'"));
        assert!(rendered.contains("'name'"));
    }

    #[test]
    fn predicates_match_variants() {
        assert!(Error::schema("x").is_schema());
        assert!(Error::model_state("x").is_model_state());
        assert!(Error::query("x").is_query());
        assert!(Error::attribute_value("a", "bad").is_attribute_value());
        assert!(!Error::storage("x").is_schema());
    }
}
