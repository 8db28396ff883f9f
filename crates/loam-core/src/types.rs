//! Per-attribute value contracts.
//!
//! An [`AttributeType`] exists once per attribute per schema (not per entity
//! instance). It owns the validation rules, nullability, default-value SQL,
//! and — for foreign keys — the destination identity. Type options are fixed
//! at schema construction and immutable afterwards.
//!
//! Two representation boundaries are covered here:
//!
//! - **stored**: the shape handed to / received from the storage driver
//!   ([`AttributeType::to_stored`], [`AttributeType::from_stored`]);
//! - **JSON**: the shape used by entity serialization and batch updates
//!   ([`AttributeType::to_json`], [`AttributeType::from_json`]).
//!
//! Validation never rejects `Null`, even on non-nullable attributes:
//! non-nullability is enforced only at commit time, so coupling sequences may
//! assign a destination id later.

use std::cmp::Ordering;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;

use crate::error::{Error, Result};
use crate::identity::AttributeIdentity;
use crate::value::Value;

/// Canonical hyphenated UUID, case-insensitive.
fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("uuid pattern is valid")
    })
}

/// The native kind of an attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    /// Boolean flag.
    Boolean,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 text with an optional maximum length. `fixed` requires the
    /// length to match exactly (CHAR-style columns).
    Text {
        /// Maximum (or exact, when `fixed`) length in characters.
        max_length: Option<usize>,
        /// Whether the length must match exactly.
        fixed: bool,
    },
    /// Format-validated UUID carried as canonical hyphenated text.
    Uuid,
    /// Timezone-aware instant; stored as an RFC 3339 string.
    DateTime,
}

impl AttributeKind {
    /// Unbounded text.
    #[must_use]
    pub const fn text() -> Self {
        AttributeKind::Text {
            max_length: None,
            fixed: false,
        }
    }

    /// Variable-width text limited to `max_length` characters.
    #[must_use]
    pub const fn sized_text(max_length: usize) -> Self {
        AttributeKind::Text {
            max_length: Some(max_length),
            fixed: false,
        }
    }

    /// Fixed-width text of exactly `length` characters.
    #[must_use]
    pub const fn fixed_text(length: usize) -> Self {
        AttributeKind::Text {
            max_length: Some(length),
            fixed: true,
        }
    }

    /// Name used in error messages.
    #[must_use]
    pub const fn expected_name(&self) -> &'static str {
        match self {
            AttributeKind::Boolean => "boolean",
            AttributeKind::Integer => "integer",
            AttributeKind::Float => "float",
            AttributeKind::Text { .. } => "text",
            AttributeKind::Uuid => "uuid text",
            AttributeKind::DateTime => "timestamp",
        }
    }
}

/// The full contract for one attribute: kind plus schema-level options.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeType {
    kind: AttributeKind,
    nullable: bool,
    primary_key: bool,
    default_sql: Option<String>,
    references: Option<AttributeIdentity>,
    deferred: bool,
}

impl AttributeType {
    /// Create a type of the given kind. Non-nullable, non-key by default.
    #[must_use]
    pub const fn new(kind: AttributeKind) -> Self {
        Self {
            kind,
            nullable: false,
            primary_key: false,
            default_sql: None,
            references: None,
            deferred: false,
        }
    }

    /// Set nullability.
    #[must_use]
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Mark as the schema's primary key.
    #[must_use]
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set a SQL default-value expression. Attributes left unset at insert
    /// time rely on this (or the store's own default) and are read back.
    #[must_use]
    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default_sql = Some(expr.into());
        self
    }

    /// Make this a foreign key pointing at `destination`.
    #[must_use]
    pub fn references(mut self, destination: AttributeIdentity) -> Self {
        self.references = Some(destination);
        self
    }

    /// Set deferred constraint timing for a foreign key.
    #[must_use]
    pub const fn deferred(mut self, value: bool) -> Self {
        self.deferred = value;
        self
    }

    /// The native kind.
    #[must_use]
    pub const fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    /// Whether NULL is an acceptable committed value.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether this is the primary key.
    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// The SQL default expression, if any.
    #[must_use]
    pub fn default_expr(&self) -> Option<&str> {
        self.default_sql.as_deref()
    }

    /// The foreign-key destination, if this is a foreign key.
    #[must_use]
    pub const fn destination(&self) -> Option<&AttributeIdentity> {
        self.references.as_ref()
    }

    /// True when this attribute is a foreign key.
    #[must_use]
    pub const fn is_foreign_key(&self) -> bool {
        self.references.is_some()
    }

    /// Whether the foreign-key constraint is deferred.
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Whether this attribute has a default the engine can produce itself
    /// instead of reading it back from the store.
    #[must_use]
    pub const fn generates_default(&self) -> bool {
        matches!(self.kind, AttributeKind::Uuid) && self.primary_key
    }

    /// Produce the auto-generated default, if this type carries one.
    ///
    /// UUID primary keys generate a fresh v4 value; everything else returns
    /// `None` and relies on the store.
    #[must_use]
    pub fn generate_default(&self) -> Option<Value> {
        if self.generates_default() {
            Some(Value::Text(uuid::Uuid::new_v4().to_string()))
        } else {
            None
        }
    }

    /// Check a value without constructing an error.
    #[must_use]
    pub fn validate(&self, value: &Value) -> bool {
        self.check("", value).is_ok()
    }

    /// Check a value, failing with [`Error::AttributeType`] (wrong native
    /// representation) or [`Error::AttributeValue`] (right type, bad
    /// format/length). `Null` always passes.
    pub fn check(&self, attribute: &str, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        let type_error = || Error::AttributeType {
            attribute: attribute.to_string(),
            expected: self.kind.expected_name(),
            actual: value.type_name(),
        };
        match (&self.kind, value) {
            (AttributeKind::Boolean, Value::Bool(_))
            | (AttributeKind::Integer, Value::Int(_))
            | (AttributeKind::Float, Value::Float(_))
            | (AttributeKind::DateTime, Value::Timestamp(_)) => Ok(()),
            (AttributeKind::Text { max_length, fixed }, Value::Text(s)) => {
                let chars = s.chars().count();
                match max_length {
                    Some(limit) if *fixed && chars != *limit => Err(Error::attribute_value(
                        attribute,
                        format!("expected exactly {limit} characters, got {chars}"),
                    )),
                    Some(limit) if !*fixed && chars > *limit => Err(Error::attribute_value(
                        attribute,
                        format!("longer than {limit} characters"),
                    )),
                    _ => Ok(()),
                }
            }
            (AttributeKind::Uuid, Value::Text(s)) => {
                if uuid_regex().is_match(s) {
                    Ok(())
                } else {
                    Err(Error::attribute_value(attribute, "malformed uuid"))
                }
            }
            _ => Err(type_error()),
        }
    }

    /// Convert a validated value to its stored representation.
    ///
    /// Timestamps become RFC 3339 text; everything else passes through.
    #[must_use]
    pub fn to_stored(&self, value: &Value) -> Value {
        match (&self.kind, value) {
            (AttributeKind::DateTime, Value::Timestamp(ts)) => {
                Value::Text(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
            _ => value.clone(),
        }
    }

    /// Convert a stored representation back to the native value.
    ///
    /// Fails with [`Error::AttributeType`]/[`Error::AttributeValue`] on
    /// malformed input. Boolean attributes accept integer 0/1 from stores
    /// without a native boolean type.
    pub fn from_stored(&self, attribute: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (&self.kind, value) {
            (AttributeKind::Boolean, Value::Int(0)) => Ok(Value::Bool(false)),
            (AttributeKind::Boolean, Value::Int(1)) => Ok(Value::Bool(true)),
            (AttributeKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (AttributeKind::DateTime, Value::Text(s)) => DateTime::parse_from_rfc3339(&s)
                .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|e| Error::attribute_value(attribute, format!("unparsable timestamp: {e}"))),
            (_, value) => {
                self.check(attribute, &value)?;
                Ok(value)
            }
        }
    }

    /// Convert a validated value to JSON for serialization.
    #[must_use]
    pub fn to_json(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
        }
    }

    /// Convert serialized JSON input back to a native value.
    pub fn from_json(&self, attribute: &str, value: &serde_json::Value) -> Result<Value> {
        let native = match (&self.kind, value) {
            (_, serde_json::Value::Null) => Value::Null,
            (AttributeKind::Boolean, serde_json::Value::Bool(b)) => Value::Bool(*b),
            (AttributeKind::Integer, serde_json::Value::Number(n)) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => {
                    return Err(Error::attribute_value(attribute, "integer out of range"));
                }
            },
            (AttributeKind::Float, serde_json::Value::Number(n)) => match n.as_f64() {
                Some(f) => Value::Float(f),
                None => {
                    return Err(Error::attribute_value(attribute, "float out of range"));
                }
            },
            (AttributeKind::Text { .. } | AttributeKind::Uuid, serde_json::Value::String(s)) => {
                Value::Text(s.clone())
            }
            (AttributeKind::DateTime, serde_json::Value::String(s)) => {
                return DateTime::parse_from_rfc3339(s)
                    .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                    .map_err(|e| {
                        Error::attribute_value(attribute, format!("unparsable timestamp: {e}"))
                    });
            }
            (kind, other) => {
                return Err(Error::AttributeType {
                    attribute: attribute.to_string(),
                    expected: kind.expected_name(),
                    actual: json_type_name(other),
                });
            }
        };
        self.check(attribute, &native)?;
        Ok(native)
    }

    /// Compare two values of this type for in-memory ordering.
    ///
    /// `Null` sorts before everything; mismatched variants compare equal so
    /// a single bad value cannot poison a sort.
    #[must_use]
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (Value::Text(x), Value::Text(y)) => x.cmp(y),
            (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
            _ => Ordering::Equal,
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
