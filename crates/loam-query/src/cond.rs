//! Filter conditions: comparators, conjunctives, and the `Cond` triple.

use loam_core::Value;

/// How the conditions of one filter group combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunctive {
    /// Every condition must hold.
    And,
    /// At least one condition must hold.
    Or,
}

impl Conjunctive {
    /// SQL keyword, with surrounding spaces for joining.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Conjunctive::And => " AND ",
            Conjunctive::Or => " OR ",
        }
    }
}

/// Comparison operator applied between an attribute and a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// Equal. Rewritten to `IS NULL` when the value is null.
    Eq,
    /// Not equal. Rewritten to `IS NOT NULL` when the value is null.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// SQL LIKE pattern match; text attributes only.
    Like,
}

impl Comparator {
    /// The SQL operator token.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Like => "LIKE",
        }
    }

    /// Whether a null comparison value is meaningful for this operator.
    #[must_use]
    pub const fn accepts_null(self) -> bool {
        matches!(self, Comparator::Eq | Comparator::Ne)
    }
}

/// One attribute/comparator/value condition.
#[derive(Debug, Clone)]
pub struct Cond {
    /// Attribute being compared.
    pub attribute: String,
    /// The operator.
    pub comparator: Comparator,
    /// Comparison value, in native form.
    pub value: Value,
}

impl Cond {
    /// Build a condition with an explicit comparator.
    pub fn new(attribute: impl Into<String>, comparator: Comparator, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            comparator,
            value: value.into(),
        }
    }

    /// `attribute = value` (or `IS NULL`).
    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Comparator::Eq, value)
    }

    /// `attribute != value` (or `IS NOT NULL`).
    pub fn ne(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Comparator::Ne, value)
    }

    /// `attribute < value`.
    pub fn lt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Comparator::Lt, value)
    }

    /// `attribute <= value`.
    pub fn le(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Comparator::Le, value)
    }

    /// `attribute > value`.
    pub fn gt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Comparator::Gt, value)
    }

    /// `attribute >= value`.
    pub fn ge(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Comparator::Ge, value)
    }

    /// `attribute LIKE pattern`.
    pub fn like(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(attribute, Comparator::Like, Value::Text(pattern.into()))
    }
}
