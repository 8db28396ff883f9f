//! Result rows returned by storage drivers.

use crate::value::Value;

/// One row of a query result: parallel column names and values.
///
/// Drivers produce rows in whatever column order the statement requested;
/// lookups by name scan the (small) column list.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from parallel column and value vectors.
    #[must_use]
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(name, value)` pairs.
    #[must_use]
    pub fn from_pairs(pairs: Vec<(&str, Value)>) -> Self {
        let (columns, values) = pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .unzip();
        Self { columns, values }
    }

    /// Value at positional index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the named column, if present.
    #[must_use]
    pub fn get_named(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in positional order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Consume the row into its `(columns, values)` parts.
    #[must_use]
    pub fn into_parts(self) -> (Vec<String>, Vec<Value>) {
        (self.columns, self.values)
    }
}
