//! The statement builders.

use std::fmt::Write as _;
use std::sync::Arc;

use loam_core::schema::Direction;
use loam_core::{AttributeKind, Error, Result, Schema, Value};

use crate::cond::{Comparator, Cond, Conjunctive};

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

fn quoted_list<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.map(quote).collect::<Vec<_>>().join(", ")
}

/// A condition whose attribute and value have already been checked against
/// the schema. `value: None` marks a null comparison rewritten to
/// `IS [NOT] NULL`.
#[derive(Debug, Clone)]
struct Checked {
    attribute: Arc<str>,
    comparator: Comparator,
    value: Option<Value>,
}

#[derive(Debug, Clone)]
struct Group {
    conjunctive: Conjunctive,
    conds: Vec<Checked>,
}

/// Validated filter groups shared by SELECT, UPDATE, and DELETE.
#[derive(Debug, Clone, Default)]
struct Filters {
    groups: Vec<Group>,
}

impl Filters {
    fn add(&mut self, schema: &Schema, conds: Vec<Cond>, conjunctive: Conjunctive) -> Result<()> {
        // An empty group constrains nothing.
        if conds.is_empty() {
            return Ok(());
        }
        let mut checked = Vec::with_capacity(conds.len());
        for cond in conds {
            let Some(def) = schema.attribute(&cond.attribute) else {
                return Err(Error::query(format!(
                    "unknown attribute '{}' on '{}'",
                    cond.attribute,
                    schema.collection()
                )));
            };
            if cond.value.is_null() {
                if !cond.comparator.accepts_null() {
                    return Err(Error::query(format!(
                        "'{}' cannot compare '{}' against null",
                        cond.comparator.sql(),
                        cond.attribute
                    )));
                }
                checked.push(Checked {
                    attribute: def.name.clone(),
                    comparator: cond.comparator,
                    value: None,
                });
                continue;
            }
            if cond.comparator == Comparator::Like {
                if !matches!(def.ty.kind(), AttributeKind::Text { .. }) {
                    return Err(Error::query(format!(
                        "LIKE requires a text attribute, '{}' is {}",
                        cond.attribute,
                        def.ty.kind().expected_name()
                    )));
                }
            } else {
                def.ty.check(&cond.attribute, &cond.value)?;
            }
            checked.push(Checked {
                attribute: def.name.clone(),
                comparator: cond.comparator,
                value: Some(cond.value),
            });
        }
        self.groups.push(Group {
            conjunctive,
            conds: checked,
        });
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Render the WHERE body, pushing stored-form parameters onto `params`.
    /// Placeholders continue from the current `params` length.
    fn render(&self, schema: &Schema, params: &mut Vec<Value>) -> String {
        let mut rendered_groups = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let mut parts = Vec::with_capacity(group.conds.len());
            for cond in &group.conds {
                let column = quote(&cond.attribute);
                match &cond.value {
                    None => {
                        let clause = match cond.comparator {
                            Comparator::Ne => format!("{column} IS NOT NULL"),
                            _ => format!("{column} IS NULL"),
                        };
                        parts.push(clause);
                    }
                    Some(value) => {
                        let ty = schema
                            .attribute(&cond.attribute)
                            .map(|def| &def.ty);
                        let stored = match ty {
                            Some(ty) => ty.to_stored(value),
                            None => value.clone(),
                        };
                        params.push(stored);
                        parts.push(format!(
                            "{column} {} ${}",
                            cond.comparator.sql(),
                            params.len()
                        ));
                    }
                }
            }
            let joined = parts.join(group.conjunctive.sql());
            if group.conds.len() > 1 {
                rendered_groups.push(format!("({joined})"));
            } else {
                rendered_groups.push(joined);
            }
        }
        rendered_groups.join(" AND ")
    }
}

// ===== SELECT =====

/// Chainable SELECT builder.
///
/// ```
/// use std::sync::Arc;
/// use loam_core::{AttributeKind, AttributeType, SchemaBuilder};
/// use loam_query::{Cond, Conjunctive, Select};
///
/// let schema = Arc::new(
///     SchemaBuilder::new("fish")
///         .attribute("id", AttributeType::new(AttributeKind::Uuid).primary_key(true))
///         .attribute("name", AttributeType::new(AttributeKind::text()))
///         .build()
///         .unwrap(),
/// );
/// let (sql, params) = Select::new(schema)
///     .filter(vec![Cond::eq("name", "trout")], Conjunctive::And)
///     .unwrap()
///     .build();
/// assert_eq!(sql, r#"SELECT "id", "name" FROM "fish" WHERE "name" = $1"#);
/// assert_eq!(params.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Select {
    schema: Arc<Schema>,
    filters: Filters,
    order: Option<Vec<(Arc<str>, Direction)>>,
    limit: Option<u64>,
    columns: Option<Vec<Arc<str>>>,
}

impl Select {
    /// Start a SELECT over the schema's collection.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            filters: Filters::default(),
            order: None,
            limit: None,
            columns: None,
        }
    }

    /// Add a filter group. Groups combine with AND; conditions within a
    /// group combine with the given conjunctive.
    pub fn filter(mut self, conds: Vec<Cond>, conjunctive: Conjunctive) -> Result<Self> {
        self.filters.add(&self.schema, conds, conjunctive)?;
        Ok(self)
    }

    /// Set the ordering. May only be specified once.
    pub fn order_by(mut self, keys: Vec<(String, Direction)>) -> Result<Self> {
        if self.order.is_some() {
            return Err(Error::query("order already specified"));
        }
        let mut resolved = Vec::with_capacity(keys.len());
        for (key, direction) in keys {
            let Some(def) = self.schema.attribute(&key) else {
                return Err(Error::query(format!(
                    "unknown attribute '{key}' on '{}'",
                    self.schema.collection()
                )));
            };
            resolved.push((def.name.clone(), direction));
        }
        self.order = Some(resolved);
        Ok(self)
    }

    /// Cap the result size. May only be specified once.
    pub fn limit(mut self, n: u64) -> Result<Self> {
        if self.limit.is_some() {
            return Err(Error::query("limit already specified"));
        }
        self.limit = Some(n);
        Ok(self)
    }

    /// Restrict the projection to the named attributes. May only be
    /// specified once; the default projects every attribute.
    pub fn columns(mut self, names: &[&str]) -> Result<Self> {
        if self.columns.is_some() {
            return Err(Error::query("columns already specified"));
        }
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let Some(def) = self.schema.attribute(name) else {
                return Err(Error::query(format!(
                    "unknown attribute '{name}' on '{}'",
                    self.schema.collection()
                )));
            };
            resolved.push(def.name.clone());
        }
        self.columns = Some(resolved);
        Ok(self)
    }

    /// Names of the projected columns, in emission order.
    #[must_use]
    pub fn projection(&self) -> Vec<Arc<str>> {
        match &self.columns {
            Some(cols) => cols.clone(),
            None => self
                .schema
                .attributes()
                .iter()
                .map(|a| a.name.clone())
                .collect(),
        }
    }

    /// Finish into `(sql, params)`.
    #[must_use]
    pub fn build(self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let projection = self.projection();
        let mut sql = format!(
            "SELECT {} FROM {}",
            quoted_list(projection.iter().map(|c| &**c)),
            quote(self.schema.collection())
        );
        if !self.filters.is_empty() {
            let body = self.filters.render(&self.schema, &mut params);
            let _ = write!(sql, " WHERE {body}");
        }
        if let Some(order) = &self.order {
            let keys = order
                .iter()
                .map(|(name, direction)| {
                    let dir = match direction {
                        Direction::Ascending => "ASC",
                        Direction::Descending => "DESC",
                    };
                    format!("{} {dir}", quote(name))
                })
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(sql, " ORDER BY {keys}");
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        tracing::debug!(%sql, params = params.len(), "built select");
        (sql, params)
    }
}

// ===== INSERT =====

/// Chainable INSERT builder.
#[derive(Debug, Clone)]
pub struct Insert {
    schema: Arc<Schema>,
    assignments: Vec<(Arc<str>, Value)>,
    returning: Vec<Arc<str>>,
}

impl Insert {
    /// Start an INSERT into the schema's collection.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            assignments: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// Add column values. Each value is validated against its attribute.
    pub fn values(mut self, pairs: Vec<(&str, Value)>) -> Result<Self> {
        for (name, value) in pairs {
            let Some(def) = self.schema.attribute(name) else {
                return Err(Error::query(format!(
                    "unknown attribute '{name}' on '{}'",
                    self.schema.collection()
                )));
            };
            def.ty.check(name, &value)?;
            self.assignments.push((def.name.clone(), value));
        }
        Ok(self)
    }

    /// Request columns back from the store, typically defaults the engine
    /// did not supply.
    pub fn returning(mut self, names: &[&str]) -> Result<Self> {
        for name in names {
            let Some(def) = self.schema.attribute(name) else {
                return Err(Error::query(format!(
                    "unknown attribute '{name}' on '{}'",
                    self.schema.collection()
                )));
            };
            self.returning.push(def.name.clone());
        }
        Ok(self)
    }

    /// Finish into `(sql, params)`. With no explicit values the statement
    /// inserts store defaults for every column.
    #[must_use]
    pub fn build(self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("INSERT INTO {}", quote(self.schema.collection()));
        if self.assignments.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let mut placeholders = Vec::with_capacity(self.assignments.len());
            for (name, value) in &self.assignments {
                let stored = self
                    .schema
                    .attribute(name)
                    .map_or_else(|| value.clone(), |def| def.ty.to_stored(value));
                params.push(stored);
                placeholders.push(format!("${}", params.len()));
            }
            let _ = write!(
                sql,
                " ({}) VALUES ({})",
                quoted_list(self.assignments.iter().map(|(name, _)| &**name)),
                placeholders.join(", ")
            );
        }
        if !self.returning.is_empty() {
            let _ = write!(
                sql,
                " RETURNING {}",
                quoted_list(self.returning.iter().map(|c| &**c))
            );
        }
        tracing::debug!(%sql, params = params.len(), "built insert");
        (sql, params)
    }
}

// ===== UPDATE =====

/// Chainable UPDATE builder.
#[derive(Debug, Clone)]
pub struct Update {
    schema: Arc<Schema>,
    assignments: Vec<(Arc<str>, Value)>,
    filters: Filters,
}

impl Update {
    /// Start an UPDATE of the schema's collection.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            assignments: Vec::new(),
            filters: Filters::default(),
        }
    }

    /// Add SET assignments. Each value is validated against its attribute.
    pub fn set(mut self, pairs: Vec<(&str, Value)>) -> Result<Self> {
        for (name, value) in pairs {
            let Some(def) = self.schema.attribute(name) else {
                return Err(Error::query(format!(
                    "unknown attribute '{name}' on '{}'",
                    self.schema.collection()
                )));
            };
            def.ty.check(name, &value)?;
            self.assignments.push((def.name.clone(), value));
        }
        Ok(self)
    }

    /// Add a filter group; semantics match [`Select::filter`].
    pub fn filter(mut self, conds: Vec<Cond>, conjunctive: Conjunctive) -> Result<Self> {
        self.filters.add(&self.schema, conds, conjunctive)?;
        Ok(self)
    }

    /// Finish into `(sql, params)`. SET parameters precede WHERE parameters.
    /// Fails when no assignments were added.
    pub fn build(self) -> Result<(String, Vec<Value>)> {
        if self.assignments.is_empty() {
            return Err(Error::query("update without assignments"));
        }
        let mut params = Vec::new();
        let mut sets = Vec::with_capacity(self.assignments.len());
        for (name, value) in &self.assignments {
            let stored = self
                .schema
                .attribute(name)
                .map_or_else(|| value.clone(), |def| def.ty.to_stored(value));
            params.push(stored);
            sets.push(format!("{} = ${}", quote(name), params.len()));
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            quote(self.schema.collection()),
            sets.join(", ")
        );
        if !self.filters.is_empty() {
            let body = self.filters.render(&self.schema, &mut params);
            let _ = write!(sql, " WHERE {body}");
        }
        tracing::debug!(%sql, params = params.len(), "built update");
        Ok((sql, params))
    }
}

// ===== DELETE =====

/// Chainable DELETE builder.
#[derive(Debug, Clone)]
pub struct Delete {
    schema: Arc<Schema>,
    filters: Filters,
    returning: Vec<Arc<str>>,
}

impl Delete {
    /// Start a DELETE from the schema's collection.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            filters: Filters::default(),
            returning: Vec::new(),
        }
    }

    /// Add a filter group; semantics match [`Select::filter`].
    pub fn filter(mut self, conds: Vec<Cond>, conjunctive: Conjunctive) -> Result<Self> {
        self.filters.add(&self.schema, conds, conjunctive)?;
        Ok(self)
    }

    /// Request columns of the deleted rows back from the store.
    pub fn returning(mut self, names: &[&str]) -> Result<Self> {
        for name in names {
            let Some(def) = self.schema.attribute(name) else {
                return Err(Error::query(format!(
                    "unknown attribute '{name}' on '{}'",
                    self.schema.collection()
                )));
            };
            self.returning.push(def.name.clone());
        }
        Ok(self)
    }

    /// Finish into `(sql, params)`.
    #[must_use]
    pub fn build(self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", quote(self.schema.collection()));
        if !self.filters.is_empty() {
            let body = self.filters.render(&self.schema, &mut params);
            let _ = write!(sql, " WHERE {body}");
        }
        if !self.returning.is_empty() {
            let _ = write!(
                sql,
                " RETURNING {}",
                quoted_list(self.returning.iter().map(|c| &**c))
            );
        }
        tracing::debug!(%sql, params = params.len(), "built delete");
        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use loam_core::{AttributeType, SchemaBuilder};

    fn fish() -> Arc<Schema> {
        Arc::new(
            SchemaBuilder::new("fish")
                .attribute("id", AttributeType::new(AttributeKind::Uuid).primary_key(true))
                .attribute("name", AttributeType::new(AttributeKind::sized_text(32)))
                .attribute("length", AttributeType::new(AttributeKind::Float).nullable(true))
                .attribute(
                    "caught_at",
                    AttributeType::new(AttributeKind::DateTime).nullable(true),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn select_projects_all_attributes_by_default() {
        let (sql, params) = Select::new(fish()).build();
        assert_eq!(
            sql,
            r#"SELECT "id", "name", "length", "caught_at" FROM "fish""#
        );
        assert!(params.is_empty());
    }

    #[test]
    fn select_with_filter_order_and_limit() {
        let (sql, params) = Select::new(fish())
            .filter(
                vec![Cond::ne("name", "fish"), Cond::gt("length", 2.0)],
                Conjunctive::And,
            )
            .unwrap()
            .order_by(vec![("name".to_string(), Direction::Ascending)])
            .unwrap()
            .limit(5)
            .unwrap()
            .build();
        assert_eq!(
            sql,
            r#"SELECT "id", "name", "length", "caught_at" FROM "fish" WHERE ("name" != $1 AND "length" > $2) ORDER BY "name" ASC LIMIT 5"#
        );
        assert_eq!(params, vec![Value::from("fish"), Value::from(2.0)]);
    }

    #[test]
    fn or_groups_and_and_groups_combine() {
        let (sql, _) = Select::new(fish())
            .filter(
                vec![Cond::eq("name", "trout"), Cond::eq("name", "carp")],
                Conjunctive::Or,
            )
            .unwrap()
            .filter(vec![Cond::ge("length", 1.5)], Conjunctive::And)
            .unwrap()
            .build();
        assert_eq!(
            sql,
            r#"SELECT "id", "name", "length", "caught_at" FROM "fish" WHERE ("name" = $1 OR "name" = $2) AND "length" >= $3"#
        );
    }

    #[test]
    fn null_comparisons_rewrite_to_is_null() {
        let (sql, params) = Select::new(fish())
            .filter(vec![Cond::eq("length", Value::Null)], Conjunctive::And)
            .unwrap()
            .filter(vec![Cond::ne("caught_at", Value::Null)], Conjunctive::And)
            .unwrap()
            .build();
        assert!(sql.ends_with(r#"WHERE "length" IS NULL AND "caught_at" IS NOT NULL"#));
        assert!(params.is_empty());

        let err = Select::new(fish())
            .filter(vec![Cond::gt("length", Value::Null)], Conjunctive::And)
            .unwrap_err();
        assert!(err.is_query());
    }

    #[test]
    fn unknown_attribute_and_mistyped_value_fail() {
        let err = Select::new(fish())
            .filter(vec![Cond::eq("fins", 4)], Conjunctive::And)
            .unwrap_err();
        assert!(err.is_query());

        let err = Select::new(fish())
            .filter(vec![Cond::eq("length", "long")], Conjunctive::And)
            .unwrap_err();
        assert!(err.is_attribute_type());
    }

    #[test]
    fn like_requires_text() {
        assert!(
            Select::new(fish())
                .filter(vec![Cond::like("name", "tr%")], Conjunctive::And)
                .is_ok()
        );
        let err = Select::new(fish())
            .filter(
                vec![Cond::new("length", Comparator::Like, "2%")],
                Conjunctive::And,
            )
            .unwrap_err();
        assert!(err.is_query());
    }

    #[test]
    fn order_and_limit_are_single_use() {
        let base = Select::new(fish())
            .order_by(vec![("name".to_string(), Direction::Descending)])
            .unwrap();
        assert!(
            base.order_by(vec![("id".to_string(), Direction::Ascending)])
                .unwrap_err()
                .is_query()
        );
        let base = Select::new(fish()).limit(1).unwrap();
        assert!(base.limit(2).unwrap_err().is_query());
    }

    #[test]
    fn explicit_columns_restrict_projection() {
        let (sql, _) = Select::new(fish()).columns(&["name"]).unwrap().build();
        assert_eq!(sql, r#"SELECT "name" FROM "fish""#);
        assert!(Select::new(fish()).columns(&["gills"]).is_err());
    }

    #[test]
    fn timestamps_are_stored_as_rfc3339_text() {
        let at = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
        let (_, params) = Select::new(fish())
            .filter(vec![Cond::eq("caught_at", at)], Conjunctive::And)
            .unwrap()
            .build();
        assert_eq!(
            params,
            vec![Value::Text("2024-05-17T09:30:00.000000Z".to_string())]
        );
    }

    #[test]
    fn insert_emits_placeholders_and_returning() {
        let (sql, params) = Insert::new(fish())
            .values(vec![("name", Value::from("trout"))])
            .unwrap()
            .returning(&["id", "caught_at"])
            .unwrap()
            .build();
        assert_eq!(
            sql,
            r#"INSERT INTO "fish" ("name") VALUES ($1) RETURNING "id", "caught_at""#
        );
        assert_eq!(params, vec![Value::from("trout")]);
    }

    #[test]
    fn insert_with_no_values_uses_store_defaults() {
        let (sql, params) = Insert::new(fish()).returning(&["id"]).unwrap().build();
        assert_eq!(sql, r#"INSERT INTO "fish" DEFAULT VALUES RETURNING "id""#);
        assert!(params.is_empty());
    }

    #[test]
    fn update_numbers_set_before_where() {
        let (sql, params) = Update::new(fish())
            .set(vec![("name", Value::from("carp"))])
            .unwrap()
            .filter(
                vec![Cond::eq("id", "550e8400-e29b-41d4-a716-446655440000")],
                Conjunctive::And,
            )
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(sql, r#"UPDATE "fish" SET "name" = $1 WHERE "id" = $2"#);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], Value::from("carp"));
    }

    #[test]
    fn update_without_assignments_fails() {
        let err = Update::new(fish()).build().unwrap_err();
        assert!(err.is_query());
    }

    #[test]
    fn delete_with_filter_and_returning() {
        let (sql, params) = Delete::new(fish())
            .filter(vec![Cond::eq("name", "fish")], Conjunctive::And)
            .unwrap()
            .returning(&["id"])
            .unwrap()
            .build();
        assert_eq!(
            sql,
            r#"DELETE FROM "fish" WHERE "name" = $1 RETURNING "id""#
        );
        assert_eq!(params, vec![Value::from("fish")]);
    }

    #[test]
    fn oversized_text_value_is_rejected_at_set_time() {
        let err = Update::new(fish())
            .set(vec![("name", Value::from("x".repeat(40)))])
            .unwrap_err();
        assert!(err.is_attribute_value());
    }
}
