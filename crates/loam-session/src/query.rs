//! The chainable, session-bound query surface.
//!
//! A [`Query`] wraps a `SELECT` builder and routes its results through the
//! owning session's identity map, so every returned entity obeys the
//! one-instance-per-row guarantee. Builder methods consume and return the
//! query; terminal methods execute it.

use asupersync::{Cx, Outcome};
use loam_core::{Connection, Direction, Error, Row, Schema};
use loam_query::{Cond, Conjunctive, Delete, Select};
use std::sync::Arc;

use crate::entity::Entity;
use crate::session::Session;

/// A chainable query over one collection, bound to its session.
pub struct Query<'s, C: Connection> {
    session: &'s Session<C>,
    schema: Arc<Schema>,
    select: Select,
    /// Filters are replayed onto a `DELETE` when [`Query::delete`] is the
    /// terminal; order and limit do not apply there.
    filters: Vec<(Vec<Cond>, Conjunctive)>,
    projected: bool,
    limited: bool,
}

impl<'s, C: Connection> Query<'s, C> {
    pub(crate) fn new(session: &'s Session<C>, schema: Arc<Schema>) -> Self {
        Self {
            session,
            select: Select::new(schema.clone()),
            schema,
            filters: Vec::new(),
            projected: false,
            limited: false,
        }
    }

    /// Add a filter group. Conditions inside the group are joined by
    /// `conjunctive`; groups are joined by `AND`.
    pub fn filter(mut self, conds: Vec<Cond>, conjunctive: Conjunctive) -> Result<Self, Error> {
        self.select = self.select.filter(conds.clone(), conjunctive)?;
        self.filters.push((conds, conjunctive));
        Ok(self)
    }

    /// Order the results. May only be specified once.
    pub fn order_by(mut self, keys: Vec<(String, Direction)>) -> Result<Self, Error> {
        self.select = self.select.order_by(keys)?;
        Ok(self)
    }

    /// Cap the number of results. May only be specified once.
    pub fn limit(mut self, n: u64) -> Result<Self, Error> {
        self.select = self.select.limit(n)?;
        self.limited = true;
        Ok(self)
    }

    /// Project a subset of attributes. Projected queries return raw rows
    /// through [`Query::rows`]; they cannot be materialized as entities.
    pub fn columns(mut self, names: &[&str]) -> Result<Self, Error> {
        self.select = self.select.columns(names)?;
        self.projected = true;
        Ok(self)
    }

    async fn fetch(self, cx: &Cx) -> Outcome<Vec<Row>, Error> {
        let conn = match self.session.connection_ref() {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        let (sql, params) = self.select.build();
        conn.query(cx, &sql, &params).await
    }

    /// Execute and return every match as an identity-mapped entity.
    pub async fn all(self, cx: &Cx) -> Outcome<Vec<Entity>, Error> {
        if self.projected {
            return Outcome::Err(Error::query(
                "projected queries return rows, not entities; use rows()",
            ));
        }
        let session = self.session;
        let schema = self.schema.clone();
        let rows = match self.fetch(cx).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            match session.resolve_entity(&schema, row) {
                Ok(entity) => entities.push(entity),
                Err(e) => return Outcome::Err(e),
            }
        }
        Outcome::Ok(entities)
    }

    /// Execute and return raw rows, bypassing entity materialization.
    pub async fn rows(self, cx: &Cx) -> Outcome<Vec<Row>, Error> {
        self.fetch(cx).await
    }

    /// Execute with a limit of one and return the first match, if any.
    pub async fn first(mut self, cx: &Cx) -> Outcome<Option<Entity>, Error> {
        if !self.limited {
            self = match self.limit(1) {
                Ok(query) => query,
                Err(e) => return Outcome::Err(e),
            };
        }
        match self.all(cx).await {
            Outcome::Ok(mut entities) => {
                if entities.is_empty() {
                    Outcome::Ok(None)
                } else {
                    Outcome::Ok(Some(entities.swap_remove(0)))
                }
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Execute with a limit of `n`.
    pub async fn take(mut self, cx: &Cx, n: u64) -> Outcome<Vec<Entity>, Error> {
        if !self.limited {
            self = match self.limit(n) {
                Ok(query) => query,
                Err(e) => return Outcome::Err(e),
            };
        }
        self.all(cx).await
    }

    /// Delete every match directly at the store, in one statement.
    ///
    /// Matches that happen to be identity-mapped are unbound, write-locked,
    /// and evicted so the session does not keep phantoms of deleted rows;
    /// their resolved relation views are torn down the same way a scheduled
    /// delete would. Order and limit do not apply. Returns the number of
    /// deleted rows.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn delete(self, cx: &Cx) -> Outcome<u64, Error> {
        let pk = self.schema.primary_key().clone();
        let mut statement = Delete::new(self.schema.clone());
        for (conds, conjunctive) in self.filters {
            statement = match statement.filter(conds, conjunctive) {
                Ok(statement) => statement,
                Err(e) => return Outcome::Err(e),
            };
        }
        statement = match statement.returning(&[&*pk.name]) {
            Ok(statement) => statement,
            Err(e) => return Outcome::Err(e),
        };
        let (sql, params) = statement.build();
        let conn = match self.session.connection_ref() {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        let rows = match conn.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let mut evicted = 0u64;
        for row in &rows {
            evicted += 1;
            let Some(raw) = row.get_named(&pk.name) else {
                continue;
            };
            let key = match pk.ty.from_stored(&pk.name, raw.clone()) {
                Ok(key) => key,
                Err(e) => return Outcome::Err(e),
            };
            if let Some(entity) = self
                .session
                .identity_lookup(&self.schema.collection(), &key)
            {
                self.session.teardown_relations(&entity);
                entity.mark_unbound();
                entity.clear_relation_views();
                entity.set_write_locked(true);
                self.session
                    .identity_remove(&self.schema.collection(), &key);
            }
        }
        tracing::debug!(collection = %self.schema.collection(), deleted = evicted, "bulk delete");
        Outcome::Ok(evicted)
    }
}
