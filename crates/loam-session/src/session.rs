//! The unit-of-work session.
//!
//! A [`Session`] owns the identity map, the creation and deletion queues, and
//! the dependency-ordered transactional commit pipeline. One logical flow of
//! control per session: operations suspend while talking to storage but must
//! not be invoked concurrently on the same session. Multiple sessions may run
//! against the same store; isolation between them is the store's business.
//!
//! The session lazily acquires its connection from a connector closure on
//! first use and holds it until [`Session::close`]. `commit` is the only
//! operation that opens a store-level transaction.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use asupersync::{Cx, Outcome};
use loam_core::schema::RelationSide;
use loam_core::{Catalog, Connection, Error, Result, Row, Schema, Value};
use loam_query::{Cond, Conjunctive, Delete, Insert, Select, Update};

use crate::entity::{Entity, RelationState, SerializeOptions, WriteMode};
use crate::identity::{IdentityMap, SessionTag};
use crate::query::Query;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Observer fired when the session constructs or refreshes an entity.
pub type EntityHook = Box<dyn Fn(&Entity)>;

/// Point-in-time introspection of a session's internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDebugInfo {
    /// Entities currently in the identity map.
    pub identity_mapped: usize,
    /// Entities scheduled for creation.
    pub pending_creations: usize,
    /// Entities scheduled for deletion.
    pub pending_deletions: usize,
    /// Whether a connection has been acquired.
    pub connected: bool,
    /// Whether the session has been closed.
    pub closed: bool,
}

/// The identity-mapped unit of work.
pub struct Session<C: Connection> {
    id: u64,
    catalog: Catalog,
    connection: OnceCell<C>,
    connector: RefCell<Option<Box<dyn FnOnce() -> C>>>,
    identity: Rc<RefCell<IdentityMap>>,
    /// Dependency-ordered by `add`.
    pending_create: RefCell<Vec<Entity>>,
    pending_delete: RefCell<Vec<Entity>>,
    /// Entities whose foreign keys were cleared by a deletion teardown and
    /// must be flushed before the deletes hit the store.
    pre_delete_updates: RefCell<Vec<Entity>>,
    reconstructed_hooks: RefCell<Vec<EntityHook>>,
    rehydrated_hooks: RefCell<Vec<EntityHook>>,
    closed: Cell<bool>,
}

impl<C: Connection> Session<C> {
    /// Create a session over an already-open connection.
    #[must_use]
    pub fn new(catalog: Catalog, connection: C) -> Self {
        let session = Self::with_connector_inner(catalog);
        let _ = session.connection.set(connection);
        session
    }

    /// Create a session that acquires its connection lazily on first use.
    #[must_use]
    pub fn with_connector(catalog: Catalog, connector: impl FnOnce() -> C + 'static) -> Self {
        let session = Self::with_connector_inner(catalog);
        *session.connector.borrow_mut() = Some(Box::new(connector));
        session
    }

    fn with_connector_inner(catalog: Catalog) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, AtomicOrdering::Relaxed),
            catalog,
            connection: OnceCell::new(),
            connector: RefCell::new(None),
            identity: Rc::new(RefCell::new(IdentityMap::default())),
            pending_create: RefCell::new(Vec::new()),
            pending_delete: RefCell::new(Vec::new()),
            pre_delete_updates: RefCell::new(Vec::new()),
            reconstructed_hooks: RefCell::new(Vec::new()),
            rehydrated_hooks: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        }
    }

    /// The catalog this session operates over.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.get() {
            Err(Error::model_state("session is closed"))
        } else {
            Ok(())
        }
    }

    fn tag(&self) -> SessionTag {
        SessionTag {
            id: self.id,
            identity: Rc::downgrade(&self.identity),
        }
    }

    /// The session's connection, acquiring it from the connector on first
    /// use.
    fn conn(&self) -> Result<&C> {
        self.ensure_open()?;
        if self.connection.get().is_none() {
            let maker = self
                .connector
                .borrow_mut()
                .take()
                .ok_or_else(|| Error::model_state("session has no connection or connector"))?;
            let _ = self.connection.set(maker());
            tracing::debug!(session = self.id, "acquired connection");
        }
        self.connection
            .get()
            .ok_or_else(|| Error::model_state("session connection unavailable"))
    }

    /// Register an observer fired when a row is first materialized as an
    /// entity.
    pub fn on_reconstruct(&self, hook: impl Fn(&Entity) + 'static) {
        self.reconstructed_hooks.borrow_mut().push(Box::new(hook));
    }

    /// Register an observer fired when a mapped entity is refreshed from a
    /// re-queried row.
    pub fn on_rehydrate(&self, hook: impl Fn(&Entity) + 'static) {
        self.rehydrated_hooks.borrow_mut().push(Box::new(hook));
    }

    /// Whether the session currently manages `entity` (identity-mapped or
    /// scheduled for creation).
    #[must_use]
    pub fn contains(&self, entity: &Entity) -> bool {
        if self
            .pending_create
            .borrow()
            .iter()
            .any(|p| p.ptr_eq(entity))
        {
            return true;
        }
        if !entity.is_bound() {
            return false;
        }
        self.identity
            .borrow()
            .get(&entity.collection(), &entity.primary_key())
            .is_some_and(|mapped| mapped.ptr_eq(entity))
    }

    /// Internal-state snapshot for diagnostics.
    #[must_use]
    pub fn debug_state(&self) -> SessionDebugInfo {
        SessionDebugInfo {
            identity_mapped: self.identity.borrow().len(),
            pending_creations: self.pending_create.borrow().len(),
            pending_deletions: self.pending_delete.borrow().len(),
            connected: self.connection.get().is_some(),
            closed: self.closed.get(),
        }
    }

    /// Start a chainable query over `collection`.
    pub fn query(&self, collection: &str) -> Result<Query<'_, C>> {
        self.ensure_open()?;
        let schema = self.catalog.schema(collection)?;
        Ok(Query::new(self, schema))
    }

    /// Close the session, releasing the connection. Pending work is
    /// discarded; resolved relation caches are cleared so entity graphs with
    /// reference cycles can be reclaimed.
    pub fn close(mut self) -> Result<()> {
        self.closed.set(true);
        let mut entities = self.identity.borrow().entities();
        entities.extend(self.pending_create.borrow_mut().drain(..));
        entities.extend(self.pending_delete.borrow_mut().drain(..));
        for entity in entities {
            entity.clear_relation_views();
            entity.clear_intents();
            entity.clear_intended_by();
        }
        if let Some(connection) = self.connection.take() {
            connection.close()?;
        }
        Ok(())
    }
}

// ===== Identity resolution =====

impl<C: Connection> Session<C> {
    /// Map a queried row to an entity, enforcing one instance per row.
    ///
    /// A row already present in the identity map refreshes the existing
    /// instance in place: non-dirty attributes take the queried values,
    /// locally dirty attributes win. A new row constructs a bound entity
    /// with unresolved relation views and registers it.
    pub fn resolve_entity(&self, schema: &Arc<Schema>, row: &Row) -> Result<Entity> {
        self.ensure_open()?;
        let pk = schema.primary_key().clone();
        let Some(raw) = row.get_named(&pk.name) else {
            return Err(Error::storage(format!(
                "row for '{}' is missing its primary key",
                schema.collection()
            )));
        };
        let pk_value = pk.ty.from_stored(&pk.name, raw.clone())?;

        let existing = self.identity.borrow().get(schema.collection(), &pk_value);
        if let Some(entity) = existing {
            for (idx, column) in row.columns().iter().enumerate() {
                let Some(def) = schema.attribute(column) else {
                    continue;
                };
                let raw = row.get(idx).cloned().unwrap_or(Value::Null);
                let value = def.ty.from_stored(column, raw)?;
                entity.assign(column, value, WriteMode::Hydrate)?;
            }
            for hook in self.rehydrated_hooks.borrow().iter() {
                hook(&entity);
            }
            tracing::debug!(collection = %schema.collection(), "refreshed mapped entity");
            return Ok(entity);
        }

        let mut values = HashMap::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let Some(def) = schema.attribute(column) else {
                continue;
            };
            let raw = row.get(idx).cloned().unwrap_or(Value::Null);
            values.insert(def.name.clone(), def.ty.from_stored(column, raw)?);
        }
        let entity = Entity::hydrated(schema.clone(), values);
        entity.set_session_tag(self.tag());
        self.identity
            .borrow_mut()
            .insert(schema.collection().clone(), pk_value, entity.clone());
        for hook in self.reconstructed_hooks.borrow().iter() {
            hook(&entity);
        }
        Ok(entity)
    }
}

// ===== Scheduling =====

impl<C: Connection> Session<C> {
    /// Schedule ephemeral entities for creation.
    ///
    /// The input set is expanded along relationship intents in both
    /// directions to the full connected set of not-yet-persisted entities,
    /// then ordered so every entity is emitted after the targets its intents
    /// depend on. A true dependency cycle fails with [`Error::ModelState`].
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn add(&self, entities: &[Entity]) -> Result<()> {
        self.ensure_open()?;
        for entity in entities {
            if entity.is_bound() {
                return Err(Error::model_state(format!(
                    "'{}' entity is already persisted",
                    entity.collection()
                )));
            }
        }

        // Expand along intents (targets) and reverse intents (sources).
        let mut discovered: Vec<Entity> = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut stack: Vec<Entity> = entities.to_vec();
        while let Some(entity) = stack.pop() {
            if entity.is_bound() || !seen.insert(entity.handle_id()) {
                continue;
            }
            match entity.session_tag() {
                Some(tag) if tag.id != self.id => {
                    return Err(Error::model_state(
                        "entity already belongs to another session",
                    ));
                }
                Some(_) => {}
                None => entity.set_session_tag(self.tag()),
            }
            for intent in entity.intents() {
                stack.push(intent.target.clone());
            }
            stack.extend(entity.intent_sources());
            discovered.push(entity);
        }

        // Three-color DFS: every entity emits after its intent targets.
        let mut color: HashMap<usize, u8> = HashMap::new();
        for pending in self.pending_create.borrow().iter() {
            color.insert(pending.handle_id(), 2);
        }
        let mut ordered = Vec::with_capacity(discovered.len());
        for entity in &discovered {
            visit(entity, &mut color, &mut ordered)?;
        }
        tracing::debug!(scheduled = ordered.len(), "scheduled creations");
        self.pending_create.borrow_mut().extend(ordered);
        Ok(())
    }

    /// Schedule entities for deletion.
    ///
    /// Relational teardown is applied immediately in memory (both directions
    /// of every resolved view touching the entity), the entities are
    /// write-locked, and the store-level delete runs at the next commit. An
    /// entity that was only scheduled for creation has that creation
    /// cancelled instead, never touching storage. Deleting a bound entity
    /// whose many-side view is unresolved fails: resolving it later could
    /// reveal dependents left dangling.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn delete(&self, entities: &[Entity]) -> Result<()> {
        self.ensure_open()?;
        // Validate the whole batch before touching anything: a rejected
        // batch leaves every entity exactly as it was.
        for entity in entities {
            if entity.is_write_locked() {
                return Err(Error::model_state("entity is already deleted"));
            }
            if let Some(tag) = entity.session_tag() {
                if tag.id != self.id {
                    return Err(Error::model_state(
                        "entity belongs to another session",
                    ));
                }
            }
            if entity.is_bound() {
                let schema = entity.schema();
                for def in schema.relations() {
                    if def.side == RelationSide::Many
                        && !entity.relation_state(&def.name).is_resolved()
                    {
                        return Err(Error::model_state(format!(
                            "cannot delete '{}': relation '{}' is unresolved and may hide dependents",
                            schema.collection(),
                            def.name
                        )));
                    }
                }
            } else if !self
                .pending_create
                .borrow()
                .iter()
                .any(|p| p.ptr_eq(entity))
            {
                return Err(Error::model_state(
                    "entity is not managed by this session",
                ));
            }
        }

        for entity in entities {
            if !entity.is_bound() {
                let mut pending = self.pending_create.borrow_mut();
                if let Some(pos) = pending.iter().position(|p| p.ptr_eq(entity)) {
                    pending.remove(pos);
                }
            }

            self.teardown_relations(entity);
            if entity.is_bound() {
                self.pending_delete.borrow_mut().push(entity.clone());
            }
            entity.set_write_locked(true);
        }
        Ok(())
    }

    /// In-memory teardown of every relation view touching `entity`.
    pub(crate) fn teardown_relations(&self, entity: &Entity) {
        let schema = entity.schema();
        for def in schema.relations() {
            match def.side {
                RelationSide::One => {
                    if let RelationState::One(Some(target)) = entity.relation_state(&def.name) {
                        target.many_view_remove_entry(&def.remote_relation, entity);
                        target.drop_intended_by(entity);
                    }
                    entity.drop_intent(&def.name);
                    entity.set_relation_state(&def.name, RelationState::One(None));
                }
                RelationSide::Many => {
                    if let RelationState::Many(members) = entity.relation_state(&def.name) {
                        for member in &members {
                            // A member being deleted alongside is already
                            // write-locked; its row goes away regardless.
                            let _ =
                                member.assign(&def.foreign_key, Value::Null, WriteMode::Internal);
                            if let RelationState::One(_) =
                                member.relation_state(&def.remote_relation)
                            {
                                member.set_relation_state(
                                    &def.remote_relation,
                                    RelationState::One(None),
                                );
                            }
                            member.drop_intent(&def.remote_relation);
                            if member.is_bound() {
                                self.pre_delete_updates.borrow_mut().push(member.clone());
                            }
                        }
                        entity.set_relation_state(&def.name, RelationState::Many(Vec::new()));
                    }
                }
            }
        }
        for source in entity.intent_sources() {
            for intent in source.intents() {
                if intent.target.ptr_eq(entity) {
                    source.drop_intent(&intent.relation);
                    if let RelationState::One(_) = source.relation_state(&intent.relation) {
                        source.set_relation_state(&intent.relation, RelationState::One(None));
                    }
                }
            }
        }
        entity.clear_intents();
        entity.clear_intended_by();
    }
}

fn visit(entity: &Entity, color: &mut HashMap<usize, u8>, ordered: &mut Vec<Entity>) -> Result<()> {
    match color.get(&entity.handle_id()) {
        Some(2) => return Ok(()),
        Some(1) => {
            return Err(Error::model_state(format!(
                "relationship intents form a cycle through '{}'; break the cycle or commit in stages",
                entity.collection()
            )));
        }
        _ => {}
    }
    color.insert(entity.handle_id(), 1);
    for intent in entity.intents() {
        if !intent.target.is_bound() {
            visit(&intent.target, color, ordered)?;
        }
    }
    color.insert(entity.handle_id(), 2);
    ordered.push(entity.clone());
    Ok(())
}

// ===== Commit pipeline =====

impl<C: Connection> Session<C> {
    /// Flush all pending work inside a single storage transaction.
    ///
    /// Order: creations in dependency order, foreign-key-clearing updates
    /// for rows referencing about-to-be-deleted rows, deletions, then one
    /// update per remaining dirty entity. Any failure rolls the transaction
    /// back and re-raises; no partial application survives at the store.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn commit(&self, cx: &Cx) -> Outcome<(), Error> {
        if let Err(e) = self.ensure_open() {
            return Outcome::Err(e);
        }
        let conn = match self.conn() {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        match conn.execute(cx, "BEGIN", &[]).await {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        match self.commit_inner(cx, conn).await {
            Outcome::Ok(()) => match conn.execute(cx, "COMMIT", &[]).await {
                Outcome::Ok(_) => {
                    tracing::info!(session = self.id, "committed");
                    Outcome::Ok(())
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            failure => {
                tracing::warn!(session = self.id, "commit failed, rolling back");
                let _ = conn.execute(cx, "ROLLBACK", &[]).await;
                failure
            }
        }
    }

    async fn commit_inner(&self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        // 1. Creations, in dependency order.
        let creations: Vec<Entity> = self.pending_create.borrow_mut().drain(..).collect();
        for entity in &creations {
            match self.insert_entity(cx, conn, entity).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        // 2. Foreign-key clearing ahead of the deletes.
        let mut flushed: HashSet<usize> = HashSet::new();
        let pre_updates: Vec<Entity> = self.pre_delete_updates.borrow_mut().drain(..).collect();
        for entity in pre_updates {
            if !flushed.insert(entity.handle_id()) {
                continue;
            }
            if !entity.is_bound() || !entity.is_dirty() {
                continue;
            }
            match self.flush_update(cx, conn, &entity).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        // 3. Deletions.
        let deletions: Vec<Entity> = self.pending_delete.borrow_mut().drain(..).collect();
        for entity in deletions {
            let schema = entity.schema();
            let pk = schema.primary_key().name.clone();
            let pk_value = entity.primary_key();
            let statement = Delete::new(schema.clone())
                .filter(vec![Cond::eq(&*pk, pk_value.clone())], Conjunctive::And);
            let (sql, params) = match statement {
                Ok(delete) => delete.build(),
                Err(e) => return Outcome::Err(e),
            };
            match conn.execute(cx, &sql, &params).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            entity.mark_unbound();
            entity.clear_relation_views();
            self.identity
                .borrow_mut()
                .remove(schema.collection(), &pk_value);
        }

        // 4. Remaining dirty updates.
        let mapped = self.identity.borrow().entities();
        for entity in mapped {
            if !entity.is_dirty() {
                continue;
            }
            match self.flush_update(cx, conn, &entity).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(())
    }

    async fn insert_entity(&self, cx: &Cx, conn: &C, entity: &Entity) -> Outcome<(), Error> {
        let schema = entity.schema();

        // Engine-generated defaults (UUID primary keys) count as explicit.
        for def in schema.attributes() {
            if entity.unset_attributes().iter().any(|n| *n == def.name) {
                if let Some(value) = def.ty.generate_default() {
                    if let Err(e) = entity.assign(&def.name, value, WriteMode::Internal) {
                        return Outcome::Err(e);
                    }
                }
            }
        }

        // Commit-time relational enforcement: a non-nullable foreign key
        // must hold a value by now; dependency order has already run.
        for def in schema.attributes() {
            if def.ty.is_foreign_key() && !def.ty.is_nullable() {
                let value = match entity.get(&def.name) {
                    Ok(value) => value,
                    Err(e) => return Outcome::Err(e),
                };
                if value.is_null() {
                    return Outcome::Err(Error::RelationalAttribute {
                        attribute: def.name.to_string(),
                        collection: schema.collection().to_string(),
                    });
                }
            }
        }

        let explicit = entity.explicit_snapshot();
        let unset = entity.unset_attributes();
        let pairs: Vec<(&str, Value)> = explicit
            .iter()
            .map(|(name, value)| (&**name, value.clone()))
            .collect();
        let returning: Vec<&str> = unset.iter().map(|n| &**n).collect();
        let statement = Insert::new(schema.clone())
            .values(pairs)
            .and_then(|i| i.returning(&returning));
        let (sql, params) = match statement {
            Ok(insert) => insert.build(),
            Err(e) => return Outcome::Err(e),
        };
        let rows = match conn.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        // Merge returned defaults back without re-dirtying.
        entity.clear_dirty();
        if let Some(row) = rows.first() {
            for (idx, column) in row.columns().iter().enumerate() {
                let Some(def) = schema.attribute(column) else {
                    continue;
                };
                let raw = row.get(idx).cloned().unwrap_or(Value::Null);
                let value = match def.ty.from_stored(column, raw) {
                    Ok(value) => value,
                    Err(e) => return Outcome::Err(e),
                };
                if let Err(e) = entity.assign(column, value, WriteMode::Hydrate) {
                    return Outcome::Err(e);
                }
            }
        }
        entity.mark_bound();

        let pk_value = entity.primary_key();
        if pk_value.is_null() {
            return Outcome::Err(Error::storage(format!(
                "store did not return a primary key for '{}'",
                schema.collection()
            )));
        }
        self.identity
            .borrow_mut()
            .insert(schema.collection().clone(), pk_value.clone(), entity.clone());
        tracing::debug!(collection = %schema.collection(), "inserted");

        // Fulfill the intents that were waiting on this primary key.
        for source in entity.intent_sources() {
            for intent in source.intents() {
                if !intent.target.ptr_eq(entity) {
                    continue;
                }
                if let Err(e) =
                    source.assign(&intent.foreign_key, pk_value.clone(), WriteMode::Internal)
                {
                    return Outcome::Err(e);
                }
                source.drop_intent(&intent.relation);
            }
        }
        entity.clear_intended_by();
        Outcome::Ok(())
    }

    async fn flush_update(&self, cx: &Cx, conn: &C, entity: &Entity) -> Outcome<(), Error> {
        let schema = entity.schema();

        // Non-nullable enforcement before the statement is emitted.
        for def in schema.attributes() {
            if def.ty.is_nullable() {
                continue;
            }
            let value = match entity.get(&def.name) {
                Ok(value) => value,
                Err(e) => return Outcome::Err(e),
            };
            if value.is_null() {
                if def.ty.is_foreign_key() {
                    return Outcome::Err(Error::RelationalAttribute {
                        attribute: def.name.to_string(),
                        collection: schema.collection().to_string(),
                    });
                }
                return Outcome::Err(Error::attribute_value(
                    &*def.name,
                    "non-nullable attribute has no value",
                ));
            }
        }

        let dirty = entity.dirty_snapshot();
        if dirty.is_empty() {
            return Outcome::Ok(());
        }
        let pairs: Vec<(&str, Value)> = dirty
            .iter()
            .map(|(name, value)| (&**name, value.clone()))
            .collect();
        let pk = schema.primary_key().name.clone();
        let statement = Update::new(schema.clone())
            .set(pairs)
            .and_then(|u| {
                u.filter(
                    vec![Cond::eq(&*pk, entity.primary_key())],
                    Conjunctive::And,
                )
            })
            .and_then(loam_query::Update::build);
        let (sql, params) = match statement {
            Ok(built) => built,
            Err(e) => return Outcome::Err(e),
        };
        match conn.execute(cx, &sql, &params).await {
            Outcome::Ok(_) => {
                entity.clear_dirty();
                tracing::debug!(collection = %schema.collection(), "updated");
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

// ===== Relation loading =====

impl<C: Connection> Session<C> {
    /// Resolve the one-side view `name` on `entity`, loading it if needed.
    ///
    /// Already-resolved access returns synchronously without touching
    /// storage.
    pub async fn load_one(
        &self,
        cx: &Cx,
        entity: &Entity,
        name: &str,
    ) -> Outcome<Option<Entity>, Error> {
        let def = match entity.relation_def(name, RelationSide::One) {
            Ok(def) => def,
            Err(e) => return Outcome::Err(e),
        };
        if let RelationState::One(target) = entity.relation_state(&def.name) {
            return Outcome::Ok(target);
        }
        let fk = match entity.get(&def.foreign_key) {
            Ok(value) => value,
            Err(e) => return Outcome::Err(e),
        };
        if fk.is_null() {
            entity.set_relation_state(&def.name, RelationState::One(None));
            return Outcome::Ok(None);
        }
        let remote = match self.catalog.schema(&def.remote_collection) {
            Ok(schema) => schema,
            Err(e) => return Outcome::Err(e),
        };
        let pk = remote.primary_key().name.clone();
        let statement = Select::new(remote.clone())
            .filter(vec![Cond::eq(&*pk, fk)], Conjunctive::And)
            .and_then(|s| s.limit(1));
        let (sql, params) = match statement {
            Ok(select) => select.build(),
            Err(e) => return Outcome::Err(e),
        };
        let conn = match self.conn() {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        let rows = match conn.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let target = match rows.first() {
            Some(row) => match self.resolve_entity(&remote, row) {
                Ok(target) => Some(target),
                Err(e) => return Outcome::Err(e),
            },
            // Dangling key: resolve to no target rather than failing reads.
            None => None,
        };
        entity.set_relation_state(&def.name, RelationState::One(target.clone()));
        Outcome::Ok(target)
    }

    /// Resolve the many-side view `name` on `entity`, loading it if needed.
    ///
    /// Freshly loaded members get their paired one-side views eagerly
    /// resolved to this host, amortizing future loads and keeping the two
    /// directions consistent without another round trip.
    pub async fn load_many(
        &self,
        cx: &Cx,
        entity: &Entity,
        name: &str,
    ) -> Outcome<Vec<Entity>, Error> {
        let def = match entity.relation_def(name, RelationSide::Many) {
            Ok(def) => def,
            Err(e) => return Outcome::Err(e),
        };
        if let RelationState::Many(members) = entity.relation_state(&def.name) {
            return Outcome::Ok(members);
        }
        let pk_value = entity.primary_key();
        if pk_value.is_null() {
            return Outcome::Err(Error::model_state(
                "cannot load a relation on an entity without a primary key",
            ));
        }
        let remote = match self.catalog.schema(&def.remote_collection) {
            Ok(schema) => schema,
            Err(e) => return Outcome::Err(e),
        };
        let order: Vec<(String, _)> = def
            .order
            .iter()
            .map(|(attr, direction)| (attr.to_string(), *direction))
            .collect();
        let statement = Select::new(remote.clone())
            .filter(
                vec![Cond::eq(&*def.foreign_key, pk_value)],
                Conjunctive::And,
            )
            .and_then(|s| s.order_by(order));
        let (sql, params) = match statement {
            Ok(select) => select.build(),
            Err(e) => return Outcome::Err(e),
        };
        let conn = match self.conn() {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        let rows = match conn.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let mut members = Vec::with_capacity(rows.len());
        for row in &rows {
            let member = match self.resolve_entity(&remote, row) {
                Ok(member) => member,
                Err(e) => return Outcome::Err(e),
            };
            if !member.relation_state(&def.remote_relation).is_resolved() {
                member.set_relation_state(
                    &def.remote_relation,
                    RelationState::One(Some(entity.clone())),
                );
            }
            members.push(member);
        }
        entity.set_relation_state(&def.name, RelationState::Many(members.clone()));
        tracing::debug!(relation = name, members = members.len(), "loaded many view");
        Outcome::Ok(members)
    }

    /// Serialize `entity`, resolving any included-but-unresolved relations
    /// first.
    pub async fn serialize(
        &self,
        cx: &Cx,
        entity: &Entity,
        options: &SerializeOptions,
    ) -> Outcome<serde_json::Value, Error> {
        match self.resolve_includes(cx, entity, options).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        match entity.serialize(options) {
            Ok(json) => Outcome::Ok(json),
            Err(e) => Outcome::Err(e),
        }
    }

    fn resolve_includes<'a>(
        &'a self,
        cx: &'a Cx,
        entity: &'a Entity,
        options: &'a SerializeOptions,
    ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + 'a>> {
        Box::pin(async move {
            let schema = entity.schema();
            for (name, nested) in options.includes() {
                let Some(def) = schema.relation(name) else {
                    return Outcome::Err(Error::schema(format!(
                        "unknown relation '{name}' on '{}'",
                        schema.collection()
                    )));
                };
                if !entity.relation_state(name).is_resolved() {
                    let loaded = match def.side {
                        RelationSide::One => match self.load_one(cx, entity, name).await {
                            Outcome::Ok(_) => Outcome::Ok(()),
                            Outcome::Err(e) => Outcome::Err(e),
                            Outcome::Cancelled(r) => Outcome::Cancelled(r),
                            Outcome::Panicked(p) => Outcome::Panicked(p),
                        },
                        RelationSide::Many => match self.load_many(cx, entity, name).await {
                            Outcome::Ok(_) => Outcome::Ok(()),
                            Outcome::Err(e) => Outcome::Err(e),
                            Outcome::Cancelled(r) => Outcome::Cancelled(r),
                            Outcome::Panicked(p) => Outcome::Panicked(p),
                        },
                    };
                    match loaded {
                        Outcome::Ok(()) => {}
                        failure => return failure,
                    }
                }
                let children = match entity.relation_state(name) {
                    RelationState::One(Some(target)) => vec![target],
                    RelationState::Many(members) => members,
                    _ => Vec::new(),
                };
                for child in &children {
                    match self.resolve_includes(cx, child, nested).await {
                        Outcome::Ok(()) => {}
                        failure => return failure,
                    }
                }
            }
            Outcome::Ok(())
        })
    }
}

// ===== Internal access for the query wrapper =====

impl<C: Connection> Session<C> {
    pub(crate) fn connection_ref(&self) -> Result<&C> {
        self.conn()
    }

    pub(crate) fn identity_lookup(&self, collection: &str, key: &Value) -> Option<Entity> {
        self.identity.borrow().get(collection, key)
    }

    pub(crate) fn identity_remove(&self, collection: &str, key: &Value) -> Option<Entity> {
        self.identity.borrow_mut().remove(collection, key)
    }
}
