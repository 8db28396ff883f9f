//! Entities: validated attribute access, dirty tracking, and relation views.
//!
//! An [`Entity`] is a cheap-clone handle (`Rc<RefCell<…>>`) over one logical
//! record. Equality of handles is identity: two clones of the same handle
//! are the same entity. All attribute access goes through [`Entity::get`] and
//! [`Entity::set`]; the public write path runs the schema's before-set hooks,
//! validates, records the previous value into the dirty set on first change,
//! and reconciles foreign-key writes with the cached relation views. Relation
//! side effects and commit reconciliation use a privileged internal write
//! path that skips hooks and relation reconciliation.
//!
//! Relation views live on the entity as a tagged state per view name:
//! `Unresolved`, `One(Option<Entity>)`, or `Many(Vec<Entity>)`. Views on an
//! ephemeral host initialize resolved to their default (no target / empty
//! list); views on a host reconstructed from a row initialize `Unresolved`
//! and must be loaded through the session before synchronous access.
//!
//! Linking to a not-yet-persisted target records a **relationship intent**
//! instead of a foreign-key value: the key is assigned during commit, once
//! the target has a primary key. The target keeps weak back-pointers to the
//! entities intending to link to it so `Session::add` can discover the whole
//! connected ephemeral graph.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use loam_core::schema::{Direction, RelationDef, RelationSide};
use loam_core::{Error, Result, Schema, Value};

use crate::identity::SessionTag;

/// Resolution state of one relation view.
#[derive(Clone)]
pub enum RelationState {
    /// Not loaded; synchronous access and mutation are forbidden.
    Unresolved,
    /// Resolved one-side view: the linked target, if any.
    One(Option<Entity>),
    /// Resolved many-side view: the ordered members.
    Many(Vec<Entity>),
}

impl RelationState {
    /// True unless the view is [`RelationState::Unresolved`].
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self, RelationState::Unresolved)
    }
}

impl fmt::Debug for RelationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationState::Unresolved => write!(f, "Unresolved"),
            RelationState::One(None) => write!(f, "One(None)"),
            RelationState::One(Some(e)) => write!(f, "One({e:?})"),
            RelationState::Many(ms) => write!(f, "Many(len={})", ms.len()),
        }
    }
}

/// A deferred foreign-key assignment awaiting the target's primary key.
#[derive(Debug, Clone)]
pub(crate) struct Intent {
    /// One-side view name on the intending entity.
    pub(crate) relation: Arc<str>,
    /// Foreign-key attribute to assign.
    pub(crate) foreign_key: Arc<str>,
    /// The not-yet-persisted target.
    pub(crate) target: Entity,
}

/// Which write path an internal assignment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Relation side effect or intent fulfillment: skips hooks and relation
    /// reconciliation, still dirty-tracks.
    Internal,
    /// Storage reconciliation: raw write, no dirty tracking; locally dirty
    /// attributes win and are left untouched.
    Hydrate,
}

struct EntityInner {
    schema: Arc<Schema>,
    values: HashMap<Arc<str>, Value>,
    /// Attribute -> value before the first uncommitted change.
    dirty: HashMap<Arc<str>, Value>,
    bound: bool,
    write_locked: bool,
    /// False only during construction/reconstruction fills.
    dirtying: bool,
    relations: HashMap<Arc<str>, RelationState>,
    intents: Vec<Intent>,
    /// Entities holding an intent toward this one; weak to keep the graph
    /// acyclic for the allocator.
    intended_by: Vec<Weak<RefCell<EntityInner>>>,
    session: Option<SessionTag>,
}

/// Handle to one in-memory record.
#[derive(Clone)]
pub struct Entity {
    inner: Rc<RefCell<EntityInner>>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let pk = inner.schema.primary_key().name.clone();
        f.debug_struct("Entity")
            .field("collection", &&**inner.schema.collection())
            .field("primary_key", &inner.values.get(&pk))
            .field("bound", &inner.bound)
            .finish()
    }
}

// ===== Construction =====

impl Entity {
    /// Construct an ephemeral entity from a plain record.
    ///
    /// Values pass through the public write path (hooks and validation) but
    /// do not dirty-track; relation views initialize resolved to their
    /// defaults. Link relations afterwards with [`Entity::set_one`] or the
    /// many-side [`Entity::push`].
    pub fn create(schema: &Arc<Schema>, record: Vec<(&str, Value)>) -> Result<Entity> {
        let relations = schema
            .relations()
            .iter()
            .map(|def| {
                let state = match def.side {
                    RelationSide::One => RelationState::One(None),
                    RelationSide::Many => RelationState::Many(Vec::new()),
                };
                (def.name.clone(), state)
            })
            .collect();
        let entity = Entity {
            inner: Rc::new(RefCell::new(EntityInner {
                schema: schema.clone(),
                values: HashMap::new(),
                dirty: HashMap::new(),
                bound: false,
                write_locked: false,
                dirtying: false,
                relations,
                intents: Vec::new(),
                intended_by: Vec::new(),
                session: None,
            })),
        };
        for (name, value) in record {
            entity.set(name, value)?;
        }
        entity.inner.borrow_mut().dirtying = true;
        Ok(entity)
    }

    /// Construct a bound entity from already-stored values. Relation views
    /// start unresolved.
    pub(crate) fn hydrated(schema: Arc<Schema>, values: HashMap<Arc<str>, Value>) -> Entity {
        let relations = schema
            .relations()
            .iter()
            .map(|def| (def.name.clone(), RelationState::Unresolved))
            .collect();
        Entity {
            inner: Rc::new(RefCell::new(EntityInner {
                schema,
                values,
                dirty: HashMap::new(),
                bound: true,
                write_locked: false,
                dirtying: true,
                relations,
                intents: Vec::new(),
                intended_by: Vec::new(),
                session: None,
            })),
        }
    }
}

// ===== Introspection =====

impl Entity {
    /// The entity's schema.
    #[must_use]
    pub fn schema(&self) -> Arc<Schema> {
        self.inner.borrow().schema.clone()
    }

    /// The collection this entity maps to.
    #[must_use]
    pub fn collection(&self) -> Arc<str> {
        self.inner.borrow().schema.collection().clone()
    }

    /// Whether a stored row backs this entity.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.inner.borrow().bound
    }

    /// Whether writes are forbidden (the entity was deleted).
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.inner.borrow().write_locked
    }

    /// Whether any attribute changed since the last storage reconciliation.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.inner.borrow().dirty.is_empty()
    }

    /// Names of the currently dirty attributes.
    #[must_use]
    pub fn dirty_attributes(&self) -> Vec<Arc<str>> {
        self.inner.borrow().dirty.keys().cloned().collect()
    }

    /// Current primary-key value (null while ephemeral without a generated
    /// key).
    #[must_use]
    pub fn primary_key(&self) -> Value {
        let inner = self.inner.borrow();
        let pk = &inner.schema.primary_key().name;
        inner.values.get(pk).cloned().unwrap_or(Value::Null)
    }

    /// Handle identity.
    #[must_use]
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn handle_id(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<EntityInner>> {
        Rc::downgrade(&self.inner)
    }

    fn from_weak(weak: &Weak<RefCell<EntityInner>>) -> Option<Entity> {
        weak.upgrade().map(|inner| Entity { inner })
    }
}

// ===== Attribute access =====

impl Entity {
    /// Current value of an attribute; unset attributes read as null.
    pub fn get(&self, name: &str) -> Result<Value> {
        let inner = self.inner.borrow();
        let Some(def) = inner.schema.attribute(name) else {
            return Err(unknown_attribute(&inner.schema, name));
        };
        let key = def.name.clone();
        Ok(inner.values.get(&key).cloned().unwrap_or(Value::Null))
    }

    /// Public write path: before-set hooks, validation, no-op on equal
    /// value, first-change-wins dirty recording, and foreign-key relation
    /// reconciliation.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let reconcile = {
            let mut inner = self.inner.borrow_mut();
            if inner.write_locked {
                return Err(write_locked(&inner.schema));
            }
            let schema = inner.schema.clone();
            let Some(def) = schema.attribute(name) else {
                return Err(unknown_attribute(&schema, name));
            };
            let key = def.name.clone();
            let value = schema.apply_before_set(name, value);
            def.ty.check(name, &value)?;
            let previous = inner.values.get(&key).cloned().unwrap_or(Value::Null);
            if previous == value {
                return Ok(());
            }
            if inner.dirtying && !inner.dirty.contains_key(&key) {
                inner.dirty.insert(key.clone(), previous);
            }
            inner.values.insert(key, value.clone());
            schema
                .relation_for_foreign_key(name)
                .cloned()
                .map(|def| (def, value))
        };
        if let Some((def, value)) = reconcile {
            self.reconcile_foreign_key(&def, &value);
        }
        Ok(())
    }

    /// Privileged write path for relation side effects and storage
    /// reconciliation.
    pub(crate) fn assign(&self, name: &str, value: Value, mode: WriteMode) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let Some(def) = inner.schema.attribute(name) else {
            return Err(unknown_attribute(&inner.schema, name));
        };
        let key = def.name.clone();
        match mode {
            WriteMode::Internal => {
                if inner.write_locked {
                    return Err(write_locked(&inner.schema));
                }
                let previous = inner.values.get(&key).cloned().unwrap_or(Value::Null);
                if previous == value {
                    return Ok(());
                }
                if inner.dirtying && !inner.dirty.contains_key(&key) {
                    inner.dirty.insert(key.clone(), previous);
                }
                inner.values.insert(key, value);
            }
            WriteMode::Hydrate => {
                if inner.dirty.contains_key(&key) {
                    return Ok(());
                }
                inner.values.insert(key, value);
            }
        }
        Ok(())
    }

    /// Apply many attributes at once, aggregating validation failures.
    ///
    /// Valid attributes are applied; each invalid one is reported in the
    /// resulting [`Error::Attributes`]. Non-validation failures (write lock,
    /// unknown attribute) abort immediately and are never aggregated.
    pub fn update(&self, record: Vec<(&str, Value)>) -> Result<()> {
        let mut errors = Vec::new();
        for (name, value) in record {
            match self.set(name, value) {
                Ok(()) => {}
                Err(e) if e.is_attribute_type() || e.is_attribute_value() => errors.push(e),
                Err(e) => return Err(e),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Attributes(errors))
        }
    }

    /// [`Entity::update`] over serialized (JSON) input.
    pub fn update_serialized(
        &self,
        record: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let schema = self.schema();
        let mut errors = Vec::new();
        for (name, json) in record {
            let Some(def) = schema.attribute(name) else {
                return Err(unknown_attribute(&schema, name));
            };
            match def.ty.from_json(name, json) {
                Ok(value) => match self.set(name, value) {
                    Ok(()) => {}
                    Err(e) if e.is_attribute_type() || e.is_attribute_value() => errors.push(e),
                    Err(e) => return Err(e),
                },
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Attributes(errors))
        }
    }
}

// ===== Relation views =====

impl Entity {
    /// The resolved one-side target for `name`.
    ///
    /// Fails with [`Error::ModelState`] while the view is unresolved; load
    /// it through the session first.
    pub fn one(&self, name: &str) -> Result<Option<Entity>> {
        let def = self.relation_def(name, RelationSide::One)?;
        match self.relation_state(&def.name) {
            RelationState::One(target) => Ok(target),
            _ => Err(unresolved(name)),
        }
    }

    /// A copy of the resolved many-side member list for `name`. Mutating the
    /// returned vector does not affect the view; use [`Entity::push`] and
    /// [`Entity::remove`].
    pub fn many(&self, name: &str) -> Result<Vec<Entity>> {
        let def = self.relation_def(name, RelationSide::Many)?;
        match self.relation_state(&def.name) {
            RelationState::Many(members) => Ok(members),
            _ => Err(unresolved(name)),
        }
    }

    /// Point the one-side view `name` at `target` (or clear it with `None`).
    ///
    /// A bound target gets its primary key assigned into the foreign key
    /// immediately; an ephemeral target registers a relationship intent
    /// resolved at commit. The previous target's many-side view and the new
    /// target's many-side view are kept consistent when resolved, and
    /// silently skipped when not.
    pub fn set_one(&self, name: &str, target: Option<&Entity>) -> Result<()> {
        let def = self.relation_def(name, RelationSide::One)?;
        if self.is_write_locked() {
            return Err(write_locked(&self.schema()));
        }
        let RelationState::One(current) = self.relation_state(&def.name) else {
            return Err(unresolved(name));
        };
        if let Some(target) = target {
            if &*target.collection() != &*def.remote_collection {
                return Err(Error::schema(format!(
                    "relation '{name}' links to '{}', got a '{}' entity",
                    def.remote_collection,
                    target.collection()
                )));
            }
            self.check_same_session(target)?;
            if let Some(cur) = &current {
                if cur.ptr_eq(target) {
                    return Ok(());
                }
            }
        } else if current.is_none() {
            return Ok(());
        }

        if let Some(prev) = &current {
            prev.many_view_remove_entry(&def.remote_relation, self);
            self.drop_intent(&def.name);
            prev.drop_intended_by(self);
        }
        match target {
            Some(target) => {
                if target.is_bound() {
                    self.assign(&def.foreign_key, target.primary_key(), WriteMode::Internal)?;
                } else {
                    self.add_intent(Intent {
                        relation: def.name.clone(),
                        foreign_key: def.foreign_key.clone(),
                        target: target.clone(),
                    });
                    target.push_intended_by(self);
                }
                self.set_relation_state(&def.name, RelationState::One(Some(target.clone())));
                target.many_view_append_entry(&def.remote_relation, self);
            }
            None => {
                self.assign(&def.foreign_key, Value::Null, WriteMode::Internal)?;
                self.set_relation_state(&def.name, RelationState::One(None));
            }
        }
        Ok(())
    }

    /// Append `member` to the resolved many-side view `name`.
    ///
    /// Detaches the member from any other resolved one-side link it holds,
    /// performs the same immediate-vs-intent foreign-key resolution as
    /// [`Entity::set_one`] mirrored, and re-sorts the view per its
    /// configured order. Pushing an existing member fails and leaves the
    /// view unchanged.
    pub fn push(&self, name: &str, member: &Entity) -> Result<()> {
        let def = self.relation_def(name, RelationSide::Many)?;
        let RelationState::Many(members) = self.relation_state(&def.name) else {
            return Err(unresolved(name));
        };
        if &*member.collection() != &*def.remote_collection {
            return Err(Error::schema(format!(
                "relation '{name}' holds '{}' entities, got '{}'",
                def.remote_collection,
                member.collection()
            )));
        }
        self.check_same_session(member)?;
        if members.iter().any(|m| m.ptr_eq(member)) {
            return Err(Error::model_state(format!(
                "entity is already a member of '{name}'"
            )));
        }

        let one_name = def.remote_relation.clone();
        if let RelationState::One(Some(prev)) = member.relation_state(&one_name) {
            if !prev.ptr_eq(self) {
                prev.many_view_remove_entry(&def.name, member);
                member.drop_intent(&one_name);
                prev.drop_intended_by(member);
            }
        }
        if self.is_bound() {
            member.assign(&def.foreign_key, self.primary_key(), WriteMode::Internal)?;
        } else {
            member.add_intent(Intent {
                relation: one_name.clone(),
                foreign_key: def.foreign_key.clone(),
                target: self.clone(),
            });
            self.push_intended_by(member);
        }
        self.many_view_append_entry(&def.name, member);
        if let RelationState::One(_) = member.relation_state(&one_name) {
            member.set_relation_state(&one_name, RelationState::One(Some(self.clone())));
        }
        Ok(())
    }

    /// Remove `member` from the resolved many-side view `name`, nulling its
    /// foreign key and its resolved one-side view.
    pub fn remove(&self, name: &str, member: &Entity) -> Result<()> {
        let def = self.relation_def(name, RelationSide::Many)?;
        let RelationState::Many(members) = self.relation_state(&def.name) else {
            return Err(unresolved(name));
        };
        if !members.iter().any(|m| m.ptr_eq(member)) {
            return Err(Error::model_state(format!(
                "entity is not a member of '{name}'"
            )));
        }
        member.assign(&def.foreign_key, Value::Null, WriteMode::Internal)?;
        self.many_view_remove_entry(&def.name, member);
        let one_name = def.remote_relation.clone();
        if let RelationState::One(_) = member.relation_state(&one_name) {
            member.set_relation_state(&one_name, RelationState::One(None));
        }
        member.drop_intent(&one_name);
        self.drop_intended_by(member);
        Ok(())
    }

    /// Reconciliation after a public foreign-key write: re-point the one-side
    /// view to an in-session target, or force it unresolved when the new key
    /// cannot be resolved in memory.
    fn reconcile_foreign_key(&self, def: &RelationDef, value: &Value) {
        let RelationState::One(current) = self.relation_state(&def.name) else {
            return;
        };
        if let Some(prev) = &current {
            prev.many_view_remove_entry(&def.remote_relation, self);
            self.drop_intent(&def.name);
            prev.drop_intended_by(self);
        }
        if value.is_null() {
            self.set_relation_state(&def.name, RelationState::One(None));
            return;
        }
        let target = self
            .session_tag()
            .and_then(|tag| tag.lookup(&def.remote_collection, value));
        match target {
            Some(target) => {
                self.set_relation_state(&def.name, RelationState::One(Some(target.clone())));
                target.many_view_append_entry(&def.remote_relation, self);
            }
            None => self.set_relation_state(&def.name, RelationState::Unresolved),
        }
    }

    pub(crate) fn relation_def(&self, name: &str, side: RelationSide) -> Result<RelationDef> {
        let inner = self.inner.borrow();
        let Some(def) = inner.schema.relation(name) else {
            return Err(Error::schema(format!(
                "unknown relation '{name}' on '{}'",
                inner.schema.collection()
            )));
        };
        if def.side != side {
            let wanted = match side {
                RelationSide::One => "one-side",
                RelationSide::Many => "many-side",
            };
            return Err(Error::schema(format!(
                "relation '{name}' on '{}' is not a {wanted} view",
                inner.schema.collection()
            )));
        }
        Ok(def.clone())
    }

    pub(crate) fn relation_state(&self, name: &str) -> RelationState {
        self.inner
            .borrow()
            .relations
            .get(name)
            .cloned()
            .unwrap_or(RelationState::Unresolved)
    }

    pub(crate) fn set_relation_state(&self, name: &str, state: RelationState) {
        self.inner
            .borrow_mut()
            .relations
            .insert(Arc::from(name), state);
    }

    /// Append to a resolved many view and re-sort; no-op while unresolved or
    /// already a member.
    pub(crate) fn many_view_append_entry(&self, view_name: &str, member: &Entity) {
        let RelationState::Many(mut members) = self.relation_state(view_name) else {
            return;
        };
        if members.iter().any(|m| m.ptr_eq(member)) {
            return;
        }
        members.push(member.clone());
        if let Some(def) = self.schema().relation(view_name) {
            sort_members(&mut members, &def.order);
        }
        self.set_relation_state(view_name, RelationState::Many(members));
    }

    /// Remove from a resolved many view; no-op while unresolved.
    pub(crate) fn many_view_remove_entry(&self, view_name: &str, member: &Entity) {
        let RelationState::Many(mut members) = self.relation_state(view_name) else {
            return;
        };
        members.retain(|m| !m.ptr_eq(member));
        self.set_relation_state(view_name, RelationState::Many(members));
    }
}

/// Stable multi-key sort: keys evaluated left to right, first non-equal
/// comparison wins, total ties keep their order.
fn sort_members(members: &mut [Entity], order: &[(Arc<str>, Direction)]) {
    if order.is_empty() || members.len() < 2 {
        return;
    }
    let schema = members[0].schema();
    let keys: Vec<_> = order
        .iter()
        .filter_map(|(name, direction)| {
            schema
                .attribute(name)
                .map(|def| (def.name.clone(), def.ty.clone(), *direction))
        })
        .collect();
    members.sort_by(|a, b| {
        for (name, ty, direction) in &keys {
            let av = a.get(name).unwrap_or(Value::Null);
            let bv = b.get(name).unwrap_or(Value::Null);
            let ord = ty.compare(&av, &bv);
            let ord = match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

// ===== Intent and session bookkeeping =====

impl Entity {
    fn add_intent(&self, intent: Intent) {
        let mut inner = self.inner.borrow_mut();
        inner.intents.retain(|i| i.relation != intent.relation);
        inner.intents.push(intent);
    }

    pub(crate) fn drop_intent(&self, relation: &str) {
        self.inner
            .borrow_mut()
            .intents
            .retain(|i| &*i.relation != relation);
    }

    fn push_intended_by(&self, source: &Entity) {
        self.inner.borrow_mut().intended_by.push(source.downgrade());
    }

    pub(crate) fn drop_intended_by(&self, source: &Entity) {
        self.inner.borrow_mut().intended_by.retain(|weak| {
            Entity::from_weak(weak).is_some_and(|e| !e.ptr_eq(source))
        });
    }

    pub(crate) fn intents(&self) -> Vec<Intent> {
        self.inner.borrow().intents.clone()
    }

    pub(crate) fn clear_intents(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.intents.clear();
    }

    pub(crate) fn clear_intended_by(&self) {
        self.inner.borrow_mut().intended_by.clear();
    }

    /// Live entities holding an intent toward this one.
    pub(crate) fn intent_sources(&self) -> Vec<Entity> {
        self.inner
            .borrow()
            .intended_by
            .iter()
            .filter_map(Entity::from_weak)
            .collect()
    }

    pub(crate) fn session_tag(&self) -> Option<SessionTag> {
        self.inner.borrow().session.clone()
    }

    pub(crate) fn set_session_tag(&self, tag: SessionTag) {
        self.inner.borrow_mut().session = Some(tag);
    }

    fn check_same_session(&self, other: &Entity) -> Result<()> {
        if let (Some(a), Some(b)) = (self.session_tag(), other.session_tag()) {
            if a.id != b.id {
                return Err(Error::model_state(
                    "cannot link entities owned by different sessions",
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn mark_bound(&self) {
        self.inner.borrow_mut().bound = true;
    }

    pub(crate) fn mark_unbound(&self) {
        self.inner.borrow_mut().bound = false;
    }

    pub(crate) fn set_write_locked(&self, locked: bool) {
        self.inner.borrow_mut().write_locked = locked;
    }

    pub(crate) fn clear_dirty(&self) {
        self.inner.borrow_mut().dirty.clear();
    }

    /// Dirty attributes with their current values, in schema order.
    pub(crate) fn dirty_snapshot(&self) -> Vec<(Arc<str>, Value)> {
        let inner = self.inner.borrow();
        inner
            .schema
            .attributes()
            .iter()
            .filter(|def| inner.dirty.contains_key(&def.name))
            .map(|def| {
                let value = inner.values.get(&def.name).cloned().unwrap_or(Value::Null);
                (def.name.clone(), value)
            })
            .collect()
    }

    /// Explicitly-set attributes with values, in schema order.
    pub(crate) fn explicit_snapshot(&self) -> Vec<(Arc<str>, Value)> {
        let inner = self.inner.borrow();
        inner
            .schema
            .attributes()
            .iter()
            .filter(|def| inner.values.contains_key(&def.name))
            .map(|def| (def.name.clone(), inner.values[&def.name].clone()))
            .collect()
    }

    /// Attributes never explicitly set, relying on engine or store defaults.
    pub(crate) fn unset_attributes(&self) -> Vec<Arc<str>> {
        let inner = self.inner.borrow();
        inner
            .schema
            .attributes()
            .iter()
            .filter(|def| !inner.values.contains_key(&def.name))
            .map(|def| def.name.clone())
            .collect()
    }

    /// Reset every relation view to its bound-host default.
    pub(crate) fn clear_relation_views(&self) {
        let mut inner = self.inner.borrow_mut();
        for state in inner.relations.values_mut() {
            *state = RelationState::Unresolved;
        }
    }
}

// ===== Serialization =====

/// Nested include/exclude contract for [`Entity::serialize`].
#[derive(Debug, Clone, Default)]
pub struct SerializeOptions {
    include: HashMap<String, SerializeOptions>,
    exclude: HashSet<String>,
}

impl SerializeOptions {
    /// No includes, no excludes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the named relation, serialized with `options`.
    #[must_use]
    pub fn include(mut self, relation: impl Into<String>, options: SerializeOptions) -> Self {
        self.include.insert(relation.into(), options);
        self
    }

    /// Omit the named attribute.
    #[must_use]
    pub fn exclude(mut self, attribute: impl Into<String>) -> Self {
        self.exclude.insert(attribute.into());
        self
    }

    pub(crate) fn includes(&self) -> impl Iterator<Item = (&str, &SerializeOptions)> {
        self.include.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Entity {
    /// Serialize to JSON, including requested relations.
    ///
    /// Synchronous: fails with [`Error::ModelState`] when an included
    /// relation is unresolved. Use the session's serializing variant to
    /// resolve on demand.
    pub fn serialize(&self, options: &SerializeOptions) -> Result<serde_json::Value> {
        let schema = self.schema();
        let mut map = serde_json::Map::new();
        {
            let inner = self.inner.borrow();
            for def in schema.attributes() {
                if options.exclude.contains(&*def.name) {
                    continue;
                }
                let value = inner.values.get(&def.name).cloned().unwrap_or(Value::Null);
                map.insert(def.name.to_string(), def.ty.to_json(&value));
            }
        }
        for (name, nested) in options.includes() {
            if schema.relation(name).is_none() {
                return Err(Error::schema(format!(
                    "unknown relation '{name}' on '{}'",
                    schema.collection()
                )));
            }
            let rendered = match self.relation_state(name) {
                RelationState::Unresolved => return Err(unresolved(name)),
                RelationState::One(None) => serde_json::Value::Null,
                RelationState::One(Some(target)) => target.serialize(nested)?,
                RelationState::Many(members) => serde_json::Value::Array(
                    members
                        .iter()
                        .map(|m| m.serialize(nested))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            map.insert(name.to_string(), rendered);
        }
        Ok(serde_json::Value::Object(map))
    }
}

fn unknown_attribute(schema: &Schema, name: &str) -> Error {
    Error::schema(format!(
        "unknown attribute '{name}' on '{}'",
        schema.collection()
    ))
}

fn write_locked(schema: &Schema) -> Error {
    Error::model_state(format!(
        "'{}' entity is deleted and write-locked",
        schema.collection()
    ))
}

fn unresolved(name: &str) -> Error {
    Error::model_state(format!(
        "relation '{name}' is not resolved; load it through the session first"
    ))
}
