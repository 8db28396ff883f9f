//! The session-scoped identity map.
//!
//! One in-memory entity per persisted row: the map is keyed by
//! `(collection, primary-key value)` and owns the guarantee that re-querying
//! a mapped row refreshes the existing instance instead of constructing a
//! second one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Weak;
use std::sync::Arc;

use loam_core::Value;

use crate::entity::Entity;

/// A [`Value`] wrapper usable as a hash-map key.
///
/// Floats hash by bit pattern and timestamps by microsecond tick, so any two
/// equal primary-key values land in the same bucket.
#[derive(Debug, Clone)]
pub(crate) struct ValueKey(pub(crate) Value);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Text(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Timestamp(ts) => {
                5u8.hash(state);
                ts.timestamp_micros().hash(state);
            }
        }
    }
}

/// The map itself. Lives behind `Rc<RefCell<…>>` on the session; entities
/// carry a weak handle to it for in-session lookups.
#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    map: HashMap<(Arc<str>, ValueKey), Entity>,
}

impl IdentityMap {
    pub(crate) fn get(&self, collection: &str, key: &Value) -> Option<Entity> {
        // Arc<str> keys hash like &str through Borrow, but the tuple key
        // does not, so probe with an owned key.
        let probe = (Arc::<str>::from(collection), ValueKey(key.clone()));
        self.map.get(&probe).cloned()
    }

    pub(crate) fn insert(&mut self, collection: Arc<str>, key: Value, entity: Entity) {
        self.map.insert((collection, ValueKey(key)), entity);
    }

    pub(crate) fn remove(&mut self, collection: &str, key: &Value) -> Option<Entity> {
        let probe = (Arc::<str>::from(collection), ValueKey(key.clone()));
        self.map.remove(&probe)
    }

    pub(crate) fn entities(&self) -> Vec<Entity> {
        self.map.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

/// The tag stamped onto entities owned by a session: the session id for
/// cross-session checks plus a weak handle to its identity map for
/// foreign-key reconciliation lookups.
#[derive(Debug, Clone)]
pub(crate) struct SessionTag {
    pub(crate) id: u64,
    pub(crate) identity: Weak<RefCell<IdentityMap>>,
}

impl SessionTag {
    /// Look up a mapped entity through the weak handle.
    pub(crate) fn lookup(&self, collection: &str, key: &Value) -> Option<Entity> {
        self.identity
            .upgrade()
            .and_then(|map| map.borrow().get(collection, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_keys_hash_and_compare_by_content() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ValueKey(Value::Float(1.5)));
        assert!(set.contains(&ValueKey(Value::Float(1.5))));
        assert!(!set.contains(&ValueKey(Value::Float(2.5))));
        set.insert(ValueKey(Value::Text("a".to_string())));
        assert!(set.contains(&ValueKey(Value::from("a"))));
    }
}
