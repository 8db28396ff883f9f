//! Collection schemas: attribute layout, hooks, and relation descriptors.
//!
//! A [`Schema`] describes one collection: its attributes (each carrying an
//! [`AttributeType`]), exactly one primary key, optional before-set hooks,
//! and the relation descriptors derived for it by the catalog. Schemas are
//! immutable once the catalog is built and are shared behind `Arc`.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::AttributeType;
use crate::value::Value;

/// Sort direction for relation-view ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first, nulls first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Which end of a foreign-key coupling a relation descriptor names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationSide {
    /// The side holding the foreign key; views resolve to zero or one entity.
    One,
    /// The referenced side; views resolve to an ordered list of entities.
    Many,
}

/// A named attribute and its type contract.
#[derive(Debug, Clone)]
pub struct AttributeDef {
    /// Attribute name, unique within the schema.
    pub name: Arc<str>,
    /// The value contract.
    pub ty: AttributeType,
}

/// One derived relation view on a schema.
///
/// Every foreign key produces a pair of these: a [`RelationSide::One`]
/// descriptor on the keyed schema and a [`RelationSide::Many`] descriptor on
/// the referenced schema. `remote_relation` names the paired descriptor so
/// the engine can keep both views of a coupling consistent.
#[derive(Debug, Clone)]
pub struct RelationDef {
    /// View name, unique among the schema's relations and attributes.
    pub name: Arc<str>,
    /// Which end of the coupling this is.
    pub side: RelationSide,
    /// The foreign-key attribute (on this schema for `One`, on the remote
    /// schema for `Many`).
    pub foreign_key: Arc<str>,
    /// Collection on the other end.
    pub remote_collection: Arc<str>,
    /// Name of the paired descriptor on the remote schema.
    pub remote_relation: Arc<str>,
    /// Ordering applied to `Many` views, as `(member attribute, direction)`
    /// keys of decreasing significance. Empty for `One` views.
    pub order: Vec<(Arc<str>, Direction)>,
}

/// Naming and ordering overrides for the relation pair a foreign key derives.
#[derive(Debug, Clone, Default)]
pub struct RelationOptions {
    /// Name for the one-side view; defaults to the foreign-key attribute
    /// stripped of a trailing `_id`.
    pub one_name: Option<String>,
    /// Name for the many-side view; defaults to the keyed collection's name.
    pub many_name: Option<String>,
    /// Ordering for the many-side view over the keyed collection's
    /// attributes; defaults to its primary key ascending.
    pub order: Option<Vec<(String, Direction)>>,
}

/// Hook run before a public attribute write; may rewrite the value.
pub type BeforeSetHook = fn(attribute: &str, value: Value) -> Value;

/// The immutable description of one collection.
#[derive(Debug, Clone)]
pub struct Schema {
    collection: Arc<str>,
    attributes: Vec<AttributeDef>,
    primary_key: usize,
    before_set: Vec<BeforeSetHook>,
    relations: Vec<RelationDef>,
    pub(crate) relation_options: Vec<(Arc<str>, RelationOptions)>,
}

impl Schema {
    /// The collection name.
    #[must_use]
    pub fn collection(&self) -> &Arc<str> {
        &self.collection
    }

    /// All attributes in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    /// Look up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| &*a.name == name)
    }

    /// The primary-key attribute.
    #[must_use]
    pub fn primary_key(&self) -> &AttributeDef {
        &self.attributes[self.primary_key]
    }

    /// All relation descriptors derived for this schema.
    #[must_use]
    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Look up a relation view by name.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| &*r.name == name)
    }

    /// The one-side view derived from the given foreign-key attribute.
    #[must_use]
    pub fn relation_for_foreign_key(&self, foreign_key: &str) -> Option<&RelationDef> {
        self.relations
            .iter()
            .find(|r| r.side == RelationSide::One && &*r.foreign_key == foreign_key)
    }

    /// The single relation view pointing at `collection`.
    ///
    /// Fails with [`Error::Schema`] when no view or more than one view
    /// targets that collection; name the view explicitly in the latter case.
    pub fn relation_to(&self, collection: &str) -> Result<&RelationDef> {
        let mut found = None;
        for def in &self.relations {
            if &*def.remote_collection == collection {
                if found.is_some() {
                    return Err(Error::schema(format!(
                        "'{}' has multiple relations to '{collection}'; use the relation name",
                        self.collection
                    )));
                }
                found = Some(def);
            }
        }
        found.ok_or_else(|| {
            Error::schema(format!(
                "'{}' has no relation to '{collection}'",
                self.collection
            ))
        })
    }

    /// Run the before-set hooks over a public write, in registration order.
    #[must_use]
    pub fn apply_before_set(&self, attribute: &str, value: Value) -> Value {
        self.before_set
            .iter()
            .fold(value, |value, hook| hook(attribute, value))
    }

    pub(crate) fn set_relations(&mut self, relations: Vec<RelationDef>) {
        self.relations = relations;
    }
}

/// Builder for a [`Schema`].
///
/// ```
/// use loam_core::{AttributeKind, AttributeType, SchemaBuilder};
///
/// let schema = SchemaBuilder::new("fish")
///     .attribute("id", AttributeType::new(AttributeKind::Uuid).primary_key(true))
///     .attribute("name", AttributeType::new(AttributeKind::text()))
///     .build()
///     .unwrap();
/// assert_eq!(&*schema.primary_key().name, "id");
/// ```
#[derive(Debug)]
pub struct SchemaBuilder {
    collection: Arc<str>,
    attributes: Vec<AttributeDef>,
    before_set: Vec<BeforeSetHook>,
    relation_options: Vec<(Arc<str>, RelationOptions)>,
}

impl SchemaBuilder {
    /// Start a schema for the named collection.
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: Arc::from(collection.into()),
            attributes: Vec::new(),
            before_set: Vec::new(),
            relation_options: Vec::new(),
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        self.attributes.push(AttributeDef {
            name: Arc::from(name.into()),
            ty,
        });
        self
    }

    /// Override naming/ordering for the relation pair derived from the
    /// foreign key `foreign_key`. The attribute itself must be declared with
    /// [`AttributeType::references`].
    #[must_use]
    pub fn relation(mut self, foreign_key: impl Into<String>, options: RelationOptions) -> Self {
        self.relation_options
            .push((Arc::from(foreign_key.into()), options));
        self
    }

    /// Register a hook rewriting values on public writes.
    #[must_use]
    pub fn before_set(mut self, hook: BeforeSetHook) -> Self {
        self.before_set.push(hook);
        self
    }

    /// Finish the schema. Fails unless exactly one attribute is marked as
    /// the primary key, and on duplicate attribute names or relation options
    /// naming a non-foreign-key attribute.
    pub fn build(self) -> Result<Schema> {
        let mut primary_key = None;
        for (idx, def) in self.attributes.iter().enumerate() {
            if self
                .attributes
                .iter()
                .skip(idx + 1)
                .any(|other| other.name == def.name)
            {
                return Err(Error::schema(format!(
                    "'{}' declares attribute '{}' more than once",
                    self.collection, def.name
                )));
            }
            if def.ty.is_primary_key() {
                if primary_key.is_some() {
                    return Err(Error::schema(format!(
                        "'{}' declares more than one primary key",
                        self.collection
                    )));
                }
                primary_key = Some(idx);
            }
        }
        let Some(primary_key) = primary_key else {
            return Err(Error::schema(format!(
                "'{}' declares no primary key",
                self.collection
            )));
        };
        for (fk, _) in &self.relation_options {
            match self.attributes.iter().find(|a| a.name == *fk) {
                Some(def) if def.ty.is_foreign_key() => {}
                Some(_) => {
                    return Err(Error::schema(format!(
                        "relation options on '{}.{fk}' but the attribute is not a foreign key",
                        self.collection
                    )));
                }
                None => {
                    return Err(Error::schema(format!(
                        "relation options on unknown attribute '{}.{fk}'",
                        self.collection
                    )));
                }
            }
        }
        Ok(Schema {
            collection: self.collection,
            attributes: self.attributes,
            primary_key,
            before_set: self.before_set,
            relations: Vec::new(),
            relation_options: self.relation_options,
        })
    }
}
