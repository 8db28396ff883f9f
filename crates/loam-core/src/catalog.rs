//! The catalog: an explicit handle binding schemas into one model.
//!
//! A [`Catalog`] owns every schema participating in a model and derives the
//! relation descriptors between them. There is no global registry; sessions
//! receive a catalog handle and two catalogs never interact. Building the
//! catalog is where cross-collection validation happens, so a catalog that
//! builds successfully has fully-resolved, unambiguous relations.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::{Direction, RelationDef, RelationSide, Schema};

/// An immutable, cheaply-clonable set of schemas with derived relations.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    schemas: HashMap<Arc<str>, Arc<Schema>>,
}

impl Catalog {
    /// Start building a catalog.
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// The schema for `collection`, failing with [`Error::Schema`] when the
    /// catalog does not contain it.
    pub fn schema(&self, collection: &str) -> Result<Arc<Schema>> {
        self.schemas.get(collection).cloned().ok_or_else(|| {
            Error::schema(format!("catalog has no collection '{collection}'"))
        })
    }

    /// The schema for `collection`, if present.
    #[must_use]
    pub fn get(&self, collection: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(collection)
    }

    /// Names of all collections in the catalog.
    pub fn collections(&self) -> impl Iterator<Item = &Arc<str>> {
        self.schemas.keys()
    }

    /// Number of collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// True when the catalog holds no schemas.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Builder validating and cross-linking schemas into a [`Catalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    schemas: Vec<Schema>,
}

impl CatalogBuilder {
    /// Add a schema to the model.
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Validate every foreign key, derive the relation pairs, and produce
    /// the catalog.
    ///
    /// Each foreign key yields a one-side view on the keyed schema and a
    /// many-side view on the referenced schema. Default names: the one side
    /// takes the foreign-key attribute stripped of a trailing `_id`; the
    /// many side takes the keyed collection's name. The default many-side
    /// order is the keyed collection's primary key ascending.
    pub fn build(self) -> Result<Catalog> {
        let mut by_name: HashMap<Arc<str>, Schema> = HashMap::new();
        for schema in self.schemas {
            let name = schema.collection().clone();
            if by_name.insert(name.clone(), schema).is_some() {
                return Err(Error::schema(format!(
                    "catalog declares collection '{name}' more than once"
                )));
            }
        }

        let mut derived: HashMap<Arc<str>, Vec<RelationDef>> = HashMap::new();
        let mut sources: Vec<Arc<str>> = by_name.keys().cloned().collect();
        sources.sort();

        for source_name in &sources {
            let source = &by_name[source_name];
            for attr in source.attributes() {
                let Some(destination) = attr.ty.destination() else {
                    continue;
                };
                let Some(remote) = by_name.get(&*destination.collection) else {
                    return Err(Error::schema(format!(
                        "'{source_name}.{}' references unknown collection '{}'",
                        attr.name, destination.collection
                    )));
                };
                let Some(remote_attr) = remote.attribute(&destination.attribute) else {
                    return Err(Error::schema(format!(
                        "'{source_name}.{}' references unknown attribute '{destination}'",
                        attr.name
                    )));
                };
                if remote_attr.ty.kind() != attr.ty.kind() {
                    return Err(Error::schema(format!(
                        "'{source_name}.{}' is {} but '{destination}' is {}",
                        attr.name,
                        attr.ty.kind().expected_name(),
                        remote_attr.ty.kind().expected_name()
                    )));
                }

                let options = source
                    .relation_options
                    .iter()
                    .find(|(fk, _)| *fk == attr.name)
                    .map(|(_, o)| o.clone())
                    .unwrap_or_default();

                let one_name: Arc<str> = match options.one_name {
                    Some(name) => Arc::from(name),
                    None => Arc::from(
                        attr.name
                            .strip_suffix("_id")
                            .unwrap_or(&attr.name)
                            .to_string(),
                    ),
                };
                let many_name: Arc<str> = match options.many_name {
                    Some(name) => Arc::from(name),
                    None => source_name.clone(),
                };

                let order: Vec<(Arc<str>, Direction)> = match options.order {
                    Some(keys) => {
                        let mut resolved = Vec::with_capacity(keys.len());
                        for (key, direction) in keys {
                            if source.attribute(&key).is_none() {
                                return Err(Error::schema(format!(
                                    "relation order on '{source_name}.{}' names unknown attribute '{key}'",
                                    attr.name
                                )));
                            }
                            resolved.push((Arc::from(key), direction));
                        }
                        resolved
                    }
                    None => vec![(source.primary_key().name.clone(), Direction::Ascending)],
                };

                derived.entry(source_name.clone()).or_default().push(RelationDef {
                    name: one_name.clone(),
                    side: RelationSide::One,
                    foreign_key: attr.name.clone(),
                    remote_collection: destination.collection.clone(),
                    remote_relation: many_name.clone(),
                    order: Vec::new(),
                });
                derived
                    .entry(destination.collection.clone())
                    .or_default()
                    .push(RelationDef {
                        name: many_name,
                        side: RelationSide::Many,
                        foreign_key: attr.name.clone(),
                        remote_collection: source_name.clone(),
                        remote_relation: one_name,
                        order,
                    });
            }
        }

        for (collection, defs) in &derived {
            let schema = &by_name[collection];
            for (idx, def) in defs.iter().enumerate() {
                if defs.iter().skip(idx + 1).any(|other| other.name == def.name) {
                    return Err(Error::schema(format!(
                        "'{collection}' derives relation '{}' more than once; set explicit names",
                        def.name
                    )));
                }
                if schema.attribute(&def.name).is_some() {
                    return Err(Error::schema(format!(
                        "relation '{}' on '{collection}' collides with an attribute",
                        def.name
                    )));
                }
            }
        }

        let mut schemas = HashMap::with_capacity(by_name.len());
        for (name, mut schema) in by_name {
            if let Some(defs) = derived.remove(&name) {
                schema.set_relations(defs);
            }
            schemas.insert(name, Arc::new(schema));
        }
        tracing::debug!(collections = schemas.len(), "catalog built");
        Ok(Catalog { schemas })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AttributeIdentity;
    use crate::schema::{RelationOptions, SchemaBuilder};
    use crate::types::{AttributeKind, AttributeType};

    fn fish_schema() -> Schema {
        SchemaBuilder::new("fish")
            .attribute("id", AttributeType::new(AttributeKind::Uuid).primary_key(true))
            .attribute("name", AttributeType::new(AttributeKind::text()))
            .attribute(
                "type_id",
                AttributeType::new(AttributeKind::Uuid)
                    .nullable(true)
                    .references(AttributeIdentity::new("types", "id")),
            )
            .build()
            .unwrap()
    }

    fn types_schema() -> Schema {
        SchemaBuilder::new("types")
            .attribute("id", AttributeType::new(AttributeKind::Uuid).primary_key(true))
            .attribute("name", AttributeType::new(AttributeKind::text()))
            .build()
            .unwrap()
    }

    #[test]
    fn derives_paired_relations_with_default_names() {
        let catalog = Catalog::builder()
            .schema(fish_schema())
            .schema(types_schema())
            .build()
            .unwrap();

        let fish = catalog.schema("fish").unwrap();
        let one = fish.relation("type").unwrap();
        assert_eq!(one.side, RelationSide::One);
        assert_eq!(&*one.foreign_key, "type_id");
        assert_eq!(&*one.remote_collection, "types");
        assert_eq!(&*one.remote_relation, "fish");

        let types = catalog.schema("types").unwrap();
        let many = types.relation("fish").unwrap();
        assert_eq!(many.side, RelationSide::Many);
        assert_eq!(&*many.remote_relation, "type");
        assert_eq!(many.order.len(), 1);
        assert_eq!(&*many.order[0].0, "id");
        assert_eq!(many.order[0].1, Direction::Ascending);
    }

    #[test]
    fn name_overrides_and_explicit_order_apply() {
        let fish = SchemaBuilder::new("fish")
            .attribute("id", AttributeType::new(AttributeKind::Uuid).primary_key(true))
            .attribute("name", AttributeType::new(AttributeKind::text()))
            .attribute(
                "type_id",
                AttributeType::new(AttributeKind::Uuid)
                    .nullable(true)
                    .references(AttributeIdentity::new("types", "id")),
            )
            .relation(
                "type_id",
                RelationOptions {
                    one_name: Some("kind".to_string()),
                    many_name: Some("members".to_string()),
                    order: Some(vec![("name".to_string(), Direction::Descending)]),
                },
            )
            .build()
            .unwrap();
        let catalog = Catalog::builder()
            .schema(fish)
            .schema(types_schema())
            .build()
            .unwrap();

        let fish = catalog.schema("fish").unwrap();
        assert!(fish.relation("kind").is_some());
        assert!(fish.relation("type").is_none());
        let many = catalog.schema("types").unwrap().relation("members").cloned().unwrap();
        assert_eq!(&*many.order[0].0, "name");
        assert_eq!(many.order[0].1, Direction::Descending);
    }

    #[test]
    fn unknown_destination_fails() {
        let err = Catalog::builder().schema(fish_schema()).build().unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn kind_mismatch_fails() {
        let types = SchemaBuilder::new("types")
            .attribute("id", AttributeType::new(AttributeKind::Integer).primary_key(true))
            .build()
            .unwrap();
        let err = Catalog::builder()
            .schema(fish_schema())
            .schema(types)
            .build()
            .unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn relation_to_detects_ambiguity() {
        let pairs = SchemaBuilder::new("pairs")
            .attribute("id", AttributeType::new(AttributeKind::Uuid).primary_key(true))
            .attribute(
                "left_id",
                AttributeType::new(AttributeKind::Uuid)
                    .nullable(true)
                    .references(AttributeIdentity::new("types", "id")),
            )
            .attribute(
                "right_id",
                AttributeType::new(AttributeKind::Uuid)
                    .nullable(true)
                    .references(AttributeIdentity::new("types", "id")),
            )
            .relation(
                "left_id",
                RelationOptions {
                    many_name: Some("left_pairs".to_string()),
                    ..RelationOptions::default()
                },
            )
            .relation(
                "right_id",
                RelationOptions {
                    many_name: Some("right_pairs".to_string()),
                    ..RelationOptions::default()
                },
            )
            .build()
            .unwrap();
        let catalog = Catalog::builder()
            .schema(pairs)
            .schema(types_schema())
            .build()
            .unwrap();

        let pairs = catalog.schema("pairs").unwrap();
        assert!(pairs.relation_to("types").is_err());
        assert!(pairs.relation("left").is_some());
        assert!(pairs.relation("right").is_some());
    }
}
