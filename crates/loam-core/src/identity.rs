//! Attribute identities: the unit used for cross-collection references.

use std::fmt;
use std::sync::Arc;

/// A named attribute on a specific collection.
///
/// This is how one schema refers to an attribute of another, most notably
/// as the destination of a foreign key. Identities are cheap to clone and
/// compare by `(collection, attribute)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeIdentity {
    /// The collection the attribute belongs to.
    pub collection: Arc<str>,
    /// The attribute name within that collection.
    pub attribute: Arc<str>,
}

impl AttributeIdentity {
    /// Create an identity for `collection.attribute`.
    pub fn new(collection: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            collection: Arc::from(collection.into()),
            attribute: Arc::from(attribute.into()),
        }
    }
}

impl fmt::Display for AttributeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality_and_display() {
        let a = AttributeIdentity::new("types", "id");
        let b = AttributeIdentity::new("types", "id");
        let c = AttributeIdentity::new("types", "name");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "types.id");
    }
}
