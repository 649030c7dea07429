//! Keys, foreign keys, and indexes.
//!
//! These are the non-owning associative links of the graph: descriptors that
//! reference properties (and, for foreign keys, a principal entity type) by
//! name. They back the in-use guards for property and entity removal and the
//! conversion-chain walk.

use crate::source::ConfigurationSource;

/// A uniqueness key over one or more declared properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    /// Key properties, in order.
    pub properties: Vec<String>,
    /// How the key was established.
    pub source: ConfigurationSource,
}

impl Key {
    /// Create a key descriptor.
    pub fn new(properties: Vec<String>, source: ConfigurationSource) -> Self {
        Self { properties, source }
    }

    /// Whether the key contains the given property.
    pub fn contains(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }
}

/// A relationship from dependent properties to a principal entity type's
/// properties.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    /// Dependent-side properties, declared on the owning entity type.
    pub properties: Vec<String>,
    /// Name of the principal entity type.
    pub principal_entity: String,
    /// Principal-side properties, positionally matched to `properties`.
    pub principal_properties: Vec<String>,
    /// How the foreign key was established.
    pub source: ConfigurationSource,
}

impl ForeignKey {
    /// Create a foreign-key descriptor.
    pub fn new(
        properties: Vec<String>,
        principal_entity: impl Into<String>,
        principal_properties: Vec<String>,
        source: ConfigurationSource,
    ) -> Self {
        Self {
            properties,
            principal_entity: principal_entity.into(),
            principal_properties,
            source,
        }
    }

    /// Whether the dependent side contains the given property.
    pub fn contains(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    /// The principal-side counterpart of a dependent property, if it is part
    /// of this foreign key.
    pub fn principal_counterpart(&self, property: &str) -> Option<&str> {
        self.properties
            .iter()
            .position(|p| p == property)
            .map(|i| self.principal_properties[i].as_str())
    }
}

/// A lookup index over one or more declared properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    /// Indexed properties, in order.
    pub properties: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// How the index was established.
    pub source: ConfigurationSource,
}

impl Index {
    /// Create an index descriptor.
    pub fn new(properties: Vec<String>, unique: bool, source: ConfigurationSource) -> Self {
        Self {
            properties,
            unique,
            source,
        }
    }

    /// Whether the index contains the given property.
    pub fn contains(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_contains() {
        let key = Key::new(
            vec!["TenantId".into(), "Id".into()],
            ConfigurationSource::Explicit,
        );
        assert!(key.contains("Id"));
        assert!(key.contains("TenantId"));
        assert!(!key.contains("Name"));
    }

    #[test]
    fn test_principal_counterpart() {
        let fk = ForeignKey::new(
            vec!["OrderId".into(), "OrderVersion".into()],
            "Order",
            vec!["Id".into(), "Version".into()],
            ConfigurationSource::Convention,
        );
        assert_eq!(fk.principal_counterpart("OrderId"), Some("Id"));
        assert_eq!(fk.principal_counterpart("OrderVersion"), Some("Version"));
        assert_eq!(fk.principal_counterpart("Other"), None);
    }
}
