//! Generic facet storage.
//!
//! Nodes carry many independently settable facets (nullability, max length,
//! value generation, converters, ...), each paired with the configuration
//! source that established it. Instead of one field pair per facet, a node
//! holds a single ordered map of `(value, source)` entries with one gated
//! setter implementing the precedence contract for all of them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::source::ConfigurationSource;
use crate::types::TypeRef;
use crate::value::Value;

/// Identifies a facet slot on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FacetKey {
    /// Whether the property may hold null.
    Nullable,
    /// Whether the property is a concurrency token.
    ConcurrencyToken,
    /// When the store generates the property's value.
    ValueGenerated,
    /// Maximum length for string/binary data, `-1` for unbounded.
    MaxLength,
    /// Total number of digits for decimal data.
    Precision,
    /// Digits after the decimal point for decimal data.
    Scale,
    /// Whether string data is Unicode.
    Unicode,
    /// Save behavior before the record exists.
    BeforeSave,
    /// Save behavior after the record exists.
    AfterSave,
    /// The "unset" sentinel value.
    Sentinel,
    /// Registered value converter.
    Converter,
    /// Provider-side runtime type.
    ProviderType,
    /// Registered value comparer.
    Comparer,
    /// Provider-side value comparer.
    ProviderComparer,
    /// Backing-field binding.
    FieldBinding,
    /// Change-tracking strategy override.
    ChangeTracking,
    /// Property-access-mode override.
    AccessMode,
}

impl std::fmt::Display for FacetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FacetKey::Nullable => "nullable",
            FacetKey::ConcurrencyToken => "concurrency_token",
            FacetKey::ValueGenerated => "value_generated",
            FacetKey::MaxLength => "max_length",
            FacetKey::Precision => "precision",
            FacetKey::Scale => "scale",
            FacetKey::Unicode => "unicode",
            FacetKey::BeforeSave => "before_save",
            FacetKey::AfterSave => "after_save",
            FacetKey::Sentinel => "sentinel",
            FacetKey::Converter => "converter",
            FacetKey::ProviderType => "provider_type",
            FacetKey::Comparer => "comparer",
            FacetKey::ProviderComparer => "provider_comparer",
            FacetKey::FieldBinding => "field_binding",
            FacetKey::ChangeTracking => "change_tracking",
            FacetKey::AccessMode => "access_mode",
        };
        write!(f, "{name}")
    }
}

/// When the store generates a value for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueGenerated {
    /// Never generated.
    Never,
    /// Generated when the record is inserted.
    OnAdd,
    /// Generated when the record is updated.
    OnUpdate,
    /// Generated on insert and update.
    OnAddOrUpdate,
}

/// How a property value is treated when saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveBehavior {
    /// The value is sent to the store.
    Save,
    /// The value is ignored.
    Ignore,
    /// A set value is an error.
    Throw,
}

/// How changes to tracked objects are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeTrackingStrategy {
    /// Snapshot comparison.
    Snapshot,
    /// Objects notify after a change.
    ChangedNotifications,
    /// Objects notify before and after a change.
    ChangingAndChangedNotifications,
    /// Notifications plus original-value recording.
    ChangingAndChangedNotificationsWithOriginalValues,
}

/// How property values are read and written on materialized objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyAccessMode {
    /// Prefer the backing field, fall back to the property.
    PreferField,
    /// Always use the backing field.
    Field,
    /// Always use the property.
    Property,
}

/// A registered value conversion between a model type and a provider type.
///
/// This is a descriptor only: the executable conversion lives with the
/// type-mapping provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueConverter {
    /// Converter identity.
    pub name: String,
    /// The model-side type.
    pub model_type: TypeRef,
    /// The provider-side type.
    pub provider_type: TypeRef,
}

impl ValueConverter {
    /// Create a converter descriptor.
    pub fn new(name: impl Into<String>, model_type: TypeRef, provider_type: TypeRef) -> Self {
        Self {
            name: name.into(),
            model_type,
            provider_type,
        }
    }
}

/// A registered value comparer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueComparer {
    /// Comparer identity.
    pub name: String,
}

impl ValueComparer {
    /// Create a comparer descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A facet payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FacetValue {
    /// Boolean payload (nullable, concurrency token, unicode).
    Bool(bool),
    /// Integer payload (max length, precision, scale).
    Int(i64),
    /// Sentinel payload.
    Value(Value),
    /// Runtime-type payload (provider type).
    Type(TypeRef),
    /// Value-generation payload.
    Generated(ValueGenerated),
    /// Save-behavior payload.
    Save(SaveBehavior),
    /// Change-tracking payload.
    Tracking(ChangeTrackingStrategy),
    /// Access-mode payload.
    Access(PropertyAccessMode),
    /// Converter payload.
    Converter(ValueConverter),
    /// Comparer payload.
    Comparer(ValueComparer),
    /// Backing-field name payload.
    Field(String),
}

impl FacetValue {
    /// Short description of the payload kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FacetValue::Bool(_) => "a boolean",
            FacetValue::Int(_) => "an integer",
            FacetValue::Value(_) => "a value",
            FacetValue::Type(_) => "a runtime type",
            FacetValue::Generated(_) => "a value-generation strategy",
            FacetValue::Save(_) => "a save behavior",
            FacetValue::Tracking(_) => "a change-tracking strategy",
            FacetValue::Access(_) => "an access mode",
            FacetValue::Converter(_) => "a converter",
            FacetValue::Comparer(_) => "a comparer",
            FacetValue::Field(_) => "a field name",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Facet {
    value: FacetValue,
    source: ConfigurationSource,
}

/// An ordered map of facets with per-entry provenance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetMap {
    entries: BTreeMap<FacetKey, Facet>,
}

impl FacetMap {
    /// Create an empty facet map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a facet value.
    pub fn get(&self, key: FacetKey) -> Option<&FacetValue> {
        self.entries.get(&key).map(|f| &f.value)
    }

    /// Get the source that set a facet.
    pub fn source(&self, key: FacetKey) -> Option<ConfigurationSource> {
        self.entries.get(&key).map(|f| f.source)
    }

    /// Check whether `source` may set the facet to `value`.
    ///
    /// Pure predicate with no side effects, usable for dry-run validation.
    /// Re-asserting the current value is always allowed.
    pub fn can_set(&self, key: FacetKey, value: &FacetValue, source: ConfigurationSource) -> bool {
        source.overrides(self.source(key)) || self.get(key) == Some(value)
    }

    /// Set a facet, gated by source precedence.
    ///
    /// Returns the committed value on success, `None` on silent rejection.
    /// On commit the recorded source becomes the max of the requested and
    /// previous sources, so idempotent re-confirmation never downgrades
    /// provenance.
    pub fn set(
        &mut self,
        key: FacetKey,
        value: FacetValue,
        source: ConfigurationSource,
    ) -> Option<FacetValue> {
        if !self.can_set(key, &value, source) {
            return None;
        }
        let new_source = source.max(self.source(key));
        self.entries.insert(
            key,
            Facet {
                value: value.clone(),
                source: new_source,
            },
        );
        Some(value)
    }

    /// Unset a facet, gated by source precedence.
    ///
    /// Returns true when the slot is absent afterwards (including when it
    /// was never set); false when a stronger source holds it.
    pub fn unset(&mut self, key: FacetKey, source: ConfigurationSource) -> bool {
        if !source.overrides(self.source(key)) {
            return false;
        }
        self.entries.remove(&key);
        true
    }

    /// Merge another facet map into this one, keeping the stronger source
    /// for each slot. Used when attaching configuration to a new owner.
    pub fn merge_from(&mut self, other: &FacetMap) {
        for (key, facet) in &other.entries {
            self.set(*key, facet.value.clone(), facet.source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_source() {
        let mut facets = FacetMap::new();
        let committed = facets.set(
            FacetKey::MaxLength,
            FacetValue::Int(64),
            ConfigurationSource::DataAnnotation,
        );
        assert_eq!(committed, Some(FacetValue::Int(64)));
        assert_eq!(facets.get(FacetKey::MaxLength), Some(&FacetValue::Int(64)));
        assert_eq!(
            facets.source(FacetKey::MaxLength),
            Some(ConfigurationSource::DataAnnotation)
        );
    }

    #[test]
    fn test_authority_monotonicity() {
        let mut facets = FacetMap::new();
        facets.set(
            FacetKey::Unicode,
            FacetValue::Bool(true),
            ConfigurationSource::Explicit,
        );

        let rejected = facets.set(
            FacetKey::Unicode,
            FacetValue::Bool(false),
            ConfigurationSource::Convention,
        );
        assert!(rejected.is_none());
        assert_eq!(facets.get(FacetKey::Unicode), Some(&FacetValue::Bool(true)));
        assert_eq!(
            facets.source(FacetKey::Unicode),
            Some(ConfigurationSource::Explicit)
        );
    }

    #[test]
    fn test_idempotent_bypass() {
        let mut facets = FacetMap::new();
        facets.set(
            FacetKey::Unicode,
            FacetValue::Bool(true),
            ConfigurationSource::Explicit,
        );

        // Same value at the lowest source: accepted, provenance kept.
        let committed = facets.set(
            FacetKey::Unicode,
            FacetValue::Bool(true),
            ConfigurationSource::Convention,
        );
        assert!(committed.is_some());
        assert_eq!(
            facets.source(FacetKey::Unicode),
            Some(ConfigurationSource::Explicit)
        );
    }

    #[test]
    fn test_unset_gated() {
        let mut facets = FacetMap::new();
        facets.set(
            FacetKey::Precision,
            FacetValue::Int(10),
            ConfigurationSource::Explicit,
        );

        assert!(!facets.unset(FacetKey::Precision, ConfigurationSource::Convention));
        assert!(facets.get(FacetKey::Precision).is_some());

        assert!(facets.unset(FacetKey::Precision, ConfigurationSource::Explicit));
        assert!(facets.get(FacetKey::Precision).is_none());
        // Unsetting an absent slot is trivially allowed.
        assert!(facets.unset(FacetKey::Precision, ConfigurationSource::Convention));
    }

    #[test]
    fn test_merge_keeps_stronger() {
        let mut target = FacetMap::new();
        target.set(
            FacetKey::MaxLength,
            FacetValue::Int(32),
            ConfigurationSource::Explicit,
        );

        let mut incoming = FacetMap::new();
        incoming.set(
            FacetKey::MaxLength,
            FacetValue::Int(64),
            ConfigurationSource::Convention,
        );
        incoming.set(
            FacetKey::Unicode,
            FacetValue::Bool(false),
            ConfigurationSource::DataAnnotation,
        );

        target.merge_from(&incoming);
        assert_eq!(target.get(FacetKey::MaxLength), Some(&FacetValue::Int(32)));
        assert_eq!(target.get(FacetKey::Unicode), Some(&FacetValue::Bool(false)));
    }
}
