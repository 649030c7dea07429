//! Type nodes.
//!
//! [`TypeBase`] is the behavior shared by every named, runtime-type-backed
//! node that owns members: a sorted map of scalar properties, a sorted map of
//! structured (complex) properties, ignored member names, annotations, and
//! per-type facet overrides. [`EntityType`] specializes it with registry
//! identity, single-parent inheritance, and the key/foreign-key/index
//! descriptors that guard member removal.
//!
//! Operations that need to see the whole graph (hierarchy collision checks,
//! base-type transitions, convention dispatch) live on the model; the
//! methods here validate node-local invariants only.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::annotations::{AnnotationBag, AnnotationChange};
use crate::complex::ComplexProperty;
use crate::constraint::{ForeignKey, Index, Key};
use crate::error::Error;
use crate::facet::{ChangeTrackingStrategy, FacetKey, FacetMap, FacetValue, PropertyAccessMode};
use crate::mapping::{ConstructorBinding, ConstructorBindingProvider};
use crate::property::Property;
use crate::source::ConfigurationSource;
use crate::types::TypeRef;
use crate::value::Value;

/// The kind of member occupying a name slot on a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// A scalar property.
    Scalar,
    /// A structured property.
    Complex,
}

/// Common state and behavior of entity types and complex types.
#[derive(Debug)]
pub struct TypeBase {
    name: String,
    clr_type: TypeRef,
    properties: BTreeMap<String, Property>,
    complex_properties: BTreeMap<String, ComplexProperty>,
    ignored_members: BTreeMap<String, ConfigurationSource>,
    annotations: AnnotationBag,
    facets: FacetMap,
}

impl TypeBase {
    pub(crate) fn new(name: String, clr_type: TypeRef) -> Self {
        Self {
            name,
            clr_type,
            properties: BTreeMap::new(),
            complex_properties: BTreeMap::new(),
            ignored_members: BTreeMap::new(),
            annotations: AnnotationBag::new(),
            facets: FacetMap::new(),
        }
    }

    /// The node's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing runtime type.
    pub fn clr_type(&self) -> &TypeRef {
        &self.clr_type
    }

    /// Find a declared scalar property.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub(crate) fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.get_mut(name)
    }

    /// Declared scalar properties, in name order.
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Find a declared structured property.
    pub fn complex_property(&self, name: &str) -> Option<&ComplexProperty> {
        self.complex_properties.get(name)
    }

    pub(crate) fn complex_property_mut(&mut self, name: &str) -> Option<&mut ComplexProperty> {
        self.complex_properties.get_mut(name)
    }

    /// Declared structured properties, in name order.
    pub fn complex_properties(&self) -> impl Iterator<Item = &ComplexProperty> {
        self.complex_properties.values()
    }

    /// The kind of the declared member with the given name, if any.
    pub fn declared_member(&self, name: &str) -> Option<MemberKind> {
        if self.properties.contains_key(name) {
            Some(MemberKind::Scalar)
        } else if self.complex_properties.contains_key(name) {
            Some(MemberKind::Complex)
        } else {
            None
        }
    }

    pub(crate) fn insert_property(&mut self, property: Property) {
        self.properties.insert(property.name().to_string(), property);
    }

    pub(crate) fn take_property(&mut self, name: &str) -> Option<Property> {
        self.properties.remove(name)
    }

    pub(crate) fn insert_complex_property(&mut self, property: ComplexProperty) {
        self.complex_properties
            .insert(property.name().to_string(), property);
    }

    pub(crate) fn take_complex_property(&mut self, name: &str) -> Option<ComplexProperty> {
        self.complex_properties.remove(name)
    }

    // --- ignored members ---

    /// The source that ignored a member name, if it is ignored.
    pub fn ignored_source(&self, name: &str) -> Option<ConfigurationSource> {
        self.ignored_members.get(name).copied()
    }

    /// Whether the member name is ignored on this node.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored_members.contains_key(name)
    }

    pub(crate) fn ignore_member(&mut self, name: String, source: ConfigurationSource) {
        let combined = source.max(self.ignored_source(&name));
        self.ignored_members.insert(name, combined);
    }

    pub(crate) fn unignore_member(&mut self, name: &str, source: ConfigurationSource) -> bool {
        if !source.overrides(self.ignored_source(name)) {
            return false;
        }
        self.ignored_members.remove(name);
        true
    }

    // --- annotations and per-type facets ---

    /// The node's annotation bag.
    pub fn annotations(&self) -> &AnnotationBag {
        &self.annotations
    }

    pub(crate) fn set_annotation(
        &mut self,
        name: impl Into<String>,
        value: Option<Value>,
        source: ConfigurationSource,
    ) -> Option<AnnotationChange> {
        self.annotations.set_or_remove(name, value, source)
    }

    /// The change-tracking strategy override on this node, if configured.
    pub fn change_tracking(&self) -> Option<ChangeTrackingStrategy> {
        match self.facets.get(FacetKey::ChangeTracking) {
            Some(FacetValue::Tracking(v)) => Some(*v),
            _ => None,
        }
    }

    /// Check whether `source` may set the change-tracking override.
    pub fn can_set_change_tracking(
        &self,
        value: ChangeTrackingStrategy,
        source: ConfigurationSource,
    ) -> bool {
        self.facets
            .can_set(FacetKey::ChangeTracking, &FacetValue::Tracking(value), source)
    }

    pub(crate) fn set_change_tracking(
        &mut self,
        value: ChangeTrackingStrategy,
        source: ConfigurationSource,
    ) -> Option<ChangeTrackingStrategy> {
        self.facets
            .set(FacetKey::ChangeTracking, FacetValue::Tracking(value), source)
            .map(|_| value)
    }

    /// The property-access-mode override on this node, if configured.
    pub fn access_mode(&self) -> Option<PropertyAccessMode> {
        match self.facets.get(FacetKey::AccessMode) {
            Some(FacetValue::Access(v)) => Some(*v),
            _ => None,
        }
    }

    /// Check whether `source` may set the access-mode override.
    pub fn can_set_access_mode(
        &self,
        value: PropertyAccessMode,
        source: ConfigurationSource,
    ) -> bool {
        self.facets
            .can_set(FacetKey::AccessMode, &FacetValue::Access(value), source)
    }

    pub(crate) fn set_access_mode(
        &mut self,
        value: PropertyAccessMode,
        source: ConfigurationSource,
    ) -> Option<PropertyAccessMode> {
        self.facets
            .set(FacetKey::AccessMode, FacetValue::Access(value), source)
            .map(|_| value)
    }
}

/// A top-level addressable type node in the model registry.
#[derive(Debug)]
pub struct EntityType {
    type_base: TypeBase,
    shared_clr_type: bool,
    source: ConfigurationSource,
    base_type: Option<String>,
    base_type_source: Option<ConfigurationSource>,
    directly_derived: BTreeSet<String>,
    keys: Vec<Key>,
    foreign_keys: Vec<ForeignKey>,
    indexes: Vec<Index>,
    in_model: bool,
    constructor_binding: OnceLock<ConstructorBinding>,
}

impl EntityType {
    pub(crate) fn new(
        name: String,
        clr_type: TypeRef,
        shared_clr_type: bool,
        source: ConfigurationSource,
    ) -> Self {
        Self {
            type_base: TypeBase::new(name, clr_type),
            shared_clr_type,
            source,
            base_type: None,
            base_type_source: None,
            directly_derived: BTreeSet::new(),
            keys: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            in_model: true,
            constructor_binding: OnceLock::new(),
        }
    }

    /// The shared node state (members, annotations, per-type facets).
    pub fn type_base(&self) -> &TypeBase {
        &self.type_base
    }

    pub(crate) fn type_base_mut(&mut self) -> &mut TypeBase {
        &mut self.type_base
    }

    /// Registry name. Either the runtime type's display name or an explicit
    /// alias for shared-runtime-type instances.
    pub fn name(&self) -> &str {
        self.type_base.name()
    }

    /// The backing runtime type.
    pub fn clr_type(&self) -> &TypeRef {
        self.type_base.clr_type()
    }

    /// Whether this instance shares its runtime type with other instances.
    pub fn has_shared_clr_type(&self) -> bool {
        self.shared_clr_type
    }

    /// The source that established the entity type.
    pub fn source(&self) -> ConfigurationSource {
        self.source
    }

    pub(crate) fn update_source(&mut self, source: ConfigurationSource) {
        self.source = source.max(Some(self.source));
    }

    /// Whether the node is still attached to its model.
    pub fn is_in_model(&self) -> bool {
        self.in_model
    }

    pub(crate) fn mark_removed(&mut self) {
        self.in_model = false;
    }

    /// Name of the direct base type, if any.
    pub fn base_type(&self) -> Option<&str> {
        self.base_type.as_deref()
    }

    /// The source that established the base-type fact.
    pub fn base_type_source(&self) -> Option<ConfigurationSource> {
        self.base_type_source
    }

    pub(crate) fn set_base_type_raw(
        &mut self,
        base: Option<String>,
        source: ConfigurationSource,
    ) {
        self.base_type = base;
        self.base_type_source = Some(source.max(self.base_type_source));
    }

    /// Names of directly derived types, in order.
    pub fn directly_derived(&self) -> impl Iterator<Item = &str> {
        self.directly_derived.iter().map(|s| s.as_str())
    }

    pub(crate) fn add_derived(&mut self, name: String) {
        self.directly_derived.insert(name);
    }

    pub(crate) fn remove_derived(&mut self, name: &str) {
        self.directly_derived.remove(name);
    }

    /// Find a declared scalar property.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.type_base.property(name)
    }

    /// Declared scalar properties, in name order.
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.type_base.properties()
    }

    /// Find a declared structured property.
    pub fn complex_property(&self, name: &str) -> Option<&ComplexProperty> {
        self.type_base.complex_property(name)
    }

    /// Declared structured properties, in name order.
    pub fn complex_properties(&self) -> impl Iterator<Item = &ComplexProperty> {
        self.type_base.complex_properties()
    }

    // --- keys ---

    /// Declared keys.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Declare a key over the given properties.
    ///
    /// Derived types cannot declare keys; key properties must be declared on
    /// this type and be non-nullable.
    pub(crate) fn add_key(
        &mut self,
        properties: Vec<String>,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        if self.base_type.is_some() {
            return Err(Error::DerivedEntityCannotHaveKeys(self.name().to_string()));
        }
        for name in &properties {
            let property = self.type_base.property(name).ok_or_else(|| {
                Error::PropertyNotFound {
                    property: name.clone(),
                    declaring_type: self.name().to_string(),
                }
            })?;
            if property.is_nullable() {
                return Err(Error::KeyOnNullableProperty {
                    property: name.clone(),
                    entity: self.name().to_string(),
                });
            }
        }
        if self.keys.iter().any(|k| k.properties == properties) {
            return Err(Error::DuplicateKey(properties, self.name().to_string()));
        }
        self.keys.push(Key::new(properties, source));
        Ok(())
    }

    /// Remove the key with exactly the given property list.
    pub(crate) fn remove_key(&mut self, properties: &[String]) -> Option<Key> {
        let position = self.keys.iter().position(|k| k.properties == properties)?;
        Some(self.keys.remove(position))
    }

    /// Keys containing the given property.
    pub fn keys_containing(&self, property: &str) -> Vec<&Key> {
        self.keys.iter().filter(|k| k.contains(property)).collect()
    }

    // --- foreign keys ---

    /// Declared foreign keys.
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub(crate) fn add_foreign_key_raw(&mut self, foreign_key: ForeignKey) {
        self.foreign_keys.push(foreign_key);
    }

    /// Remove the foreign key with exactly the given dependent property list
    /// and principal.
    pub(crate) fn remove_foreign_key(
        &mut self,
        properties: &[String],
        principal_entity: &str,
    ) -> Option<ForeignKey> {
        let position = self.foreign_keys.iter().position(|fk| {
            fk.properties == properties && fk.principal_entity == principal_entity
        })?;
        Some(self.foreign_keys.remove(position))
    }

    /// Foreign keys containing the given dependent property.
    pub fn foreign_keys_containing(&self, property: &str) -> Vec<&ForeignKey> {
        self.foreign_keys
            .iter()
            .filter(|fk| fk.contains(property))
            .collect()
    }

    // --- indexes ---

    /// Declared indexes.
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Declare an index over the given properties.
    pub(crate) fn add_index(
        &mut self,
        properties: Vec<String>,
        unique: bool,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        for name in &properties {
            if self.type_base.property(name).is_none() {
                return Err(Error::PropertyNotFound {
                    property: name.clone(),
                    declaring_type: self.name().to_string(),
                });
            }
        }
        self.indexes.push(Index::new(properties, unique, source));
        Ok(())
    }

    /// Remove the index with exactly the given property list.
    pub(crate) fn remove_index(&mut self, properties: &[String]) -> Option<Index> {
        let position = self
            .indexes
            .iter()
            .position(|i| i.properties == properties)?;
        Some(self.indexes.remove(position))
    }

    /// Reject removal while the property backs a key, foreign key, or index.
    pub(crate) fn check_property_not_in_use(&self, property: &str) -> Result<(), Error> {
        if let Some(key) = self.keys.iter().find(|k| k.contains(property)) {
            return Err(Error::PropertyInUseByKey {
                property: property.to_string(),
                entity: self.name().to_string(),
                key_properties: key.properties.clone(),
            });
        }
        if let Some(fk) = self.foreign_keys.iter().find(|fk| fk.contains(property)) {
            return Err(Error::PropertyInUseByForeignKey {
                property: property.to_string(),
                entity: self.name().to_string(),
                foreign_key_properties: fk.properties.clone(),
            });
        }
        if let Some(index) = self.indexes.iter().find(|i| i.contains(property)) {
            return Err(Error::PropertyInUseByIndex {
                property: property.to_string(),
                entity: self.name().to_string(),
                index_properties: index.properties.clone(),
            });
        }
        Ok(())
    }

    /// The constructor binding for this type, resolved lazily through the
    /// provider once the model is frozen. Publish-once.
    pub fn constructor_binding(&self, provider: &dyn ConstructorBindingProvider) -> &ConstructorBinding {
        self.constructor_binding
            .get_or_init(|| provider.bind(self.clr_type()))
    }
}
