//! Structured properties.
//!
//! A [`ComplexProperty`] embeds a structured value inside its declaring type.
//! It exclusively owns a [`ComplexType`], a type node with no registry
//! identity of its own: the nested type is named after its owner and is
//! removed with it. Complex types carry members like entity types but never
//! have a base type, keys, or relationships.

use crate::entity::TypeBase;
use crate::facet::{FacetKey, FacetMap, FacetValue};
use crate::source::ConfigurationSource;
use crate::types::TypeRef;

/// The type node owned by a structured property.
#[derive(Debug)]
pub struct ComplexType {
    type_base: TypeBase,
}

impl ComplexType {
    pub(crate) fn new(name: String, clr_type: TypeRef) -> Self {
        Self {
            type_base: TypeBase::new(name, clr_type),
        }
    }

    /// The shared node state (members, annotations, per-type facets).
    pub fn type_base(&self) -> &TypeBase {
        &self.type_base
    }

    pub(crate) fn type_base_mut(&mut self) -> &mut TypeBase {
        &mut self.type_base
    }

    /// Display name, derived from the owning property's path.
    pub fn name(&self) -> &str {
        self.type_base.name()
    }

    /// The backing runtime type.
    pub fn clr_type(&self) -> &TypeRef {
        self.type_base.clr_type()
    }
}

/// A member embedding a structured value in its declaring type.
#[derive(Debug)]
pub struct ComplexProperty {
    name: String,
    source: ConfigurationSource,
    facets: FacetMap,
    complex_type: ComplexType,
}

impl ComplexProperty {
    pub(crate) fn new(
        name: String,
        declaring_name: &str,
        clr_type: TypeRef,
        source: ConfigurationSource,
    ) -> Self {
        let type_name = format!("{declaring_name}.{name}");
        Self {
            name,
            source,
            facets: FacetMap::new(),
            complex_type: ComplexType::new(type_name, clr_type),
        }
    }

    /// The property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source that established the property.
    pub fn source(&self) -> ConfigurationSource {
        self.source
    }

    /// The owned nested type.
    pub fn complex_type(&self) -> &ComplexType {
        &self.complex_type
    }

    pub(crate) fn complex_type_mut(&mut self) -> &mut ComplexType {
        &mut self.complex_type
    }

    /// Whether the embedded value may be absent. Defaults to the runtime
    /// type's nullability.
    pub fn is_nullable(&self) -> bool {
        match self.facets.get(FacetKey::Nullable) {
            Some(FacetValue::Bool(v)) => *v,
            _ => self.complex_type.clr_type().is_nullable(),
        }
    }

    /// Check whether `source` may change nullability.
    pub fn can_set_nullable(&self, value: bool, source: ConfigurationSource) -> bool {
        self.facets
            .can_set(FacetKey::Nullable, &FacetValue::Bool(value), source)
    }

    pub(crate) fn set_nullable(
        &mut self,
        value: bool,
        source: ConfigurationSource,
    ) -> Option<bool> {
        self.facets
            .set(FacetKey::Nullable, FacetValue::Bool(value), source)
            .map(|_| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_type_named_after_owner() {
        let property = ComplexProperty::new(
            "ShippingAddress".into(),
            "Order",
            TypeRef::named("Address"),
            ConfigurationSource::Explicit,
        );
        assert_eq!(property.complex_type().name(), "Order.ShippingAddress");
        assert_eq!(property.complex_type().clr_type().name(), "Address");
    }

    #[test]
    fn test_nullability_defaults_to_runtime_type() {
        let reference = ComplexProperty::new(
            "Address".into(),
            "Customer",
            TypeRef::named("Address"),
            ConfigurationSource::Convention,
        );
        assert!(reference.is_nullable());

        let mut required = ComplexProperty::new(
            "Address".into(),
            "Customer",
            TypeRef::named("Address"),
            ConfigurationSource::Convention,
        );
        assert_eq!(
            required.set_nullable(false, ConfigurationSource::Explicit),
            Some(false)
        );
        assert!(!required.is_nullable());
        assert!(!required.can_set_nullable(true, ConfigurationSource::Convention));
        assert_eq!(required.set_nullable(true, ConfigurationSource::Convention), None);
    }
}
