//! Type-mapping and constructor-binding provider contracts.
//!
//! Physical value representations are resolved by an external provider,
//! queried lazily once per frozen node. Providers must be pure functions of
//! the node's finalized facets: the first computed result is published and
//! reused for the node's lifetime.

use crate::facet::{FacetMap, ValueConverter};
use crate::types::TypeRef;

/// The resolved physical representation of a property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// The provider-side runtime type.
    pub provider_type: TypeRef,
    /// The conversion applied between model and provider values, if any.
    pub converter: Option<ValueConverter>,
}

/// Resolves physical value representations for properties.
pub trait TypeMappingProvider: Send + Sync {
    /// Map a model type with its finalized facets to a physical representation.
    fn map(&self, clr_type: &TypeRef, facets: &FacetMap) -> TypeMapping;
}

/// How instances of an entity's runtime type are constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorBinding {
    /// Constructor parameters bound to member names, in declaration order.
    pub parameter_names: Vec<String>,
}

/// Resolves constructor bindings for entity types.
pub trait ConstructorBindingProvider: Send + Sync {
    /// Choose a constructor binding for the given runtime type.
    fn bind(&self, clr_type: &TypeRef) -> ConstructorBinding;
}
