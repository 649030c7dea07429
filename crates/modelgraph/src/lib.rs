//! Modelgraph - Provenance-tracked metadata graph builder.
//!
//! This crate builds an in-memory graph of entity types, properties, and
//! relationships where every configured fact remembers which authority tier
//! (convention, data annotation, or explicit code) established it. The graph
//! is mutated through a single [`Model`] registry, dispatches events to a
//! convention sink after each committed change, and freezes into an
//! immutable shape via [`Model::finalize`].

pub mod annotations;
pub mod complex;
pub mod constraint;
pub mod conventions;
pub mod conversion;
pub mod entity;
pub mod error;
pub mod facet;
pub mod mapping;
pub mod model;
pub mod property;
pub mod source;
pub mod types;
pub mod value;

pub use annotations::{Annotation, AnnotationBag, AnnotationChange};
pub use complex::{ComplexProperty, ComplexType};
pub use constraint::{ForeignKey, Index, Key};
pub use conventions::{AnnotationTarget, ConventionSink, FinalizedConvention, ModelEvent};
pub use conversion::{ConversionFlags, ConversionResolution, MAX_RELATIONSHIP_CHAIN};
pub use entity::{EntityType, MemberKind, TypeBase};
pub use error::Error;
pub use facet::{
    ChangeTrackingStrategy, FacetKey, FacetMap, FacetValue, PropertyAccessMode, SaveBehavior,
    ValueComparer, ValueConverter, ValueGenerated,
};
pub use mapping::{
    ConstructorBinding, ConstructorBindingProvider, TypeMapping, TypeMappingProvider,
};
pub use model::{Model, TypePath};
pub use property::Property;
pub use source::ConfigurationSource;
pub use types::{MemberInfo, TypeRef};
pub use value::Value;
