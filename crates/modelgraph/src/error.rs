//! Core error types.
//!
//! Two tiers of failure exist in the graph. Domain-invariant violations
//! (duplicate names, cycles, out-of-range facets, removal of referenced
//! nodes) are always hard errors regardless of configuration source.
//! Authority conflicts, where a weaker source tries to overwrite a stronger
//! fact, are silent rejections surfaced as `Ok(None)` from setters and never
//! reach this enum unless the requester asserted explicit authority.

use thiserror::Error;

/// Metadata graph errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The model has been finalized and no longer accepts mutations.
    #[error("model is read-only: it has been finalized")]
    ModelReadOnly,

    /// An entity type with the same name is already registered.
    #[error("entity type '{0}' is already registered")]
    DuplicateEntityType(String),

    /// A non-shared entity type already uses the runtime type.
    #[error("cannot use runtime type '{clr_type}' for shared entity type '{entity}': a non-shared entity type with that runtime type exists")]
    ClashingNonSharedType {
        /// Name of the shared entity type being added.
        entity: String,
        /// The contested runtime type.
        clr_type: String,
    },

    /// The runtime type is registered as shared.
    #[error("cannot add non-shared entity type '{entity}': runtime type '{clr_type}' is registered as shared")]
    ClashingSharedType {
        /// Name of the entity type being added.
        entity: String,
        /// The contested runtime type.
        clr_type: String,
    },

    /// No entity type with the given name is in the model.
    #[error("entity type '{0}' is not in the model")]
    EntityTypeNotFound(String),

    /// The addressed type node does not exist.
    #[error("type '{0}' is not in the model")]
    TypeNotFound(String),

    /// No property with the given name is declared on the type.
    #[error("property '{property}' is not declared on type '{declaring_type}'")]
    PropertyNotFound {
        /// Property name.
        property: String,
        /// The type that was searched.
        declaring_type: String,
    },

    /// The member name is already used in the type's hierarchy.
    #[error("cannot add member '{name}' to '{entity}': a member with that name is declared on '{conflicting_type}'")]
    ConflictingMember {
        /// The candidate member name.
        name: String,
        /// The type the member was being added to.
        entity: String,
        /// The type already declaring a member with that name.
        conflicting_type: String,
    },

    /// The backing member's simple name does not match the requested name.
    #[error("property '{property}' on '{entity}' cannot be bound to member '{member}': names differ")]
    MemberWrongName {
        /// Requested property name.
        property: String,
        /// Owning entity type.
        entity: String,
        /// The backing member's simple name.
        member: String,
    },

    /// The backing member is not declared on or inherited by the owning type.
    #[error("member '{member}' is not declared on runtime type '{clr_type}' of entity type '{entity}'")]
    MemberNotOnType {
        /// The backing member name.
        member: String,
        /// Owning entity type.
        entity: String,
        /// The owning runtime type.
        clr_type: String,
    },

    /// The declared property type disagrees with the backing member's type.
    #[error("property '{property}' on '{entity}' was declared as '{declared}' but its backing member is '{actual}'")]
    MemberWrongType {
        /// Property name.
        property: String,
        /// Owning entity type.
        entity: String,
        /// The declared property type.
        declared: String,
        /// The backing member's type.
        actual: String,
    },

    /// The new base type's runtime type is not assignable from this type.
    #[error("type '{base_clr}' of '{base}' is not assignable from type '{derived_clr}' of '{derived}'")]
    NotAssignableBaseType {
        /// The type whose base was being set.
        derived: String,
        /// Its runtime type.
        derived_clr: String,
        /// The candidate base entity type.
        base: String,
        /// The candidate base's runtime type.
        base_clr: String,
    },

    /// Setting the base type would make a type its own ancestor.
    #[error("setting base type of '{entity}' to '{base}' would create a circular inheritance chain")]
    CircularInheritance {
        /// The type whose base was being set.
        entity: String,
        /// The candidate base.
        base: String,
    },

    /// A derived entity type cannot declare its own keys.
    #[error("entity type '{0}' cannot declare a key because it has a base type")]
    DerivedEntityCannotHaveKeys(String),

    /// Members on the new base collide with members in this hierarchy.
    #[error("cannot set base type of '{entity}' to '{base}': member '{member}' declared on '{base_declaring}' collides with the member declared on '{derived_declaring}'")]
    DuplicateMembersOnBase {
        /// The type whose base was being set.
        entity: String,
        /// The candidate base.
        base: String,
        /// The colliding member name.
        member: String,
        /// The declaring type on the base side.
        base_declaring: String,
        /// The declaring type on the derived side.
        derived_declaring: String,
    },

    /// The entity type is still the principal of a foreign key.
    #[error("entity type '{entity}' cannot be removed: it is referenced by the foreign key on {properties:?} of '{dependent}'")]
    EntityInUseByForeignKey {
        /// The entity being removed.
        entity: String,
        /// The dependent entity declaring the foreign key.
        dependent: String,
        /// The foreign key's properties.
        properties: Vec<String>,
    },

    /// The entity type still has derived types.
    #[error("entity type '{entity}' cannot be removed: '{derived}' derives from it")]
    EntityInUseByDerived {
        /// The entity being removed.
        entity: String,
        /// A directly derived type.
        derived: String,
    },

    /// The property is part of a key.
    #[error("property '{property}' on '{entity}' cannot be removed: it is used in the key on {key_properties:?}")]
    PropertyInUseByKey {
        /// Property name.
        property: String,
        /// Declaring entity type.
        entity: String,
        /// Properties of the containing key.
        key_properties: Vec<String>,
    },

    /// The property is part of a foreign key.
    #[error("property '{property}' on '{entity}' cannot be removed: it is used in the foreign key on {foreign_key_properties:?}")]
    PropertyInUseByForeignKey {
        /// Property name.
        property: String,
        /// Declaring entity type.
        entity: String,
        /// Properties of the containing foreign key.
        foreign_key_properties: Vec<String>,
    },

    /// The property is part of an index.
    #[error("property '{property}' on '{entity}' cannot be removed: it is used in the index on {index_properties:?}")]
    PropertyInUseByIndex {
        /// Property name.
        property: String,
        /// Declaring entity type.
        entity: String,
        /// Properties of the containing index.
        index_properties: Vec<String>,
    },

    /// A key with the same property list already exists.
    #[error("a key on {0:?} is already defined on entity type '{1}'")]
    DuplicateKey(Vec<String>, String),

    /// Keys cannot contain nullable properties.
    #[error("property '{property}' on '{entity}' cannot be part of a key because it is nullable")]
    KeyOnNullableProperty {
        /// Property name.
        property: String,
        /// Declaring entity type.
        entity: String,
    },

    /// The property participates in a key and cannot be made nullable.
    #[error("property '{property}' on '{entity}' cannot be made nullable: it is part of a key")]
    NullableKeyProperty {
        /// Property name.
        property: String,
        /// Declaring entity type.
        entity: String,
    },

    /// The property's runtime type cannot hold null.
    #[error("property '{property}' on '{entity}' of type '{clr_type}' cannot be made nullable")]
    CannotBeNullable {
        /// Property name.
        property: String,
        /// Declaring type.
        entity: String,
        /// The property's runtime type.
        clr_type: String,
    },

    /// A numeric facet was given a value outside its domain.
    #[error("invalid value {value} for {facet}: {requirement}")]
    FacetOutOfRange {
        /// The facet being set.
        facet: String,
        /// The rejected value.
        value: i64,
        /// Human-readable domain requirement.
        requirement: &'static str,
    },

    /// A facet was given a payload of the wrong kind.
    #[error("facet {facet} cannot hold {given}")]
    FacetWrongKind {
        /// The facet being set.
        facet: String,
        /// Description of the rejected payload.
        given: String,
    },

    /// The sentinel value is not assignable to the property's type.
    #[error("sentinel {value:?} is not assignable to type '{clr_type}' of property '{property}'")]
    SentinelTypeMismatch {
        /// Property name.
        property: String,
        /// The property's runtime type.
        clr_type: String,
        /// The rejected sentinel.
        value: crate::value::Value,
    },

    /// The converter's model side does not match the property's type.
    #[error("converter '{converter}' converts from '{converter_model_type}' and cannot be used on property '{property}' of type '{clr_type}'")]
    ConverterTypeMismatch {
        /// Property name.
        property: String,
        /// The property's runtime type.
        clr_type: String,
        /// Converter identity.
        converter: String,
        /// The converter's model-side type.
        converter_model_type: String,
    },

    /// A property was declared with neither a runtime type nor a backing
    /// member to take one from.
    #[error("property '{property}' on '{entity}' has no runtime type and no backing member")]
    PropertyNoType {
        /// Property name.
        property: String,
        /// Declaring type.
        entity: String,
    },

    /// The foreign key's dependent and principal property lists differ in length.
    #[error("foreign key on '{entity}' maps {dependent_count} properties to {principal_count} principal properties")]
    ForeignKeyCountMismatch {
        /// Dependent entity type.
        entity: String,
        /// Number of dependent properties.
        dependent_count: usize,
        /// Number of principal properties.
        principal_count: usize,
    },

    /// The relationship graph walk exceeded its bound.
    #[error("relationship chain starting at property '{property}' on '{entity}' exceeds {limit} links; the relationship graph contains a cycle")]
    RelationshipCycle {
        /// Starting property.
        property: String,
        /// Starting entity type.
        entity: String,
        /// The chain-length bound.
        limit: usize,
    },

    /// Two linked properties carry conflicting conversion configuration.
    #[error("conflicting {facet} configuration between property '{property}' on '{entity}' and property '{other_property}' on '{other_entity}'")]
    ConversionConflict {
        /// The disagreeing facet.
        facet: String,
        /// First property.
        property: String,
        /// First property's entity.
        entity: String,
        /// Second property.
        other_property: String,
        /// Second property's entity.
        other_entity: String,
    },

    /// Two explicit configurations contradict each other.
    #[error("conflicting explicit configuration for {0}")]
    ConflictingConfiguration(String),
}
