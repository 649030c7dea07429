//! Convention dispatch.
//!
//! Every structural mutation of the model enqueues a [`ModelEvent`]. Events
//! drain through the model's installed [`ConventionSink`] after the mutation
//! that produced them returns, so sink callbacks always observe a consistent
//! graph and may mutate it further; mutations made from inside a callback
//! enqueue their own events, which drain in the same pass.
//!
//! [`FinalizedConvention`]s run exactly once, against the frozen graph, at
//! the end of finalization.

use crate::annotations::AnnotationChange;
use crate::facet::FacetKey;
use crate::model::{Model, TypePath};

/// What a changed annotation was attached to.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationTarget {
    /// The model root.
    Model,
    /// A type node.
    Type(TypePath),
    /// A scalar property.
    Property {
        /// The declaring type node.
        type_path: TypePath,
        /// Property name.
        property: String,
    },
}

/// A structural change to the model graph.
///
/// Nodes are addressed by name so events stay valid after further mutation;
/// a sink looks the current node up and finds nothing if it is already gone.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// An entity type was added to the registry.
    EntityTypeAdded {
        /// Registry name.
        entity: String,
    },
    /// An entity type was removed from the registry.
    EntityTypeRemoved {
        /// Registry name.
        entity: String,
    },
    /// An entity type's base type changed.
    BaseTypeChanged {
        /// The type whose base changed.
        entity: String,
        /// Previous base, if any.
        old: Option<String>,
        /// New base, if any.
        new: Option<String>,
    },
    /// A scalar property was declared.
    PropertyAdded {
        /// Declaring type node.
        type_path: TypePath,
        /// Property name.
        property: String,
    },
    /// A scalar property was removed.
    PropertyRemoved {
        /// Declaring type node.
        type_path: TypePath,
        /// Property name.
        property: String,
    },
    /// A structured property was declared.
    ComplexPropertyAdded {
        /// Declaring type node.
        type_path: TypePath,
        /// Property name.
        property: String,
    },
    /// A structured property was removed.
    ComplexPropertyRemoved {
        /// Declaring type node.
        type_path: TypePath,
        /// Property name.
        property: String,
    },
    /// A facet changed on a scalar property.
    PropertyFacetChanged {
        /// Declaring type node.
        type_path: TypePath,
        /// Property name.
        property: String,
        /// The facet that changed.
        facet: FacetKey,
    },
    /// A facet override changed on a type node.
    TypeFacetChanged {
        /// The type node.
        type_path: TypePath,
        /// The facet that changed.
        facet: FacetKey,
    },
    /// A model-wide facet default changed.
    ModelFacetChanged {
        /// The facet that changed.
        facet: FacetKey,
    },
    /// An annotation was set, replaced, or removed.
    AnnotationChanged {
        /// What the annotation is attached to.
        target: AnnotationTarget,
        /// Name with old and new values.
        change: AnnotationChange,
    },
    /// A key was declared.
    KeyAdded {
        /// Declaring entity type.
        entity: String,
        /// Key properties.
        properties: Vec<String>,
    },
    /// A key was removed.
    KeyRemoved {
        /// Declaring entity type.
        entity: String,
        /// Key properties.
        properties: Vec<String>,
    },
    /// A foreign key was declared.
    ForeignKeyAdded {
        /// Dependent entity type.
        entity: String,
        /// Dependent properties.
        properties: Vec<String>,
        /// Principal entity type.
        principal: String,
    },
    /// A foreign key was removed.
    ForeignKeyRemoved {
        /// Dependent entity type.
        entity: String,
        /// Dependent properties.
        properties: Vec<String>,
        /// Principal entity type.
        principal: String,
    },
    /// An index was declared.
    IndexAdded {
        /// Declaring entity type.
        entity: String,
        /// Indexed properties.
        properties: Vec<String>,
    },
    /// An index was removed.
    IndexRemoved {
        /// Declaring entity type.
        entity: String,
        /// Indexed properties.
        properties: Vec<String>,
    },
    /// A member name was ignored on a type node.
    MemberIgnored {
        /// The type node.
        type_path: TypePath,
        /// The ignored member name.
        member: String,
    },
    /// A type name was ignored model-wide.
    TypeIgnored {
        /// The ignored type name.
        name: String,
    },
    /// A member name stopped being ignored on a type node.
    MemberUnignored {
        /// The type node.
        type_path: TypePath,
        /// The member name.
        member: String,
    },
    /// A type name stopped being ignored model-wide.
    TypeUnignored {
        /// The type name.
        name: String,
    },
    /// A runtime type was registered as shareable across entity types.
    SharedTypeMarked {
        /// The runtime type name.
        clr_type: String,
    },
    /// The owned marker was set or cleared for a runtime type.
    OwnedMarkerChanged {
        /// The runtime type name.
        clr_type: String,
        /// Whether the type is now marked owned.
        marked: bool,
    },
    /// The complex marker was set or cleared for a runtime type.
    ComplexMarkerChanged {
        /// The runtime type name.
        clr_type: String,
        /// Whether the type is now marked complex.
        marked: bool,
    },
}

/// Receives model events and reacts by further configuring the model.
///
/// The sink is detached from the model while it runs, so callbacks get a
/// `&mut Model` without aliasing it.
pub trait ConventionSink: Send + Sync {
    /// React to a single drained event.
    fn on_event(&self, model: &mut Model, event: &ModelEvent);

    /// Last chance to mutate the model before it freezes.
    fn on_model_finalizing(&self, model: &mut Model) {
        let _ = model;
    }
}

impl<T: ConventionSink + ?Sized> ConventionSink for std::sync::Arc<T> {
    fn on_event(&self, model: &mut Model, event: &ModelEvent) {
        (**self).on_event(model, event);
    }

    fn on_model_finalizing(&self, model: &mut Model) {
        (**self).on_model_finalizing(model);
    }
}

/// A one-shot pass over the frozen model, run at the end of finalization.
pub trait FinalizedConvention: Send + Sync {
    /// Inspect the finalized model.
    fn process(&self, model: &Model);
}
