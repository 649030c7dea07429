//! The model graph registry.
//!
//! [`Model`] exclusively owns every type node; type nodes exclusively own
//! their declared properties. Everything else (base types, derived sets,
//! key/foreign-key/index membership, the reverse property-by-runtime-type
//! index) is a name-keyed associative link maintained here. All mutation
//! flows through the model so that the read-only guard, collision checks,
//! and convention dispatch cannot be bypassed.
//!
//! The model is single-writer while building. The only concurrent accesses
//! supported before freezing are the lazily-memoized lookup caches, which
//! publish once and discard losing computations. After [`Model::finalize`]
//! the whole graph is immutable and safe to share.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::annotations::{AnnotationBag, AnnotationChange};
use crate::complex::ComplexProperty;
use crate::constraint::{ForeignKey, Index, Key};
use crate::conversion::{self, ConversionFlags, ConversionResolution};
use crate::conventions::{AnnotationTarget, ConventionSink, FinalizedConvention, ModelEvent};
use crate::entity::{EntityType, TypeBase};
use crate::error::Error;
use crate::facet::{
    ChangeTrackingStrategy, FacetKey, FacetMap, FacetValue, PropertyAccessMode, SaveBehavior,
    ValueComparer, ValueConverter, ValueGenerated,
};
use crate::property::Property;
use crate::source::ConfigurationSource;
use crate::types::TypeRef;
use crate::value::Value;

/// Bound on inheritance-chain walks. User-supplied graphs can be cyclic by
/// mistake; every chain walk terminates within this many steps.
const HIERARCHY_LIMIT: usize = 256;

/// Address of a type node: a registry entity plus the chain of structured
/// properties leading to a nested type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypePath {
    /// Registry name of the root entity type.
    pub entity: String,
    /// Structured-property names from the entity down to the addressed node.
    pub complex_path: Vec<String>,
}

impl TypePath {
    /// Address a top-level entity type.
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            entity: name.into(),
            complex_path: Vec::new(),
        }
    }

    /// Address the nested type owned by a structured property of this node.
    pub fn nested(&self, property: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.complex_path.push(property.into());
        path
    }

    /// Whether this addresses a top-level entity type.
    pub fn is_entity(&self) -> bool {
        self.complex_path.is_empty()
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)?;
        for segment in &self.complex_path {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

/// The mutable-then-frozen metadata graph.
pub struct Model {
    entities: BTreeMap<String, EntityType>,
    shared_types: HashMap<TypeRef, (ConfigurationSource, BTreeSet<String>)>,
    ignored_types: BTreeMap<String, (ConfigurationSource, Option<TypeRef>)>,
    owned_types: BTreeMap<String, ConfigurationSource>,
    complex_types: BTreeMap<String, ConfigurationSource>,
    properties_by_type: HashMap<String, BTreeSet<(String, String)>>,
    facets: FacetMap,
    annotations: AnnotationBag,
    events: VecDeque<ModelEvent>,
    batch_depth: usize,
    in_dispatch: bool,
    sink: Option<Box<dyn ConventionSink>>,
    finalized_conventions: Option<Vec<Box<dyn FinalizedConvention>>>,
    frozen: bool,
    indexer_members: DashMap<String, Option<String>>,
    runtime_members: DashMap<String, Arc<BTreeMap<String, TypeRef>>>,
}

impl Model {
    /// Create an empty, mutable model with no convention sink installed.
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            shared_types: HashMap::new(),
            ignored_types: BTreeMap::new(),
            owned_types: BTreeMap::new(),
            complex_types: BTreeMap::new(),
            properties_by_type: HashMap::new(),
            facets: FacetMap::new(),
            annotations: AnnotationBag::new(),
            events: VecDeque::new(),
            batch_depth: 0,
            in_dispatch: false,
            sink: None,
            finalized_conventions: Some(Vec::new()),
            frozen: false,
            indexer_members: DashMap::new(),
            runtime_members: DashMap::new(),
        }
    }

    /// Install the convention sink that receives model events.
    pub fn with_conventions(mut self, sink: Box<dyn ConventionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register a convention to run once against the finalized model.
    pub fn with_finalized_convention(mut self, convention: Box<dyn FinalizedConvention>) -> Self {
        if let Some(list) = self.finalized_conventions.as_mut() {
            list.push(convention);
        }
        self
    }

    /// Whether the model has been finalized.
    pub fn is_read_only(&self) -> bool {
        self.frozen
    }

    fn ensure_mutable(&self) -> Result<(), Error> {
        if self.frozen {
            return Err(Error::ModelReadOnly);
        }
        Ok(())
    }

    // --- entity registry ---

    /// Look up an entity type by registry name.
    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entities.get(name)
    }

    /// All entity types, in name order.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values()
    }

    fn entity_mut(&mut self, name: &str) -> Result<&mut EntityType, Error> {
        self.entities
            .get_mut(name)
            .ok_or_else(|| Error::EntityTypeNotFound(name.to_string()))
    }

    /// Register a non-shared entity type named after its runtime type.
    pub fn add_entity(
        &mut self,
        clr_type: TypeRef,
        source: ConfigurationSource,
    ) -> Result<&EntityType, Error> {
        self.ensure_mutable()?;
        let name = clr_type.name().to_string();
        if self.entities.contains_key(&name) {
            return Err(Error::DuplicateEntityType(name));
        }
        if self.shared_types.contains_key(&clr_type) {
            return Err(Error::ClashingSharedType {
                entity: name,
                clr_type: clr_type.name().to_string(),
            });
        }
        debug!(entity = %name, %source, "adding entity type");
        self.entities.insert(
            name.clone(),
            EntityType::new(name.clone(), clr_type, false, source),
        );
        self.enqueue(ModelEvent::EntityTypeAdded {
            entity: name.clone(),
        });
        self.dispatch_pending();
        // A convention may have removed the node again during dispatch.
        self.entities
            .get(&name)
            .ok_or(Error::EntityTypeNotFound(name))
    }

    /// Register an entity type under an explicit alias, sharing its runtime
    /// type with other instances.
    pub fn add_shared_entity(
        &mut self,
        name: impl Into<String>,
        clr_type: TypeRef,
        source: ConfigurationSource,
    ) -> Result<&EntityType, Error> {
        self.ensure_mutable()?;
        let name = name.into();
        if self.entities.contains_key(&name) {
            return Err(Error::DuplicateEntityType(name));
        }
        self.check_no_non_shared(&name, &clr_type)?;
        debug!(entity = %name, clr_type = %clr_type.name(), %source, "adding shared entity type");
        let entry = self
            .shared_types
            .entry(clr_type.clone())
            .or_insert_with(|| (source, BTreeSet::new()));
        entry.0 = source.max(Some(entry.0));
        entry.1.insert(name.clone());
        self.entities.insert(
            name.clone(),
            EntityType::new(name.clone(), clr_type, true, source),
        );
        self.enqueue(ModelEvent::EntityTypeAdded {
            entity: name.clone(),
        });
        self.dispatch_pending();
        self.entities
            .get(&name)
            .ok_or(Error::EntityTypeNotFound(name))
    }

    /// Mark a runtime type as shareable by multiple entity types.
    pub fn mark_shared(
        &mut self,
        clr_type: &TypeRef,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        self.ensure_mutable()?;
        self.check_no_non_shared(clr_type.name(), clr_type)?;
        let entry = self
            .shared_types
            .entry(clr_type.clone())
            .or_insert_with(|| (source, BTreeSet::new()));
        entry.0 = source.max(Some(entry.0));
        self.enqueue(ModelEvent::SharedTypeMarked {
            clr_type: clr_type.name().to_string(),
        });
        self.dispatch_pending();
        Ok(())
    }

    /// Whether the runtime type is registered as shared.
    pub fn is_shared(&self, clr_type: &TypeRef) -> bool {
        self.shared_types.contains_key(clr_type)
    }

    fn check_no_non_shared(&self, entity: &str, clr_type: &TypeRef) -> Result<(), Error> {
        let clash = self
            .entities
            .values()
            .any(|e| !e.has_shared_clr_type() && e.clr_type() == clr_type);
        if clash {
            return Err(Error::ClashingNonSharedType {
                entity: entity.to_string(),
                clr_type: clr_type.name().to_string(),
            });
        }
        Ok(())
    }

    /// Detach an entity type from the registry.
    ///
    /// Rejected while other entity types still reference it as a foreign-key
    /// principal or as a base type.
    pub fn remove_entity(&mut self, name: &str) -> Result<Option<EntityType>, Error> {
        self.ensure_mutable()?;
        if !self.entities.contains_key(name) {
            return Ok(None);
        }
        for other in self.entities.values() {
            if other.name() == name {
                continue;
            }
            if let Some(fk) = other.foreign_keys().iter().find(|fk| fk.principal_entity == name) {
                return Err(Error::EntityInUseByForeignKey {
                    entity: name.to_string(),
                    dependent: other.name().to_string(),
                    properties: fk.properties.clone(),
                });
            }
        }
        if let Some(derived) = self.entities[name].directly_derived().next() {
            return Err(Error::EntityInUseByDerived {
                entity: name.to_string(),
                derived: derived.to_string(),
            });
        }
        debug!(entity = %name, "removing entity type");
        let Some(mut removed) = self.entities.remove(name) else {
            return Ok(None);
        };
        if let Some(base) = removed.base_type().map(str::to_string) {
            if let Some(base_entity) = self.entities.get_mut(&base) {
                base_entity.remove_derived(name);
            }
        }
        if removed.has_shared_clr_type() {
            if let Some(entry) = self.shared_types.get_mut(removed.clr_type()) {
                entry.1.remove(name);
            }
        }
        self.purge_reverse_index(removed.type_base(), &TypePath::entity(name));
        removed.mark_removed();
        self.enqueue(ModelEvent::EntityTypeRemoved {
            entity: name.to_string(),
        });
        self.dispatch_pending();
        Ok(Some(removed))
    }

    // --- base types ---

    /// Set or clear an entity type's base type.
    ///
    /// Returns `Ok(None)` when `source` has no authority over the current
    /// base-type fact. Assignability, cycles, derived keys, and member
    /// collisions are hard errors.
    pub fn set_base_type(
        &mut self,
        entity: &str,
        base: Option<&str>,
        source: ConfigurationSource,
    ) -> Result<Option<Option<String>>, Error> {
        self.ensure_mutable()?;
        let (current, unchanged) = {
            let node = self
                .entities
                .get(entity)
                .ok_or_else(|| Error::EntityTypeNotFound(entity.to_string()))?;
            let current = node.base_type().map(str::to_string);
            let unchanged = current.as_deref() == base;
            if !unchanged && !source.overrides(node.base_type_source()) {
                return Ok(None);
            }
            (current, unchanged)
        };
        if unchanged {
            // Re-assertion bumps provenance but changes nothing else.
            self.entity_mut(entity)?
                .set_base_type_raw(current.clone(), source);
            return Ok(Some(current));
        }

        if let Some(base_name) = base {
            self.validate_base_type(entity, base_name)?;
        }

        if let Some(old) = &current {
            if let Some(old_entity) = self.entities.get_mut(old) {
                old_entity.remove_derived(entity);
            }
        }
        if let Some(base_name) = base {
            let base_entity = self.entity_mut(base_name)?;
            base_entity.add_derived(entity.to_string());
            base_entity.update_source(source);
        }
        let node = self.entity_mut(entity)?;
        node.set_base_type_raw(base.map(str::to_string), source);
        node.update_source(source);
        debug!(entity, base = base.unwrap_or("<none>"), %source, "base type changed");
        self.enqueue(ModelEvent::BaseTypeChanged {
            entity: entity.to_string(),
            old: current.clone(),
            new: base.map(str::to_string),
        });
        self.dispatch_pending();
        Ok(Some(current))
    }

    fn validate_base_type(&self, entity: &str, base: &str) -> Result<(), Error> {
        let node = &self.entities[entity];
        let base_entity = self
            .entities
            .get(base)
            .ok_or_else(|| Error::EntityTypeNotFound(base.to_string()))?;

        // Linear ancestor walk from the candidate base. Hitting `entity`
        // means the base is already a descendant of it. Checked before
        // assignability: a cycle through the model graph is the more
        // specific fault when both apply.
        let mut ancestor = Some(base);
        for _ in 0..HIERARCHY_LIMIT {
            let Some(current) = ancestor else { break };
            if current == entity {
                return Err(Error::CircularInheritance {
                    entity: entity.to_string(),
                    base: base.to_string(),
                });
            }
            ancestor = self.entities.get(current).and_then(|e| e.base_type());
        }

        if !base_entity.clr_type().is_assignable_from(node.clr_type()) {
            return Err(Error::NotAssignableBaseType {
                derived: entity.to_string(),
                derived_clr: node.clr_type().name().to_string(),
                base: base.to_string(),
                base_clr: base_entity.clr_type().name().to_string(),
            });
        }

        if !node.keys().is_empty() {
            return Err(Error::DerivedEntityCannotHaveKeys(entity.to_string()));
        }

        // Member names in this type's own hierarchy (itself plus everything
        // derived from it) must not collide with anything the new base chain
        // declares.
        for derived_name in self.derived_closure(entity) {
            let derived_node = &self.entities[&derived_name];
            for ancestor_name in self.ancestor_closure(base) {
                let ancestor_node = &self.entities[&ancestor_name];
                for property in derived_node.properties() {
                    if ancestor_node.type_base().declared_member(property.name()).is_some() {
                        return Err(Error::DuplicateMembersOnBase {
                            entity: entity.to_string(),
                            base: base.to_string(),
                            member: property.name().to_string(),
                            base_declaring: ancestor_name.clone(),
                            derived_declaring: derived_name.clone(),
                        });
                    }
                }
                for property in derived_node.complex_properties() {
                    if ancestor_node.type_base().declared_member(property.name()).is_some() {
                        return Err(Error::DuplicateMembersOnBase {
                            entity: entity.to_string(),
                            base: base.to_string(),
                            member: property.name().to_string(),
                            base_declaring: ancestor_name.clone(),
                            derived_declaring: derived_name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The entity plus everything transitively derived from it.
    fn derived_closure(&self, entity: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(entity.to_string());
        while let Some(current) = queue.pop_front() {
            if result.contains(&current) {
                continue;
            }
            if let Some(node) = self.entities.get(&current) {
                for derived in node.directly_derived() {
                    queue.push_back(derived.to_string());
                }
            }
            result.push(current);
        }
        result
    }

    /// The entity plus its transitive base types, bounded.
    fn ancestor_closure(&self, entity: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut current = Some(entity.to_string());
        for _ in 0..HIERARCHY_LIMIT {
            let Some(name) = current else { break };
            if result.contains(&name) {
                break;
            }
            current = self
                .entities
                .get(&name)
                .and_then(|e| e.base_type())
                .map(str::to_string);
            result.push(name);
        }
        result
    }

    /// Find a property declared on the entity or inherited from its bases.
    pub fn find_property(&self, entity: &str, property: &str) -> Option<&Property> {
        for name in self.ancestor_closure(entity) {
            if let Some(found) = self.entities.get(&name)?.property(property) {
                return Some(found);
            }
        }
        None
    }

    // --- type node resolution ---

    /// Resolve a type path to its node state.
    pub fn type_base(&self, path: &TypePath) -> Result<&TypeBase, Error> {
        let entity = self
            .entities
            .get(&path.entity)
            .ok_or_else(|| Error::TypeNotFound(path.to_string()))?;
        let mut base = entity.type_base();
        for segment in &path.complex_path {
            base = base
                .complex_property(segment)
                .ok_or_else(|| Error::TypeNotFound(path.to_string()))?
                .complex_type()
                .type_base();
        }
        Ok(base)
    }

    fn type_base_mut(&mut self, path: &TypePath) -> Result<&mut TypeBase, Error> {
        let entity = self
            .entities
            .get_mut(&path.entity)
            .ok_or_else(|| Error::TypeNotFound(path.to_string()))?;
        let mut base = entity.type_base_mut();
        for segment in &path.complex_path {
            base = base
                .complex_property_mut(segment)
                .ok_or_else(|| Error::TypeNotFound(path.to_string()))?
                .complex_type_mut()
                .type_base_mut();
        }
        Ok(base)
    }

    // --- properties ---

    /// Declare a scalar property with an explicitly configured runtime type.
    pub fn add_property(
        &mut self,
        path: &TypePath,
        name: &str,
        clr_type: TypeRef,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        self.add_property_full(path, name, Some(clr_type), None, Some(source), source)
    }

    /// Declare a scalar property, binding it to a backing member.
    ///
    /// When `member` is absent, a member with the property's name is looked
    /// up on the owning runtime type. When the declared `clr_type` and the
    /// bound member's type disagree: with no `type_source` the member's type
    /// silently wins; with a `type_source`, a mismatch against a member the
    /// caller named is a hard error, while a name-matched member that cannot
    /// back the declared type just leaves the property unbound.
    pub fn add_property_full(
        &mut self,
        path: &TypePath,
        name: &str,
        clr_type: Option<TypeRef>,
        member: Option<&str>,
        type_source: Option<ConfigurationSource>,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        self.ensure_mutable()?;
        self.check_member_collision(path, name)?;

        let owning_clr = self.type_base(path)?.clr_type().clone();
        let bound_member = match member {
            Some(member_name) => {
                let info = owning_clr.member(member_name).ok_or_else(|| {
                    Error::MemberNotOnType {
                        member: member_name.to_string(),
                        entity: path.to_string(),
                        clr_type: owning_clr.name().to_string(),
                    }
                })?;
                if info.name != name && !info.indexer {
                    return Err(Error::MemberWrongName {
                        property: name.to_string(),
                        entity: path.to_string(),
                        member: info.name.clone(),
                    });
                }
                Some(info.clone())
            }
            None => owning_clr.member(name).cloned(),
        };

        let explicitly_bound = member.is_some();
        let (final_type, final_member, final_type_source) = match (clr_type, bound_member) {
            (Some(declared), Some(info)) if declared != info.member_type => {
                match type_source {
                    Some(_) if explicitly_bound => {
                        return Err(Error::MemberWrongType {
                            property: name.to_string(),
                            entity: path.to_string(),
                            declared: declared.name().to_string(),
                            actual: info.member_type.name().to_string(),
                        });
                    }
                    Some(_) => (declared, None, type_source),
                    None => (info.member_type.clone(), Some(info.name), None),
                }
            }
            (Some(declared), info) => (declared, info.map(|m| m.name), type_source),
            (None, Some(info)) => (info.member_type.clone(), Some(info.name), None),
            (None, None) => {
                return Err(Error::PropertyNoType {
                    property: name.to_string(),
                    entity: path.to_string(),
                })
            }
        };

        let declaring = self.type_base(path)?.name().to_string();
        let property = Property::new(
            name.to_string(),
            declaring,
            final_type.clone(),
            final_member,
            final_type_source,
            source,
        );
        self.type_base_mut(path)?.insert_property(property);
        self.properties_by_type
            .entry(final_type.name().to_string())
            .or_default()
            .insert((path.to_string(), name.to_string()));
        self.enqueue(ModelEvent::PropertyAdded {
            type_path: path.clone(),
            property: name.to_string(),
        });
        self.dispatch_pending();
        Ok(())
    }

    fn check_member_collision(&self, path: &TypePath, name: &str) -> Result<(), Error> {
        if path.is_entity() {
            if !self.entities.contains_key(&path.entity) {
                return Err(Error::TypeNotFound(path.to_string()));
            }
            let hierarchy: Vec<String> = self
                .ancestor_closure(&path.entity)
                .into_iter()
                .chain(self.derived_closure(&path.entity))
                .collect();
            for type_name in hierarchy {
                let node = &self.entities[&type_name];
                if node.type_base().declared_member(name).is_some() {
                    return Err(Error::ConflictingMember {
                        name: name.to_string(),
                        entity: path.entity.clone(),
                        conflicting_type: type_name,
                    });
                }
            }
        } else {
            let base = self.type_base(path)?;
            if base.declared_member(name).is_some() {
                return Err(Error::ConflictingMember {
                    name: name.to_string(),
                    entity: path.to_string(),
                    conflicting_type: base.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Foreign keys can reference a property from outside its declaring
    /// entity: as the principal-side counterpart of another entity's foreign
    /// key, or as an inherited dependent property on a derived type. The
    /// entity-local in-use check cannot see those, so removal scans the whole
    /// registry.
    fn check_property_not_referenced(&self, entity: &str, property: &str) -> Result<(), Error> {
        for (name, node) in &self.entities {
            for fk in node.foreign_keys() {
                let dependent_hit = fk.contains(property)
                    && self.ancestor_closure(name).iter().any(|a| a == entity);
                let principal_hit = fk.principal_properties.iter().any(|p| p == property)
                    && self
                        .ancestor_closure(&fk.principal_entity)
                        .iter()
                        .any(|a| a == entity);
                if dependent_hit || principal_hit {
                    return Err(Error::PropertyInUseByForeignKey {
                        property: property.to_string(),
                        entity: name.clone(),
                        foreign_key_properties: fk.properties.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Remove a declared scalar property.
    ///
    /// Rejected while the property backs a key, foreign key, or index.
    pub fn remove_property(
        &mut self,
        path: &TypePath,
        name: &str,
    ) -> Result<Option<Property>, Error> {
        self.ensure_mutable()?;
        if self.type_base(path)?.property(name).is_none() {
            return Ok(None);
        }
        if path.is_entity() {
            self.entities[&path.entity].check_property_not_in_use(name)?;
            self.check_property_not_referenced(&path.entity, name)?;
        }
        let Some(removed) = self.type_base_mut(path)?.take_property(name) else {
            return Ok(None);
        };
        self.remove_from_reverse_index(removed.clr_type().name(), path, name);
        self.enqueue(ModelEvent::PropertyRemoved {
            type_path: path.clone(),
            property: name.to_string(),
        });
        self.dispatch_pending();
        Ok(Some(removed))
    }

    /// Declare a structured property embedding a nested type.
    pub fn add_complex_property(
        &mut self,
        path: &TypePath,
        name: &str,
        clr_type: TypeRef,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        self.ensure_mutable()?;
        self.check_member_collision(path, name)?;
        let node = self.type_base_mut(path)?;
        let declaring = node.name().to_string();
        node.insert_complex_property(ComplexProperty::new(
            name.to_string(),
            &declaring,
            clr_type,
            source,
        ));
        self.enqueue(ModelEvent::ComplexPropertyAdded {
            type_path: path.clone(),
            property: name.to_string(),
        });
        self.dispatch_pending();
        Ok(())
    }

    /// Remove a structured property and the nested type it owns.
    pub fn remove_complex_property(
        &mut self,
        path: &TypePath,
        name: &str,
    ) -> Result<Option<ComplexProperty>, Error> {
        self.ensure_mutable()?;
        let Some(removed) = self.type_base_mut(path)?.take_complex_property(name) else {
            return Ok(None);
        };
        self.purge_reverse_index(removed.complex_type().type_base(), &path.nested(name));
        self.enqueue(ModelEvent::ComplexPropertyRemoved {
            type_path: path.clone(),
            property: name.to_string(),
        });
        self.dispatch_pending();
        Ok(Some(removed))
    }

    fn purge_reverse_index(&mut self, base: &TypeBase, path: &TypePath) {
        let mut pairs: Vec<(String, TypePath, String)> = Vec::new();
        collect_reverse_entries(base, path, &mut pairs);
        for (clr_name, node_path, property) in pairs {
            self.remove_from_reverse_index(&clr_name, &node_path, &property);
        }
    }

    fn remove_from_reverse_index(&mut self, clr_name: &str, path: &TypePath, property: &str) {
        if let Some(set) = self.properties_by_type.get_mut(clr_name) {
            set.remove(&(path.to_string(), property.to_string()));
            if set.is_empty() {
                self.properties_by_type.remove(clr_name);
            }
        }
    }

    /// All `(type path, property name)` pairs whose property has the given
    /// runtime type.
    pub fn find_properties_of_type(&self, clr_type: &TypeRef) -> Vec<(String, String)> {
        self.properties_by_type
            .get(clr_type.name())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    // --- ignored members and type classifications ---

    /// Ignore a member name on a type node.
    pub fn ignore_member(
        &mut self,
        path: &TypePath,
        name: &str,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        self.ensure_mutable()?;
        self.type_base_mut(path)?
            .ignore_member(name.to_string(), source);
        self.enqueue(ModelEvent::MemberIgnored {
            type_path: path.clone(),
            member: name.to_string(),
        });
        self.dispatch_pending();
        Ok(())
    }

    /// Stop ignoring a member name, if `source` has the authority.
    pub fn unignore_member(
        &mut self,
        path: &TypePath,
        name: &str,
        source: ConfigurationSource,
    ) -> Result<bool, Error> {
        self.ensure_mutable()?;
        if !self.type_base_mut(path)?.unignore_member(name, source) {
            return Ok(false);
        }
        self.enqueue(ModelEvent::MemberUnignored {
            type_path: path.clone(),
            member: name.to_string(),
        });
        self.dispatch_pending();
        Ok(true)
    }

    /// Ignore a type name model-wide. The runtime type, when known, is kept
    /// alongside for convention lookups.
    pub fn ignore_type(
        &mut self,
        name: impl Into<String>,
        clr_type: Option<TypeRef>,
        source: ConfigurationSource,
    ) -> Result<Option<String>, Error> {
        self.ensure_mutable()?;
        let name = name.into();
        let recorded = self.ignored_types.get(&name).map(|(s, _)| *s);
        if !source.overrides(recorded) {
            return Ok(None);
        }
        let combined = source.max(recorded);
        self.ignored_types
            .insert(name.clone(), (combined, clr_type));
        self.enqueue(ModelEvent::TypeIgnored { name: name.clone() });
        self.dispatch_pending();
        Ok(Some(name))
    }

    /// The source that ignored a type name, if it is ignored.
    pub fn ignored_type_source(&self, name: &str) -> Option<ConfigurationSource> {
        self.ignored_types.get(name).map(|(s, _)| *s)
    }

    /// Whether a type name is ignored model-wide.
    pub fn is_type_ignored(&self, name: &str) -> bool {
        self.ignored_types.contains_key(name)
    }

    /// Stop ignoring a type name, if `source` has the authority.
    pub fn unignore_type(&mut self, name: &str, source: ConfigurationSource) -> Result<bool, Error> {
        self.ensure_mutable()?;
        if !source.overrides(self.ignored_type_source(name)) {
            return Ok(false);
        }
        if self.ignored_types.remove(name).is_none() {
            return Ok(false);
        }
        self.enqueue(ModelEvent::TypeUnignored {
            name: name.to_string(),
        });
        self.dispatch_pending();
        Ok(true)
    }

    /// Mark a runtime type as owned. The marker is inheritance-aware: any
    /// type deriving from a marked type counts as owned.
    pub fn mark_owned(
        &mut self,
        clr_type: &TypeRef,
        source: ConfigurationSource,
    ) -> Result<Option<()>, Error> {
        self.ensure_mutable()?;
        let Some(committed) = mark_classification(&mut self.owned_types, clr_type, source) else {
            return Ok(None);
        };
        self.enqueue(ModelEvent::OwnedMarkerChanged {
            clr_type: clr_type.name().to_string(),
            marked: true,
        });
        self.dispatch_pending();
        Ok(Some(committed))
    }

    /// Whether the runtime type or one of its bases is marked owned.
    pub fn is_owned(&self, clr_type: &TypeRef) -> bool {
        clr_type
            .self_and_bases()
            .any(|t| self.owned_types.contains_key(t.name()))
    }

    /// Remove an owned marker, if `source` has the authority.
    pub fn unmark_owned(
        &mut self,
        clr_type: &TypeRef,
        source: ConfigurationSource,
    ) -> Result<bool, Error> {
        self.ensure_mutable()?;
        if !unmark_classification(&mut self.owned_types, clr_type, source) {
            return Ok(false);
        }
        self.enqueue(ModelEvent::OwnedMarkerChanged {
            clr_type: clr_type.name().to_string(),
            marked: false,
        });
        self.dispatch_pending();
        Ok(true)
    }

    /// Mark a runtime type as a complex (structured value) type,
    /// inheritance-aware like [`Model::mark_owned`].
    pub fn mark_complex(
        &mut self,
        clr_type: &TypeRef,
        source: ConfigurationSource,
    ) -> Result<Option<()>, Error> {
        self.ensure_mutable()?;
        let Some(committed) = mark_classification(&mut self.complex_types, clr_type, source) else {
            return Ok(None);
        };
        self.enqueue(ModelEvent::ComplexMarkerChanged {
            clr_type: clr_type.name().to_string(),
            marked: true,
        });
        self.dispatch_pending();
        Ok(Some(committed))
    }

    /// Whether the runtime type or one of its bases is marked complex.
    pub fn is_complex(&self, clr_type: &TypeRef) -> bool {
        clr_type
            .self_and_bases()
            .any(|t| self.complex_types.contains_key(t.name()))
    }

    /// Remove a complex marker, if `source` has the authority.
    pub fn unmark_complex(
        &mut self,
        clr_type: &TypeRef,
        source: ConfigurationSource,
    ) -> Result<bool, Error> {
        self.ensure_mutable()?;
        if !unmark_classification(&mut self.complex_types, clr_type, source) {
            return Ok(false);
        }
        self.enqueue(ModelEvent::ComplexMarkerChanged {
            clr_type: clr_type.name().to_string(),
            marked: false,
        });
        self.dispatch_pending();
        Ok(true)
    }

    // --- keys, foreign keys, indexes ---

    /// Declare a key on an entity type.
    pub fn add_key(
        &mut self,
        entity: &str,
        properties: Vec<String>,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        self.ensure_mutable()?;
        self.entity_mut(entity)?.add_key(properties.clone(), source)?;
        self.enqueue(ModelEvent::KeyAdded {
            entity: entity.to_string(),
            properties,
        });
        self.dispatch_pending();
        Ok(())
    }

    /// Remove the key over exactly the given properties.
    pub fn remove_key(
        &mut self,
        entity: &str,
        properties: &[String],
    ) -> Result<Option<Key>, Error> {
        self.ensure_mutable()?;
        let Some(removed) = self.entity_mut(entity)?.remove_key(properties) else {
            return Ok(None);
        };
        self.enqueue(ModelEvent::KeyRemoved {
            entity: entity.to_string(),
            properties: removed.properties.clone(),
        });
        self.dispatch_pending();
        Ok(Some(removed))
    }

    /// Declare a foreign key from dependent properties to a principal
    /// entity's properties.
    pub fn add_foreign_key(
        &mut self,
        entity: &str,
        properties: Vec<String>,
        principal_entity: &str,
        principal_properties: Vec<String>,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        self.ensure_mutable()?;
        if properties.len() != principal_properties.len() {
            return Err(Error::ForeignKeyCountMismatch {
                entity: entity.to_string(),
                dependent_count: properties.len(),
                principal_count: principal_properties.len(),
            });
        }
        if !self.entities.contains_key(entity) {
            return Err(Error::EntityTypeNotFound(entity.to_string()));
        }
        if !self.entities.contains_key(principal_entity) {
            return Err(Error::EntityTypeNotFound(principal_entity.to_string()));
        }
        for property in &properties {
            if self.find_property(entity, property).is_none() {
                return Err(Error::PropertyNotFound {
                    property: property.clone(),
                    declaring_type: entity.to_string(),
                });
            }
        }
        for property in &principal_properties {
            if self.find_property(principal_entity, property).is_none() {
                return Err(Error::PropertyNotFound {
                    property: property.clone(),
                    declaring_type: principal_entity.to_string(),
                });
            }
        }
        self.entity_mut(entity)?.add_foreign_key_raw(ForeignKey::new(
            properties.clone(),
            principal_entity,
            principal_properties,
            source,
        ));
        self.enqueue(ModelEvent::ForeignKeyAdded {
            entity: entity.to_string(),
            properties,
            principal: principal_entity.to_string(),
        });
        self.dispatch_pending();
        Ok(())
    }

    /// Remove the foreign key over exactly the given dependent properties
    /// and principal.
    pub fn remove_foreign_key(
        &mut self,
        entity: &str,
        properties: &[String],
        principal_entity: &str,
    ) -> Result<Option<ForeignKey>, Error> {
        self.ensure_mutable()?;
        let Some(removed) = self
            .entity_mut(entity)?
            .remove_foreign_key(properties, principal_entity)
        else {
            return Ok(None);
        };
        self.enqueue(ModelEvent::ForeignKeyRemoved {
            entity: entity.to_string(),
            properties: removed.properties.clone(),
            principal: removed.principal_entity.clone(),
        });
        self.dispatch_pending();
        Ok(Some(removed))
    }

    /// Declare an index on an entity type.
    pub fn add_index(
        &mut self,
        entity: &str,
        properties: Vec<String>,
        unique: bool,
        source: ConfigurationSource,
    ) -> Result<(), Error> {
        self.ensure_mutable()?;
        self.entity_mut(entity)?
            .add_index(properties.clone(), unique, source)?;
        self.enqueue(ModelEvent::IndexAdded {
            entity: entity.to_string(),
            properties,
        });
        self.dispatch_pending();
        Ok(())
    }

    /// Remove the index over exactly the given properties.
    pub fn remove_index(
        &mut self,
        entity: &str,
        properties: &[String],
    ) -> Result<Option<Index>, Error> {
        self.ensure_mutable()?;
        let Some(removed) = self.entity_mut(entity)?.remove_index(properties) else {
            return Ok(None);
        };
        self.enqueue(ModelEvent::IndexRemoved {
            entity: entity.to_string(),
            properties: removed.properties.clone(),
        });
        self.dispatch_pending();
        Ok(Some(removed))
    }

    // --- property facets ---

    /// Change a property's nullability.
    ///
    /// A property of a non-nullable runtime type can never be made nullable.
    /// Making a key property nullable at explicit authority is a hard error.
    /// At lower authority it succeeds only when the source also has
    /// authority over every containing key, in which case those keys are
    /// removed first under a single convention batch.
    pub fn set_property_nullable(
        &mut self,
        path: &TypePath,
        property: &str,
        value: bool,
        source: ConfigurationSource,
    ) -> Result<Option<bool>, Error> {
        self.ensure_mutable()?;
        {
            let node = self.type_base(path)?;
            let found = node.property(property).ok_or_else(|| Error::PropertyNotFound {
                property: property.to_string(),
                declaring_type: path.to_string(),
            })?;
            // Incompatible-type violations are hard errors regardless of
            // authority; only then does the authority gate apply.
            if value && !found.clr_type().is_nullable() {
                return Err(Error::CannotBeNullable {
                    property: property.to_string(),
                    entity: path.to_string(),
                    clr_type: found.clr_type().name().to_string(),
                });
            }
            if !found.can_set_nullable(value, source) {
                return Ok(None);
            }
        }
        if value && path.is_entity() {
            let containing: Vec<Key> = self.entities[&path.entity]
                .keys_containing(property)
                .into_iter()
                .cloned()
                .collect();
            if !containing.is_empty() {
                if source == ConfigurationSource::Explicit {
                    return Err(Error::NullableKeyProperty {
                        property: property.to_string(),
                        entity: path.entity.clone(),
                    });
                }
                if !containing.iter().all(|k| source.overrides(Some(k.source))) {
                    return Ok(None);
                }
                let path = path.clone();
                let property = property.to_string();
                return self.delay_conventions(move |model| {
                    for key in &containing {
                        model.remove_key(&path.entity, &key.properties)?;
                    }
                    model.set_property_facet(&path, &property, FacetKey::Nullable, |p| {
                        p.set_nullable(value, source)
                    })
                });
            }
        }
        self.set_property_facet(path, property, FacetKey::Nullable, |p| {
            p.set_nullable(value, source)
        })
    }

    /// Mark a property as a concurrency token.
    pub fn set_property_concurrency_token(
        &mut self,
        path: &TypePath,
        property: &str,
        value: bool,
        source: ConfigurationSource,
    ) -> Result<Option<bool>, Error> {
        self.set_property_facet(path, property, FacetKey::ConcurrencyToken, |p| {
            Ok(p.set_concurrency_token(value, source))
        })
    }

    /// Configure Unicode handling for string data.
    pub fn set_property_unicode(
        &mut self,
        path: &TypePath,
        property: &str,
        value: bool,
        source: ConfigurationSource,
    ) -> Result<Option<bool>, Error> {
        self.set_property_facet(path, property, FacetKey::Unicode, |p| {
            Ok(p.set_unicode(value, source))
        })
    }

    /// Configure when the store generates the property's value.
    pub fn set_property_value_generated(
        &mut self,
        path: &TypePath,
        property: &str,
        value: ValueGenerated,
        source: ConfigurationSource,
    ) -> Result<Option<ValueGenerated>, Error> {
        self.set_property_facet(path, property, FacetKey::ValueGenerated, |p| {
            Ok(p.set_value_generated(value, source))
        })
    }

    /// Configure behavior for values present before insert.
    pub fn set_property_before_save(
        &mut self,
        path: &TypePath,
        property: &str,
        value: SaveBehavior,
        source: ConfigurationSource,
    ) -> Result<Option<SaveBehavior>, Error> {
        self.set_property_facet(path, property, FacetKey::BeforeSave, |p| {
            Ok(p.set_before_save(value, source))
        })
    }

    /// Configure behavior for values modified after insert.
    pub fn set_property_after_save(
        &mut self,
        path: &TypePath,
        property: &str,
        value: SaveBehavior,
        source: ConfigurationSource,
    ) -> Result<Option<SaveBehavior>, Error> {
        self.set_property_facet(path, property, FacetKey::AfterSave, |p| {
            Ok(p.set_after_save(value, source))
        })
    }

    /// Configure the maximum data length. `-1` means unbounded.
    pub fn set_property_max_length(
        &mut self,
        path: &TypePath,
        property: &str,
        value: i64,
        source: ConfigurationSource,
    ) -> Result<Option<i64>, Error> {
        self.set_property_facet(path, property, FacetKey::MaxLength, |p| {
            p.set_max_length(value, source)
        })
    }

    /// Configure decimal precision.
    pub fn set_property_precision(
        &mut self,
        path: &TypePath,
        property: &str,
        value: i64,
        source: ConfigurationSource,
    ) -> Result<Option<i64>, Error> {
        self.set_property_facet(path, property, FacetKey::Precision, |p| {
            p.set_precision(value, source)
        })
    }

    /// Configure decimal scale.
    pub fn set_property_scale(
        &mut self,
        path: &TypePath,
        property: &str,
        value: i64,
        source: ConfigurationSource,
    ) -> Result<Option<i64>, Error> {
        self.set_property_facet(path, property, FacetKey::Scale, |p| p.set_scale(value, source))
    }

    /// Configure the "unset" sentinel value.
    pub fn set_property_sentinel(
        &mut self,
        path: &TypePath,
        property: &str,
        value: Value,
        source: ConfigurationSource,
    ) -> Result<Option<Value>, Error> {
        self.set_property_facet(path, property, FacetKey::Sentinel, |p| {
            p.set_sentinel(value, source)
        })
    }

    /// Configure the value converter.
    pub fn set_property_converter(
        &mut self,
        path: &TypePath,
        property: &str,
        value: ValueConverter,
        source: ConfigurationSource,
    ) -> Result<Option<ValueConverter>, Error> {
        self.set_property_facet(path, property, FacetKey::Converter, |p| {
            p.set_converter(value, source)
        })
    }

    /// Configure the provider-side runtime type.
    pub fn set_property_provider_type(
        &mut self,
        path: &TypePath,
        property: &str,
        value: TypeRef,
        source: ConfigurationSource,
    ) -> Result<Option<TypeRef>, Error> {
        self.set_property_facet(path, property, FacetKey::ProviderType, |p| {
            Ok(p.set_provider_type(value, source))
        })
    }

    /// Configure the model-side value comparer.
    pub fn set_property_comparer(
        &mut self,
        path: &TypePath,
        property: &str,
        value: ValueComparer,
        source: ConfigurationSource,
    ) -> Result<Option<ValueComparer>, Error> {
        self.set_property_facet(path, property, FacetKey::Comparer, |p| {
            Ok(p.set_comparer(value, source))
        })
    }

    /// Configure the provider-side value comparer.
    pub fn set_property_provider_comparer(
        &mut self,
        path: &TypePath,
        property: &str,
        value: ValueComparer,
        source: ConfigurationSource,
    ) -> Result<Option<ValueComparer>, Error> {
        self.set_property_facet(path, property, FacetKey::ProviderComparer, |p| {
            Ok(p.set_provider_comparer(value, source))
        })
    }

    /// Configure the backing field binding.
    pub fn set_property_field_binding(
        &mut self,
        path: &TypePath,
        property: &str,
        value: impl Into<String>,
        source: ConfigurationSource,
    ) -> Result<Option<String>, Error> {
        let value = value.into();
        self.set_property_facet(path, property, FacetKey::FieldBinding, |p| {
            Ok(p.set_field_binding(value, source))
        })
    }

    fn set_property_facet<T>(
        &mut self,
        path: &TypePath,
        property: &str,
        facet: FacetKey,
        apply: impl FnOnce(&mut Property) -> Result<Option<T>, Error>,
    ) -> Result<Option<T>, Error> {
        self.ensure_mutable()?;
        let node = self.type_base_mut(path)?;
        let found = node.property_mut(property).ok_or_else(|| Error::PropertyNotFound {
            property: property.to_string(),
            declaring_type: path.to_string(),
        })?;
        let committed = apply(found)?;
        if committed.is_some() {
            self.enqueue(ModelEvent::PropertyFacetChanged {
                type_path: path.clone(),
                property: property.to_string(),
                facet,
            });
            self.dispatch_pending();
        }
        Ok(committed)
    }

    // --- model and type facets ---

    /// The model-wide change-tracking default.
    pub fn change_tracking_strategy(&self) -> ChangeTrackingStrategy {
        match self.facets.get(FacetKey::ChangeTracking) {
            Some(FacetValue::Tracking(v)) => *v,
            _ => ChangeTrackingStrategy::Snapshot,
        }
    }

    /// Set the model-wide change-tracking default.
    pub fn set_change_tracking_strategy(
        &mut self,
        value: ChangeTrackingStrategy,
        source: ConfigurationSource,
    ) -> Result<Option<ChangeTrackingStrategy>, Error> {
        self.ensure_mutable()?;
        let committed = self
            .facets
            .set(FacetKey::ChangeTracking, FacetValue::Tracking(value), source)
            .map(|_| value);
        if committed.is_some() {
            self.enqueue(ModelEvent::ModelFacetChanged {
                facet: FacetKey::ChangeTracking,
            });
            self.dispatch_pending();
        }
        Ok(committed)
    }

    /// The model-wide property-access-mode default.
    pub fn property_access_mode(&self) -> PropertyAccessMode {
        match self.facets.get(FacetKey::AccessMode) {
            Some(FacetValue::Access(v)) => *v,
            _ => PropertyAccessMode::PreferField,
        }
    }

    /// Set the model-wide property-access-mode default.
    pub fn set_property_access_mode(
        &mut self,
        value: PropertyAccessMode,
        source: ConfigurationSource,
    ) -> Result<Option<PropertyAccessMode>, Error> {
        self.ensure_mutable()?;
        let committed = self
            .facets
            .set(FacetKey::AccessMode, FacetValue::Access(value), source)
            .map(|_| value);
        if committed.is_some() {
            self.enqueue(ModelEvent::ModelFacetChanged {
                facet: FacetKey::AccessMode,
            });
            self.dispatch_pending();
        }
        Ok(committed)
    }

    /// Override the change-tracking strategy on a type node.
    pub fn set_type_change_tracking(
        &mut self,
        path: &TypePath,
        value: ChangeTrackingStrategy,
        source: ConfigurationSource,
    ) -> Result<Option<ChangeTrackingStrategy>, Error> {
        self.ensure_mutable()?;
        let committed = self.type_base_mut(path)?.set_change_tracking(value, source);
        if committed.is_some() {
            self.enqueue(ModelEvent::TypeFacetChanged {
                type_path: path.clone(),
                facet: FacetKey::ChangeTracking,
            });
            self.dispatch_pending();
        }
        Ok(committed)
    }

    /// Override the property-access mode on a type node.
    pub fn set_type_access_mode(
        &mut self,
        path: &TypePath,
        value: PropertyAccessMode,
        source: ConfigurationSource,
    ) -> Result<Option<PropertyAccessMode>, Error> {
        self.ensure_mutable()?;
        let committed = self.type_base_mut(path)?.set_access_mode(value, source);
        if committed.is_some() {
            self.enqueue(ModelEvent::TypeFacetChanged {
                type_path: path.clone(),
                facet: FacetKey::AccessMode,
            });
            self.dispatch_pending();
        }
        Ok(committed)
    }

    /// The change-tracking strategy in effect for a type node: its own
    /// override, or the model default.
    pub fn effective_change_tracking(&self, path: &TypePath) -> Result<ChangeTrackingStrategy, Error> {
        Ok(self
            .type_base(path)?
            .change_tracking()
            .unwrap_or_else(|| self.change_tracking_strategy()))
    }

    /// The property-access mode in effect for a type node.
    pub fn effective_access_mode(&self, path: &TypePath) -> Result<PropertyAccessMode, Error> {
        Ok(self
            .type_base(path)?
            .access_mode()
            .unwrap_or_else(|| self.property_access_mode()))
    }

    // --- annotations ---

    /// The model's annotation bag.
    pub fn annotations(&self) -> &AnnotationBag {
        &self.annotations
    }

    /// Set or remove a model annotation.
    pub fn set_annotation(
        &mut self,
        name: impl Into<String>,
        value: Option<Value>,
        source: ConfigurationSource,
    ) -> Result<Option<AnnotationChange>, Error> {
        self.ensure_mutable()?;
        let change = self.annotations.set_or_remove(name, value, source);
        if let Some(change) = &change {
            self.enqueue(ModelEvent::AnnotationChanged {
                target: AnnotationTarget::Model,
                change: change.clone(),
            });
            self.dispatch_pending();
        }
        Ok(change)
    }

    /// Set or remove an annotation on a type node.
    pub fn set_type_annotation(
        &mut self,
        path: &TypePath,
        name: impl Into<String>,
        value: Option<Value>,
        source: ConfigurationSource,
    ) -> Result<Option<AnnotationChange>, Error> {
        self.ensure_mutable()?;
        let change = self.type_base_mut(path)?.set_annotation(name, value, source);
        if let Some(change) = &change {
            self.enqueue(ModelEvent::AnnotationChanged {
                target: AnnotationTarget::Type(path.clone()),
                change: change.clone(),
            });
            self.dispatch_pending();
        }
        Ok(change)
    }

    /// Set or remove an annotation on a scalar property.
    pub fn set_property_annotation(
        &mut self,
        path: &TypePath,
        property: &str,
        name: impl Into<String>,
        value: Option<Value>,
        source: ConfigurationSource,
    ) -> Result<Option<AnnotationChange>, Error> {
        self.ensure_mutable()?;
        let node = self.type_base_mut(path)?;
        let found = node.property_mut(property).ok_or_else(|| Error::PropertyNotFound {
            property: property.to_string(),
            declaring_type: path.to_string(),
        })?;
        let change = found.set_annotation(name, value, source);
        if let Some(change) = &change {
            self.enqueue(ModelEvent::AnnotationChanged {
                target: AnnotationTarget::Property {
                    type_path: path.clone(),
                    property: property.to_string(),
                },
                change: change.clone(),
            });
            self.dispatch_pending();
        }
        Ok(change)
    }

    // --- conversion resolution ---

    /// Resolve the conversion configuration a property shares with every
    /// property linked to it through foreign keys.
    pub fn resolve_conversion(
        &self,
        entity: &str,
        property: &str,
        flags: ConversionFlags,
    ) -> Result<ConversionResolution, Error> {
        conversion::resolve(self, entity, property, flags)
    }

    // --- lazy caches ---

    /// The indexer member name of a runtime type, memoized. Safe for
    /// concurrent first-use readers.
    pub fn find_indexer_member(&self, clr_type: &TypeRef) -> Option<String> {
        self.indexer_members
            .entry(clr_type.name().to_string())
            .or_insert_with(|| clr_type.indexer_member().map(|m| m.name.clone()))
            .clone()
    }

    /// The full member map (declared plus inherited, nearest declaration
    /// wins) of a runtime type, memoized.
    pub fn runtime_members(&self, clr_type: &TypeRef) -> Arc<BTreeMap<String, TypeRef>> {
        self.runtime_members
            .entry(clr_type.name().to_string())
            .or_insert_with(|| {
                let mut members = BTreeMap::new();
                for level in clr_type.self_and_bases() {
                    for info in level.declared_members() {
                        members
                            .entry(info.name.clone())
                            .or_insert_with(|| info.member_type.clone());
                    }
                }
                Arc::new(members)
            })
            .clone()
    }

    // --- convention dispatch ---

    /// Run `f` with convention dispatch suppressed, flushing queued events
    /// once when the outermost batch completes. Flushes even when `f` fails,
    /// so conventions observe every committed mutation exactly once. When the
    /// batch unwinds instead, the pending notifications are discarded and the
    /// scope is still released.
    pub fn delay_conventions<R>(
        &mut self,
        f: impl FnOnce(&mut Model) -> Result<R, Error>,
    ) -> Result<R, Error> {
        struct BatchScope<'a> {
            model: &'a mut Model,
        }
        impl Drop for BatchScope<'_> {
            fn drop(&mut self) {
                self.model.batch_depth -= 1;
                if self.model.batch_depth == 0 {
                    if std::thread::panicking() {
                        self.model.events.clear();
                    } else {
                        self.model.dispatch_pending();
                    }
                }
            }
        }

        self.batch_depth += 1;
        let mut scope = BatchScope { model: self };
        f(&mut *scope.model)
    }

    fn enqueue(&mut self, event: ModelEvent) {
        if self.sink.is_some() || self.in_dispatch {
            self.events.push_back(event);
        }
    }

    fn dispatch_pending(&mut self) {
        if self.batch_depth > 0 || self.in_dispatch {
            return;
        }
        let Some(sink) = self.sink.take() else {
            self.events.clear();
            return;
        };
        self.in_dispatch = true;
        while let Some(event) = self.events.pop_front() {
            sink.on_event(self, &event);
        }
        self.in_dispatch = false;
        self.sink = Some(sink);
    }

    // --- freeze ---

    /// Finalize the model: give conventions a last chance to mutate, drain
    /// the event queue, run finalized conventions once, and freeze.
    pub fn finalize(&mut self) -> Result<(), Error> {
        self.ensure_mutable()?;
        if let Some(sink) = self.sink.take() {
            self.in_dispatch = true;
            sink.on_model_finalizing(self);
            while let Some(event) = self.events.pop_front() {
                sink.on_event(self, &event);
            }
            self.in_dispatch = false;
        }
        self.sink = None;
        self.events.clear();
        self.frozen = true;
        debug!(entities = self.entities.len(), "model finalized");
        if let Some(conventions) = self.finalized_conventions.take() {
            for convention in &conventions {
                convention.process(self);
            }
        }
        Ok(())
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .field("frozen", &self.frozen)
            .finish_non_exhaustive()
    }
}

fn collect_reverse_entries(
    base: &TypeBase,
    path: &TypePath,
    out: &mut Vec<(String, TypePath, String)>,
) {
    for property in base.properties() {
        out.push((
            property.clr_type().name().to_string(),
            path.clone(),
            property.name().to_string(),
        ));
    }
    for complex in base.complex_properties() {
        collect_reverse_entries(
            complex.complex_type().type_base(),
            &path.nested(complex.name()),
            out,
        );
    }
}

fn mark_classification(
    registry: &mut BTreeMap<String, ConfigurationSource>,
    clr_type: &TypeRef,
    source: ConfigurationSource,
) -> Option<()> {
    let recorded = registry.get(clr_type.name()).copied();
    if !source.overrides(recorded) {
        return None;
    }
    registry.insert(clr_type.name().to_string(), source.max(recorded));
    Some(())
}

fn unmark_classification(
    registry: &mut BTreeMap<String, ConfigurationSource>,
    clr_type: &TypeRef,
    source: ConfigurationSource,
) -> bool {
    let Some(recorded) = registry.get(clr_type.name()).copied() else {
        return false;
    };
    if !source.overrides(Some(recorded)) {
        return false;
    }
    registry.remove(clr_type.name());
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_type() -> TypeRef {
        TypeRef::named("Order")
            .with_member("Id", TypeRef::int32())
            .with_member("Total", TypeRef::int32())
            .with_member("Note", TypeRef::string())
    }

    fn explicit() -> ConfigurationSource {
        ConfigurationSource::Explicit
    }

    fn convention() -> ConfigurationSource {
        ConfigurationSource::Convention
    }

    #[test]
    fn test_duplicate_entity_name_rejected() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        assert!(matches!(
            model.add_entity(order_type(), explicit()),
            Err(Error::DuplicateEntityType(name)) if name == "Order"
        ));
    }

    #[test]
    fn test_shared_and_non_shared_clash_both_orders() {
        let bag = TypeRef::named("Dictionary<string, object>");

        let mut model = Model::new();
        model.add_entity(bag.clone(), explicit()).unwrap();
        assert!(matches!(
            model.mark_shared(&bag, explicit()),
            Err(Error::ClashingNonSharedType { .. })
        ));
        assert!(matches!(
            model.add_shared_entity("Bag1", bag.clone(), explicit()),
            Err(Error::ClashingNonSharedType { .. })
        ));

        let mut model = Model::new();
        model.mark_shared(&bag, explicit()).unwrap();
        assert!(matches!(
            model.add_entity(bag.clone(), explicit()),
            Err(Error::ClashingSharedType { .. })
        ));
        model
            .add_shared_entity("Bag1", bag.clone(), explicit())
            .unwrap();
        model
            .add_shared_entity("Bag2", bag, explicit())
            .unwrap();
    }

    #[test]
    fn test_base_type_cycle_rejected() {
        let base_clr = TypeRef::named("TypeA");
        let derived_clr = TypeRef::named("TypeB").with_base(base_clr.clone());

        let mut model = Model::new();
        model.add_entity(base_clr, explicit()).unwrap();
        model.add_entity(derived_clr, explicit()).unwrap();
        model
            .set_base_type("TypeB", Some("TypeA"), explicit())
            .unwrap();

        assert!(matches!(
            model.set_base_type("TypeA", Some("TypeB"), explicit()),
            Err(Error::CircularInheritance { .. })
        ));
        assert_eq!(model.entity_type("TypeA").unwrap().base_type(), None);
        assert_eq!(
            model.entity_type("TypeB").unwrap().base_type(),
            Some("TypeA")
        );
    }

    #[test]
    fn test_base_type_requires_assignable_runtime_type() {
        let mut model = Model::new();
        model.add_entity(TypeRef::named("Animal"), explicit()).unwrap();
        model.add_entity(TypeRef::named("Rock"), explicit()).unwrap();
        assert!(matches!(
            model.set_base_type("Rock", Some("Animal"), explicit()),
            Err(Error::NotAssignableBaseType { .. })
        ));
    }

    #[test]
    fn test_base_type_authority_gated() {
        let base_clr = TypeRef::named("Base");
        let derived_clr = TypeRef::named("Derived").with_base(base_clr.clone());
        let other_clr = TypeRef::named("Other");

        let mut model = Model::new();
        model.add_entity(base_clr, explicit()).unwrap();
        model.add_entity(derived_clr, explicit()).unwrap();
        model.add_entity(other_clr, explicit()).unwrap();
        model
            .set_base_type("Derived", Some("Base"), explicit())
            .unwrap();

        // Convention cannot clear an explicit base type.
        assert_eq!(
            model.set_base_type("Derived", None, convention()).unwrap(),
            None
        );
        assert_eq!(
            model.entity_type("Derived").unwrap().base_type(),
            Some("Base")
        );
        // Re-asserting the same base at any authority succeeds.
        assert_eq!(
            model
                .set_base_type("Derived", Some("Base"), convention())
                .unwrap(),
            Some(Some("Base".to_string()))
        );
    }

    #[test]
    fn test_property_collision_names_declaring_type() {
        let base_clr = TypeRef::named("Base").with_member("Name", TypeRef::string());
        let derived_clr = TypeRef::named("Derived").with_base(base_clr.clone());

        let mut model = Model::new();
        model.add_entity(base_clr, explicit()).unwrap();
        model.add_entity(derived_clr, explicit()).unwrap();
        model
            .set_base_type("Derived", Some("Base"), explicit())
            .unwrap();
        let base_path = TypePath::entity("Base");
        model
            .add_property(&base_path, "Name", TypeRef::string(), explicit())
            .unwrap();

        let derived_path = TypePath::entity("Derived");
        assert!(matches!(
            model.add_property(&derived_path, "Name", TypeRef::string(), explicit()),
            Err(Error::ConflictingMember { conflicting_type, .. }) if conflicting_type == "Base"
        ));
    }

    #[test]
    fn test_member_binding_rules() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        let path = TypePath::entity("Order");

        // Member looked up by name; member type wins when no type source.
        model
            .add_property_full(&path, "Total", None, None, None, convention())
            .unwrap();
        let total = model.entity_type("Order").unwrap().property("Total").unwrap();
        assert_eq!(total.clr_type().name(), "i32");
        assert_eq!(total.member(), Some("Total"));

        // Declared type disagreeing with the member is hard when a type
        // source was supplied.
        assert!(matches!(
            model.add_property_full(
                &path,
                "Note",
                Some(TypeRef::int64()),
                Some("Note"),
                Some(explicit()),
                explicit(),
            ),
            Err(Error::MemberWrongType { .. })
        ));

        // Without a type source the member's type silently wins.
        model
            .add_property_full(&path, "Note", Some(TypeRef::int64()), Some("Note"), None, explicit())
            .unwrap();
        let note = model.entity_type("Order").unwrap().property("Note").unwrap();
        assert_eq!(note.clr_type().name(), "string");

        assert!(matches!(
            model.add_property_full(&path, "Missing", None, Some("Missing"), None, explicit()),
            Err(Error::MemberNotOnType { .. })
        ));
        assert!(matches!(
            model.add_property_full(&path, "Alias", None, Some("Id"), None, explicit()),
            Err(Error::MemberWrongName { .. })
        ));
    }

    #[test]
    fn test_remove_property_guarded_by_key() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        let path = TypePath::entity("Order");
        model
            .add_property(&path, "Id", TypeRef::int32(), explicit())
            .unwrap();
        model
            .add_key("Order", vec!["Id".into()], explicit())
            .unwrap();

        assert!(matches!(
            model.remove_property(&path, "Id"),
            Err(Error::PropertyInUseByKey { key_properties, .. }) if key_properties == vec!["Id".to_string()]
        ));
        assert!(model.entity_type("Order").unwrap().property("Id").is_some());

        model.remove_key("Order", &["Id".to_string()]).unwrap();
        assert!(model.remove_property(&path, "Id").unwrap().is_some());
        assert!(model.find_properties_of_type(&TypeRef::int32()).is_empty());
    }

    #[test]
    fn test_remove_property_guarded_by_principal_side_foreign_key() {
        let mut model = Model::new();
        model
            .add_entity(
                TypeRef::named("Customer").with_member("Name", TypeRef::string()),
                explicit(),
            )
            .unwrap();
        model.add_entity(order_type(), explicit()).unwrap();
        let customer = TypePath::entity("Customer");
        let order = TypePath::entity("Order");
        model
            .add_property(&customer, "Name", TypeRef::string(), explicit())
            .unwrap();
        model
            .add_property(&order, "CustomerName", TypeRef::string(), explicit())
            .unwrap();
        model
            .add_foreign_key(
                "Order",
                vec!["CustomerName".into()],
                "Customer",
                vec!["Name".into()],
                explicit(),
            )
            .unwrap();

        // Referenced from outside its declaring entity, as the principal
        // side of Order's foreign key.
        assert!(matches!(
            model.remove_property(&customer, "Name"),
            Err(Error::PropertyInUseByForeignKey { entity, .. }) if entity == "Order"
        ));
        assert!(model.entity_type("Customer").unwrap().property("Name").is_some());

        model
            .remove_foreign_key("Order", &["CustomerName".to_string()], "Customer")
            .unwrap();
        assert!(model.remove_property(&customer, "Name").unwrap().is_some());
    }

    #[test]
    fn test_remove_inherited_property_guarded_by_derived_foreign_key() {
        let base_clr = TypeRef::named("Party");
        let derived_clr = TypeRef::named("Company").with_base(base_clr.clone());

        let mut model = Model::new();
        model.add_entity(base_clr, explicit()).unwrap();
        model.add_entity(derived_clr, explicit()).unwrap();
        model.add_entity(TypeRef::named("Region"), explicit()).unwrap();
        model.set_base_type("Company", Some("Party"), explicit()).unwrap();
        model
            .add_property(&TypePath::entity("Party"), "RegionId", TypeRef::int32(), explicit())
            .unwrap();
        model
            .add_property(&TypePath::entity("Region"), "Id", TypeRef::int32(), explicit())
            .unwrap();
        // The derived type declares a foreign key over the inherited property.
        model
            .add_foreign_key(
                "Company",
                vec!["RegionId".into()],
                "Region",
                vec!["Id".into()],
                explicit(),
            )
            .unwrap();

        assert!(matches!(
            model.remove_property(&TypePath::entity("Party"), "RegionId"),
            Err(Error::PropertyInUseByForeignKey { entity, .. }) if entity == "Company"
        ));
    }

    #[test]
    fn test_declared_type_overrides_mismatched_name_member() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        let path = TypePath::entity("Order");

        // The declared i32? cannot be backed by the i32 runtime member of
        // the same name; the declaration wins and the property is unbound.
        model
            .add_property(&path, "Id", TypeRef::optional(TypeRef::int32()), explicit())
            .unwrap();
        let id = model.entity_type("Order").unwrap().property("Id").unwrap();
        assert_eq!(id.clr_type().name(), "i32?");
        assert_eq!(id.member(), None);

        // Naming the member keeps the mismatch a hard error.
        assert!(matches!(
            model.add_property_full(
                &path,
                "Total",
                Some(TypeRef::int64()),
                Some("Total"),
                Some(explicit()),
                explicit(),
            ),
            Err(Error::MemberWrongType { .. })
        ));
    }

    #[test]
    fn test_nullable_on_non_nullable_runtime_type_is_hard_error() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        let path = TypePath::entity("Order");
        model
            .add_property(&path, "Total", TypeRef::int32(), explicit())
            .unwrap();

        assert!(matches!(
            model.set_property_nullable(&path, "Total", true, explicit()),
            Err(Error::CannotBeNullable { .. })
        ));
        assert!(matches!(
            model.set_property_nullable(&path, "Total", true, convention()),
            Err(Error::CannotBeNullable { .. })
        ));
        assert!(!model.entity_type("Order").unwrap().property("Total").unwrap().is_nullable());
    }

    #[test]
    fn test_explicit_nullable_on_key_property_is_hard_error() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        let path = TypePath::entity("Order");
        model
            .add_property(&path, "Id", TypeRef::optional(TypeRef::int32()), explicit())
            .unwrap();
        model
            .set_property_nullable(&path, "Id", false, explicit())
            .unwrap();
        model
            .add_key("Order", vec!["Id".into()], explicit())
            .unwrap();

        assert!(matches!(
            model.set_property_nullable(&path, "Id", true, explicit()),
            Err(Error::NullableKeyProperty { .. })
        ));
        assert!(!model.entity_type("Order").unwrap().property("Id").unwrap().is_nullable());
    }

    #[test]
    fn test_convention_nullable_drops_weaker_key() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        let path = TypePath::entity("Order");
        model
            .add_property(&path, "Id", TypeRef::optional(TypeRef::int32()), convention())
            .unwrap();
        model
            .set_property_nullable(&path, "Id", false, convention())
            .unwrap();
        model
            .add_key("Order", vec!["Id".into()], convention())
            .unwrap();

        let committed = model
            .set_property_nullable(&path, "Id", true, ConfigurationSource::DataAnnotation)
            .unwrap();
        assert_eq!(committed, Some(true));
        assert!(model.entity_type("Order").unwrap().keys().is_empty());
        assert!(model.entity_type("Order").unwrap().property("Id").unwrap().is_nullable());
    }

    #[test]
    fn test_convention_nullable_cannot_drop_stronger_key() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        let path = TypePath::entity("Order");
        model
            .add_property(&path, "Id", TypeRef::optional(TypeRef::int32()), convention())
            .unwrap();
        model
            .set_property_nullable(&path, "Id", false, convention())
            .unwrap();
        model
            .add_key("Order", vec!["Id".into()], ConfigurationSource::DataAnnotation)
            .unwrap();

        assert_eq!(
            model
                .set_property_nullable(&path, "Id", true, convention())
                .unwrap(),
            None
        );
        assert_eq!(model.entity_type("Order").unwrap().keys().len(), 1);
    }

    #[test]
    fn test_remove_entity_guards() {
        let mut model = Model::new();
        model.add_entity(TypeRef::named("Customer").with_member("Id", TypeRef::int32()), explicit()).unwrap();
        model.add_entity(order_type(), explicit()).unwrap();
        let customer = TypePath::entity("Customer");
        let order = TypePath::entity("Order");
        model
            .add_property(&customer, "Id", TypeRef::int32(), explicit())
            .unwrap();
        model
            .add_property(&order, "CustomerId", TypeRef::int32(), explicit())
            .unwrap();
        model
            .add_foreign_key(
                "Order",
                vec!["CustomerId".into()],
                "Customer",
                vec!["Id".into()],
                explicit(),
            )
            .unwrap();

        assert!(matches!(
            model.remove_entity("Customer"),
            Err(Error::EntityInUseByForeignKey { dependent, .. }) if dependent == "Order"
        ));

        model
            .remove_foreign_key("Order", &["CustomerId".to_string()], "Customer")
            .unwrap();
        let removed = model.remove_entity("Customer").unwrap().unwrap();
        assert!(!removed.is_in_model());
        assert!(model.entity_type("Customer").is_none());
    }

    #[test]
    fn test_frozen_model_rejects_mutation() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        model.finalize().unwrap();
        assert!(model.is_read_only());
        assert!(matches!(
            model.add_entity(TypeRef::named("Late"), explicit()),
            Err(Error::ModelReadOnly)
        ));
        assert!(matches!(
            model.add_property(&TypePath::entity("Order"), "Id", TypeRef::int32(), explicit()),
            Err(Error::ModelReadOnly)
        ));
        assert!(matches!(model.finalize(), Err(Error::ModelReadOnly)));
    }

    #[test]
    fn test_owned_marker_is_inheritance_aware() {
        let address = TypeRef::named("Address");
        let shipping = TypeRef::named("ShippingAddress").with_base(address.clone());

        let mut model = Model::new();
        model.mark_owned(&address, convention()).unwrap().unwrap();
        assert!(model.is_owned(&address));
        assert!(model.is_owned(&shipping));
        assert!(!model.is_complex(&address));

        // Weaker source cannot remove the marker once strengthened.
        model.mark_owned(&address, explicit()).unwrap().unwrap();
        assert!(!model.unmark_owned(&address, convention()).unwrap());
        assert!(model.unmark_owned(&address, explicit()).unwrap());
        assert!(!model.is_owned(&shipping));
    }

    #[test]
    fn test_nested_complex_properties_addressable() {
        let mut model = Model::new();
        model.add_entity(order_type(), explicit()).unwrap();
        let order = TypePath::entity("Order");
        model
            .add_complex_property(&order, "ShippingAddress", TypeRef::named("Address"), explicit())
            .unwrap();
        let address = order.nested("ShippingAddress");
        model
            .add_property(&address, "City", TypeRef::string(), explicit())
            .unwrap();
        model
            .add_complex_property(&address, "Geo", TypeRef::named("GeoPoint"), explicit())
            .unwrap();
        let geo = address.nested("Geo");
        model
            .add_property(&geo, "Lat", TypeRef::float64(), explicit())
            .unwrap();

        assert_eq!(
            model.type_base(&geo).unwrap().name(),
            "Order.ShippingAddress.Geo"
        );
        let found = model.find_properties_of_type(&TypeRef::float64());
        assert_eq!(found, vec![("Order.ShippingAddress.Geo".to_string(), "Lat".to_string())]);

        // Removing the structured property purges the nested subtree from
        // the reverse index.
        model.remove_complex_property(&order, "ShippingAddress").unwrap();
        assert!(model.find_properties_of_type(&TypeRef::float64()).is_empty());
    }
}
