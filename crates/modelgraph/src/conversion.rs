//! Conversion resolution across relationship chains.
//!
//! A property's effective conversion configuration (converter, provider
//! type, max length, precision, scale) must agree with every property it is
//! linked to through foreign keys, in either direction. The walk is a
//! breadth-first traversal over (entity, property) pairs with a visited set
//! and a hard chain bound; exceeding the bound means the relationship graph
//! degenerated into a cycle of distinct properties.

use std::collections::{HashSet, VecDeque};

use crate::error::Error;
use crate::facet::{FacetKey, ValueConverter};
use crate::model::Model;
use crate::property::Property;
use crate::types::TypeRef;

/// Upper bound on the number of linked properties a single resolution may
/// visit.
pub const MAX_RELATIONSHIP_CHAIN: usize = 1000;

/// How disagreements between linked properties are handled.
///
/// Size facets (max length, precision, scale) always fail hard on
/// disagreement. Converter and provider-type disagreements drop the facet
/// from the resolution unless the corresponding flag requests a hard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionFlags {
    /// Fail instead of dropping the converter when linked properties declare
    /// different converters.
    pub fail_on_converter_conflict: bool,
    /// Fail instead of dropping the provider type when linked properties
    /// declare different provider types.
    pub fail_on_provider_type_conflict: bool,
}

/// The conversion configuration agreed on by a property and everything it is
/// linked to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionResolution {
    /// The agreed converter, if exactly one is declared along the chain.
    pub converter: Option<ValueConverter>,
    /// The agreed provider type, if exactly one is declared along the chain.
    pub provider_type: Option<TypeRef>,
    /// The agreed max length.
    pub max_length: Option<i64>,
    /// The agreed precision.
    pub precision: Option<i64>,
    /// The agreed scale.
    pub scale: Option<i64>,
}

struct Slot<T> {
    value: Option<T>,
    holder: Option<(String, String)>,
    conflicted: bool,
}

impl<T: Clone + PartialEq> Slot<T> {
    fn new() -> Self {
        Self {
            value: None,
            holder: None,
            conflicted: false,
        }
    }

    /// Merge a declared value in. Returns the pair of disagreeing holders on
    /// conflict.
    fn merge(
        &mut self,
        declared: Option<T>,
        entity: &str,
        property: &str,
    ) -> Option<((String, String), (String, String))> {
        let declared = declared?;
        match &self.value {
            None => {
                self.value = Some(declared);
                self.holder = Some((entity.to_string(), property.to_string()));
                None
            }
            Some(existing) if *existing == declared => None,
            Some(_) => {
                self.conflicted = true;
                let first = self.holder.clone().unwrap_or_default();
                Some((first, (entity.to_string(), property.to_string())))
            }
        }
    }
}

pub(crate) fn resolve(
    model: &Model,
    entity: &str,
    property: &str,
    flags: ConversionFlags,
) -> Result<ConversionResolution, Error> {
    let mut visited: HashSet<(String, String)> = HashSet::new();
    let mut queue: VecDeque<(String, String)> = VecDeque::new();
    queue.push_back((entity.to_string(), property.to_string()));

    let mut converter = Slot::<ValueConverter>::new();
    let mut provider_type = Slot::<TypeRef>::new();
    let mut max_length = Slot::<i64>::new();
    let mut precision = Slot::<i64>::new();
    let mut scale = Slot::<i64>::new();

    while let Some((current_entity, current_property)) = queue.pop_front() {
        if !visited.insert((current_entity.clone(), current_property.clone())) {
            continue;
        }
        if visited.len() > MAX_RELATIONSHIP_CHAIN {
            return Err(Error::RelationshipCycle {
                property: property.to_string(),
                entity: entity.to_string(),
                limit: MAX_RELATIONSHIP_CHAIN,
            });
        }

        let node: &Property = model
            .find_property(&current_entity, &current_property)
            .ok_or_else(|| Error::PropertyNotFound {
                property: current_property.clone(),
                declaring_type: current_entity.clone(),
            })?;

        merge_hard(
            &mut max_length,
            node.max_length(),
            FacetKey::MaxLength,
            &current_entity,
            &current_property,
        )?;
        merge_hard(
            &mut precision,
            node.precision(),
            FacetKey::Precision,
            &current_entity,
            &current_property,
        )?;
        merge_hard(
            &mut scale,
            node.scale(),
            FacetKey::Scale,
            &current_entity,
            &current_property,
        )?;

        if let Some(((e1, p1), (e2, p2))) = converter.merge(
            node.converter().cloned(),
            &current_entity,
            &current_property,
        ) {
            if flags.fail_on_converter_conflict {
                return Err(Error::ConversionConflict {
                    facet: FacetKey::Converter.to_string(),
                    property: p1,
                    entity: e1,
                    other_property: p2,
                    other_entity: e2,
                });
            }
        }
        if let Some(((e1, p1), (e2, p2))) = provider_type.merge(
            node.provider_type().cloned(),
            &current_entity,
            &current_property,
        ) {
            if flags.fail_on_provider_type_conflict {
                return Err(Error::ConversionConflict {
                    facet: FacetKey::ProviderType.to_string(),
                    property: p1,
                    entity: e1,
                    other_property: p2,
                    other_entity: e2,
                });
            }
        }

        // Dependent side: follow this property to its principal counterpart.
        if let Some(current) = model.entity_type(&current_entity) {
            for fk in current.foreign_keys_containing(&current_property) {
                if let Some(counterpart) = fk.principal_counterpart(&current_property) {
                    queue.push_back((fk.principal_entity.clone(), counterpart.to_string()));
                }
            }
        }
        // Principal side: follow foreign keys on other entities that target
        // this property.
        for other in model.entity_types() {
            for fk in other.foreign_keys() {
                if fk.principal_entity != current_entity {
                    continue;
                }
                for (i, principal_property) in fk.principal_properties.iter().enumerate() {
                    if principal_property == &current_property {
                        queue.push_back((other.name().to_string(), fk.properties[i].clone()));
                    }
                }
            }
        }
    }

    Ok(ConversionResolution {
        converter: if converter.conflicted {
            None
        } else {
            converter.value
        },
        provider_type: if provider_type.conflicted {
            None
        } else {
            provider_type.value
        },
        max_length: max_length.value,
        precision: precision.value,
        scale: scale.value,
    })
}

fn merge_hard(
    slot: &mut Slot<i64>,
    declared: Option<i64>,
    facet: FacetKey,
    entity: &str,
    property: &str,
) -> Result<(), Error> {
    if let Some(((e1, p1), (e2, p2))) = slot.merge(declared, entity, property) {
        return Err(Error::ConversionConflict {
            facet: facet.to_string(),
            property: p1,
            entity: e1,
            other_property: p2,
            other_entity: e2,
        });
    }
    Ok(())
}
