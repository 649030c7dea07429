//! Authority-tagged annotation bags.
//!
//! Every node in the graph carries a key/value bag where each entry records
//! the configuration source that set it. Writes are gated by source
//! precedence; a committed write returns a change record the owner forwards
//! to the convention queue.

use std::collections::BTreeMap;

use crate::source::ConfigurationSource;
use crate::value::Value;

/// A single annotation entry: value plus the source that set it.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// The annotation payload.
    pub value: Value,
    /// How the annotation was established.
    pub source: ConfigurationSource,
}

/// A committed annotation change, forwarded to the convention dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationChange {
    /// Annotation key.
    pub name: String,
    /// Previous value, if the key existed.
    pub old: Option<Value>,
    /// New value, `None` when the key was removed.
    pub new: Option<Value>,
}

/// An ordered key/value bag with per-entry provenance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationBag {
    entries: BTreeMap<String, Annotation>,
}

impl AnnotationBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an annotation value by key.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|a| &a.value)
    }

    /// Get the source that set an annotation.
    ///
    /// A present key always has a source; a missing key has none.
    pub fn source(&self, name: &str) -> Option<ConfigurationSource> {
        self.entries.get(name).map(|a| a.source)
    }

    /// Iterate all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Annotation)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check whether `source` may set the annotation to `value`.
    ///
    /// Re-asserting the current value is always allowed.
    pub fn can_set(&self, name: &str, value: &Value, source: ConfigurationSource) -> bool {
        source.overrides(self.source(name)) || self.get(name) == Some(value)
    }

    /// Set an annotation, gated by source precedence.
    ///
    /// Returns the change record on commit, `None` on silent rejection. The
    /// recorded source never decreases: an idempotent write at a weaker
    /// source keeps the stronger provenance.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: Value,
        source: ConfigurationSource,
    ) -> Option<AnnotationChange> {
        let name = name.into();
        if !self.can_set(&name, &value, source) {
            return None;
        }
        let new_source = source.max(self.source(&name));
        let old = self.entries.insert(
            name.clone(),
            Annotation {
                value: value.clone(),
                source: new_source,
            },
        );
        Some(AnnotationChange {
            name,
            old: old.map(|a| a.value),
            new: Some(value),
        })
    }

    /// Set or remove an annotation in one call: `None` removes the key.
    pub fn set_or_remove(
        &mut self,
        name: impl Into<String>,
        value: Option<Value>,
        source: ConfigurationSource,
    ) -> Option<AnnotationChange> {
        let name = name.into();
        match value {
            Some(value) => self.set(name, value, source),
            None => {
                if !source.overrides(self.source(&name)) {
                    return None;
                }
                self.remove(&name)
            }
        }
    }

    /// Remove an annotation, clearing its recorded source.
    pub fn remove(&mut self, name: &str) -> Option<AnnotationChange> {
        self.entries.remove(name).map(|old| AnnotationChange {
            name: name.to_string(),
            old: Some(old.value),
            new: None,
        })
    }
}
