//! Configuration-source precedence.
//!
//! Every settable fact in the graph records how strongly it was asserted.
//! Automatic conventions rank lowest, declarative annotations in the middle,
//! explicit user calls highest. A fact may only be rewritten by a source at
//! least as strong as the one that set it, except that re-asserting the
//! current value is always allowed (and never downgrades the recorded source).

use serde::{Deserialize, Serialize};

/// How a piece of configuration was established, ordered weakest to strongest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ConfigurationSource {
    /// Inferred automatically by a convention.
    Convention,
    /// Declared through a data annotation.
    DataAnnotation,
    /// Set explicitly by the user.
    Explicit,
}

impl ConfigurationSource {
    /// Check whether this source may overwrite a fact recorded at `recorded`.
    ///
    /// An unset fact can be written by any source.
    pub fn overrides(self, recorded: Option<ConfigurationSource>) -> bool {
        match recorded {
            None => true,
            Some(existing) => self >= existing,
        }
    }

    /// Combine two sources, keeping the stronger. Unset acts as the identity.
    pub fn max(self, other: Option<ConfigurationSource>) -> ConfigurationSource {
        match other {
            Some(existing) if existing > self => existing,
            _ => self,
        }
    }
}

impl std::fmt::Display for ConfigurationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigurationSource::Convention => write!(f, "convention"),
            ConfigurationSource::DataAnnotation => write!(f, "data_annotation"),
            ConfigurationSource::Explicit => write!(f, "explicit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(ConfigurationSource::Convention < ConfigurationSource::DataAnnotation);
        assert!(ConfigurationSource::DataAnnotation < ConfigurationSource::Explicit);
    }

    #[test]
    fn test_overrides_unset() {
        assert!(ConfigurationSource::Convention.overrides(None));
        assert!(ConfigurationSource::Explicit.overrides(None));
    }

    #[test]
    fn test_overrides_recorded() {
        assert!(ConfigurationSource::Explicit.overrides(Some(ConfigurationSource::Convention)));
        assert!(ConfigurationSource::DataAnnotation
            .overrides(Some(ConfigurationSource::DataAnnotation)));
        assert!(!ConfigurationSource::Convention.overrides(Some(ConfigurationSource::Explicit)));
        assert!(
            !ConfigurationSource::Convention.overrides(Some(ConfigurationSource::DataAnnotation))
        );
    }

    #[test]
    fn test_max_keeps_stronger() {
        assert_eq!(
            ConfigurationSource::Convention.max(Some(ConfigurationSource::Explicit)),
            ConfigurationSource::Explicit
        );
        assert_eq!(
            ConfigurationSource::Explicit.max(Some(ConfigurationSource::Convention)),
            ConfigurationSource::Explicit
        );
        assert_eq!(
            ConfigurationSource::DataAnnotation.max(None),
            ConfigurationSource::DataAnnotation
        );
    }
}
