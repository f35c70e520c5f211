//! Cache configuration.
//!
//! The heading set is static per deployment: a record whose heading is
//! not a member fails validation before anything is written.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The standard clinical headings served by default.
pub const DEFAULT_HEADINGS: &[&str] = &[
    "allergies",
    "contacts",
    "events",
    "laborders",
    "labresults",
    "medications",
    "problems",
    "procedures",
    "referrals",
    "top3Things",
    "vaccinations",
    "vitalsigns",
];

/// The statically configured set of clinical headings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingSet {
    headings: BTreeSet<String>,
}

impl HeadingSet {
    /// Creates a heading set from the given names.
    pub fn new<I, S>(headings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headings: headings.into_iter().map(Into::into).collect(),
        }
    }

    /// True if `heading` is a configured clinical heading.
    ///
    /// The `"finished"` discovery sentinel is not a heading and is never
    /// a member.
    #[must_use]
    pub fn contains(&self, heading: &str) -> bool {
        self.headings.contains(heading)
    }

    /// Iterates the configured headings in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.headings.iter().map(String::as_str)
    }

    /// Number of configured headings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.headings.len()
    }

    /// True if no headings are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headings.is_empty()
    }
}

impl Default for HeadingSet {
    fn default() -> Self {
        Self::new(DEFAULT_HEADINGS.iter().copied())
    }
}

/// Top-level configuration for the cache engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// The clinical headings this deployment serves.
    pub headings: HeadingSet,
}

impl CacheConfig {
    /// Configuration with the default heading set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the heading set.
    #[must_use]
    pub fn with_headings(mut self, headings: HeadingSet) -> Self {
        self.headings = headings;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_contains_standard_headings() {
        let set = HeadingSet::default();
        assert!(set.contains("procedures"));
        assert!(set.contains("vaccinations"));
        assert!(!set.contains("finished"));
        assert!(!set.contains("horoscopes"));
        assert_eq!(set.len(), DEFAULT_HEADINGS.len());
    }

    #[test]
    fn test_custom_set() {
        let set = HeadingSet::new(["procedures", "vaccinations"]);
        assert!(set.contains("procedures"));
        assert!(!set.contains("medications"));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["procedures", "vaccinations"]);
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new().with_headings(HeadingSet::new(["vitalsigns"]));
        assert!(config.headings.contains("vitalsigns"));
        assert!(!config.headings.contains("procedures"));
    }
}
