//! Resource → cache key prefix routing.

use std::collections::{BTreeMap, BTreeSet};

use crate::cache::resource_prefix;

/// Maps each watched resource to the cache key prefixes a change on it
/// must invalidate.
///
/// Every resource maps to its own aggregate prefix (`aggregate:{resource}:`);
/// extra prefixes can be attached for derived views that read several
/// resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationMap {
    routes: BTreeMap<String, BTreeSet<String>>,
}

impl InvalidationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map where each resource invalidates only its own prefix.
    pub fn for_resources<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        resources
            .into_iter()
            .fold(Self::new(), |map, resource| map.with_resource(resource.as_ref()))
    }

    /// Adds a resource with its default prefix.
    pub fn with_resource(mut self, resource: &str) -> Self {
        self.routes
            .entry(resource.to_string())
            .or_default()
            .insert(resource_prefix(resource));
        self
    }

    /// Adds an extra prefix invalidated when `resource` changes.
    pub fn with_prefix(mut self, resource: &str, prefix: impl Into<String>) -> Self {
        let prefixes = self.routes.entry(resource.to_string()).or_default();
        prefixes.insert(resource_prefix(resource));
        prefixes.insert(prefix.into());
        self
    }

    /// Resource names this map watches, sorted.
    pub fn resources(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Prefixes to invalidate for one resource.
    ///
    /// An unmapped resource still invalidates its own default prefix.
    pub fn prefixes_for(&self, resource: &str) -> BTreeSet<String> {
        self.routes
            .get(resource)
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([resource_prefix(resource)]))
    }

    /// Union of the prefixes for a burst of changed resources.
    ///
    /// Each prefix appears once no matter how many events named it.
    pub fn coalesce<'a, I>(&self, resources: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        resources
            .into_iter()
            .flat_map(|resource| self.prefixes_for(resource))
            .collect()
    }
}
