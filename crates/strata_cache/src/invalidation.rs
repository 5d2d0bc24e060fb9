//! Invalidation keys for external dependencies.
//!
//! A key changes whenever a data source or remote schema may have changed
//! without any edit to the metadata document, for example after an explicit
//! "reload remote schema" request. Keys are folded into memo inputs, so a
//! bumped key forces recomputation of exactly the results that read the
//! external state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strata_common::{RemoteSchemaName, SourceName};

/// An opaque version token.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InvalidationKey(u64);

impl InvalidationKey {
    /// The key of a dependency that has never been invalidated.
    pub const INITIAL: InvalidationKey = InvalidationKey(0);

    /// Returns the following key.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// External invalidations requested alongside a rebuild.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInvalidations {
    /// Re-read the metadata document from the persistence layer.
    #[serde(default)]
    pub reload_metadata: bool,
    /// Sources whose catalogs must be re-introspected.
    #[serde(default)]
    pub sources: BTreeSet<SourceName>,
    /// Remote schemas that must be re-introspected.
    #[serde(default)]
    pub remote_schemas: BTreeSet<RemoteSchemaName>,
}

impl CacheInvalidations {
    /// Requests re-introspection of a source.
    pub fn reload_source(mut self, source: impl Into<SourceName>) -> Self {
        self.sources.insert(source.into());
        self
    }

    /// Requests re-introspection of a remote schema.
    pub fn reload_remote_schema(mut self, name: impl Into<RemoteSchemaName>) -> Self {
        self.remote_schemas.insert(name.into());
        self
    }

    /// Returns `true` if nothing is invalidated.
    pub fn is_empty(&self) -> bool {
        !self.reload_metadata && self.sources.is_empty() && self.remote_schemas.is_empty()
    }
}

/// The current key of every external dependency.
///
/// A dependency without an entry has [`InvalidationKey::INITIAL`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationKeys {
    /// Keys of backing data sources.
    #[serde(default)]
    pub sources: BTreeMap<SourceName, InvalidationKey>,
    /// Keys of remote schemas.
    #[serde(default)]
    pub remote_schemas: BTreeMap<RemoteSchemaName, InvalidationKey>,
}

impl InvalidationKeys {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The key of a source.
    pub fn source(&self, source: &SourceName) -> InvalidationKey {
        self.sources.get(source).copied().unwrap_or_default()
    }

    /// The key of a remote schema.
    pub fn remote_schema(&self, name: &RemoteSchemaName) -> InvalidationKey {
        self.remote_schemas.get(name).copied().unwrap_or_default()
    }

    /// Advances the key of a source.
    pub fn bump_source(&mut self, source: &SourceName) {
        let key = self.sources.entry(source.clone()).or_default();
        *key = key.next();
    }

    /// Advances the key of a remote schema.
    pub fn bump_remote_schema(&mut self, name: &RemoteSchemaName) {
        let key = self.remote_schemas.entry(name.clone()).or_default();
        *key = key.next();
    }

    /// Advances the keys named by an invalidation request.
    pub fn invalidate(&mut self, invalidations: &CacheInvalidations) {
        for source in &invalidations.sources {
            self.bump_source(source);
        }
        for name in &invalidations.remote_schemas {
            self.bump_remote_schema(name);
        }
    }

    /// Drops keys of dependencies that are not retained. Returns the number
    /// of keys removed.
    ///
    /// Callers retain every dependency still present in the new cache plus
    /// every one that is currently inconsistent: an inconsistent object is
    /// still declared and would otherwise be reprocessed with a reset key.
    pub fn prune(
        &mut self,
        retained_sources: &BTreeSet<SourceName>,
        retained_remote_schemas: &BTreeSet<RemoteSchemaName>,
    ) -> usize {
        let before = self.sources.len() + self.remote_schemas.len();
        self.sources.retain(|name, _| retained_sources.contains(name));
        self.remote_schemas
            .retain(|name, _| retained_remote_schemas.contains(name));
        before - (self.sources.len() + self.remote_schemas.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_are_initial() {
        let keys = InvalidationKeys::new();
        assert_eq!(keys.source(&"default".into()), InvalidationKey::INITIAL);
    }

    #[test]
    fn bump_changes_key() {
        let mut keys = InvalidationKeys::new();
        let name = RemoteSchemaName::new("countries");
        let before = keys.remote_schema(&name);
        keys.bump_remote_schema(&name);
        assert_ne!(keys.remote_schema(&name), before);
    }

    #[test]
    fn invalidate_from_request() {
        let mut keys = InvalidationKeys::new();
        let request = CacheInvalidations::default()
            .reload_source("default")
            .reload_remote_schema("countries");
        assert!(!request.is_empty());
        keys.invalidate(&request);
        assert_eq!(keys.source(&"default".into()), InvalidationKey::INITIAL.next());
        assert_eq!(
            keys.remote_schema(&"countries".into()),
            InvalidationKey::INITIAL.next()
        );
    }

    #[test]
    fn prune_keeps_retained() {
        let mut keys = InvalidationKeys::new();
        keys.bump_remote_schema(&"kept".into());
        keys.bump_remote_schema(&"gone".into());
        let retained: BTreeSet<RemoteSchemaName> = std::iter::once("kept".into()).collect();
        let removed = keys.prune(&BTreeSet::new(), &retained);
        assert_eq!(removed, 1);
        assert!(keys.remote_schemas.contains_key("kept"));
        assert!(!keys.remote_schemas.contains_key("gone"));
    }

    #[test]
    fn serializes_as_plain_numbers() {
        let mut keys = InvalidationKeys::new();
        keys.bump_source(&"default".into());
        let json = serde_json::to_value(&keys).unwrap();
        assert_eq!(json["sources"]["default"], 1);
    }
}
