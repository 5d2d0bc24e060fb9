//! The rebuildable cache handle: one published snapshot, many readers, one
//! writer at a time.
//!
//! Readers load the latest [`Snapshot`] without locking and keep it for as
//! long as they need a consistent view. Every rebuild, whatever triggered it,
//! goes through the writer lock, builds a complete candidate from the memo
//! state and publishes it with a single atomic swap. A failed build publishes
//! nothing and leaves the memo state as it was.
//!
//! Edits go through [`SchemaCacheHandle::rebuild_checked`] as a
//! [`MetadataUpdater`] applied to whatever document is published when the
//! writer lock is taken, so a replacement published in between is never
//! overwritten by an older copy.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde_json::Value;
use strata_cache::{CacheInvalidations, InvalidationKeys};
use strata_common::{RemoteSchemaName, SourceName};
use strata_config::StrataConfig;
use strata_metadata::{load_metadata, Metadata, MetadataError, MetadataObjId, MetadataUpdater};

use crate::engine::{build, BuildInput, BuildState, BuildStats};
use crate::errors::BuildError;
use crate::introspect::{
    FunctionDescriptor, IntrospectionError, RemoteSchemaIntrospector, SourceCatalog,
    SourceIntrospector, TableDescriptor,
};
use crate::schema_cache::SchemaCache;

/// A published state: the document, the cache built from it and the keys it
/// was built with.
#[derive(Debug)]
pub struct Snapshot {
    /// The metadata document.
    pub metadata: Arc<Metadata>,
    /// The cache compiled from it.
    pub cache: Arc<SchemaCache>,
    /// Invalidation keys after pruning.
    pub keys: InvalidationKeys,
}

/// Where the metadata document is persisted.
pub trait MetadataStore: Send + Sync {
    /// Fetches the latest document.
    fn fetch(&self) -> Result<Metadata, MetadataError>;
}

/// A metadata document stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    path: PathBuf,
}

impl FileMetadataStore {
    /// Creates a store reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetadataStore for FileMetadataStore {
    fn fetch(&self) -> Result<Metadata, MetadataError> {
        load_metadata(&self.path)
    }
}

/// Serves one source through a different introspector for a single rebuild,
/// for example one bound to the transaction an administrative action ran in.
#[derive(Clone, Copy)]
pub struct SourceOverlay<'a> {
    /// The source served by `introspector`.
    pub source: &'a SourceName,
    /// Introspector for that source.
    pub introspector: &'a dyn SourceIntrospector,
}

/// The handle's introspector with an optional overlay on top.
struct Routed<'a> {
    overlay: Option<SourceOverlay<'a>>,
    fallback: &'a dyn SourceIntrospector,
}

impl Routed<'_> {
    fn pick(&self, source: &SourceName) -> &dyn SourceIntrospector {
        match self.overlay {
            Some(overlay) if overlay.source == source => overlay.introspector,
            _ => self.fallback,
        }
    }
}

impl SourceIntrospector for Routed<'_> {
    fn list_tables(
        &self,
        source: &SourceName,
        configuration: &Value,
    ) -> Result<Vec<TableDescriptor>, IntrospectionError> {
        self.pick(source).list_tables(source, configuration)
    }

    fn list_functions(
        &self,
        source: &SourceName,
        configuration: &Value,
    ) -> Result<Vec<FunctionDescriptor>, IntrospectionError> {
        self.pick(source).list_functions(source, configuration)
    }

    fn catalog(
        &self,
        source: &SourceName,
        configuration: &Value,
    ) -> Result<SourceCatalog, IntrospectionError> {
        self.pick(source).catalog(source, configuration)
    }
}

/// What a rebuild compiles.
enum Document<'a> {
    Current,
    Replace(Metadata),
    Edit(&'a MetadataUpdater),
}

/// The single mutable cell of the system.
pub struct SchemaCacheHandle {
    published: ArcSwap<Snapshot>,
    writer: Mutex<BuildState>,
    config: StrataConfig,
    sources: Arc<dyn SourceIntrospector>,
    remote: Arc<dyn RemoteSchemaIntrospector>,
}

impl SchemaCacheHandle {
    /// Builds the first cache from `metadata` and publishes it.
    pub fn new(
        metadata: Metadata,
        config: StrataConfig,
        sources: Arc<dyn SourceIntrospector>,
        remote: Arc<dyn RemoteSchemaIntrospector>,
    ) -> Result<Self, BuildError> {
        let keys = InvalidationKeys::new();
        let input = BuildInput {
            metadata: &metadata,
            keys: &keys,
            config: &config,
            sources: sources.as_ref(),
            remote: remote.as_ref(),
        };
        let (cache, state) = build(BuildState::new(), &input)?;
        let snapshot = Snapshot {
            metadata: Arc::new(metadata),
            cache: Arc::new(cache),
            keys,
        };
        Ok(Self {
            published: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(state),
            config,
            sources,
            remote,
        })
    }

    /// The latest published snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.published.load_full()
    }

    /// The latest published cache.
    pub fn cache(&self) -> Arc<SchemaCache> {
        Arc::clone(&self.published.load().cache)
    }

    /// The document the latest cache was built from.
    pub fn metadata(&self) -> Arc<Metadata> {
        Arc::clone(&self.published.load().metadata)
    }

    /// The invalidation keys of the latest cache.
    pub fn invalidation_keys(&self) -> InvalidationKeys {
        self.published.load().keys.clone()
    }

    /// Settings the handle builds with.
    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// Memo statistics of the last successful build.
    pub fn last_build_stats(&self) -> BuildStats {
        self.writer.lock().unwrap_or_else(|e| e.into_inner()).stats()
    }

    /// Rebuilds the current document after bumping the requested keys.
    pub fn rebuild(&self, invalidations: &CacheInvalidations) -> Result<Arc<Snapshot>, BuildError> {
        self.publish(Document::Current, invalidations, None, |_, _| Ok::<_, BuildError>(()))
            .map(|(snapshot, ())| snapshot)
    }

    /// Replaces the document and rebuilds.
    pub fn replace_metadata(
        &self,
        metadata: Metadata,
        invalidations: &CacheInvalidations,
    ) -> Result<Arc<Snapshot>, BuildError> {
        self.publish(Document::Replace(metadata), invalidations, None, |_, _| {
            Ok::<_, BuildError>(())
        })
        .map(|(snapshot, ())| snapshot)
    }

    /// Handles an external reload request: re-reads the document from
    /// `store` if asked to, then rebuilds.
    pub fn reload(
        &self,
        invalidations: &CacheInvalidations,
        store: &dyn MetadataStore,
    ) -> Result<Arc<Snapshot>, BuildError> {
        if invalidations.reload_metadata {
            let metadata = store.fetch()?;
            tracing::debug!("reloaded metadata document");
            self.replace_metadata(metadata, invalidations)
        } else {
            self.rebuild(invalidations)
        }
    }

    /// Applies `updater` to the document published when the writer lock is
    /// taken, builds a candidate and publishes it only if `check` accepts it.
    ///
    /// `check` sees the snapshot being replaced and the candidate cache. On
    /// rejection nothing changes and the check's error is returned. With an
    /// `overlay`, its source is introspected through the overlay's
    /// introspector for this build.
    pub fn rebuild_checked<T, E>(
        &self,
        updater: &MetadataUpdater,
        invalidations: &CacheInvalidations,
        overlay: Option<SourceOverlay<'_>>,
        check: impl FnOnce(&Snapshot, &SchemaCache) -> Result<T, E>,
    ) -> Result<(Arc<Snapshot>, T), E>
    where
        E: From<BuildError>,
    {
        self.publish(Document::Edit(updater), invalidations, overlay, check)
    }

    fn publish<T, E>(
        &self,
        document: Document<'_>,
        invalidations: &CacheInvalidations,
        overlay: Option<SourceOverlay<'_>>,
        check: impl FnOnce(&Snapshot, &SchemaCache) -> Result<T, E>,
    ) -> Result<(Arc<Snapshot>, T), E>
    where
        E: From<BuildError>,
    {
        let mut state = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.published.load_full();
        let metadata = match document {
            Document::Current => Arc::clone(&current.metadata),
            Document::Replace(metadata) => Arc::new(metadata),
            Document::Edit(updater) => {
                let mut metadata = (*current.metadata).clone();
                updater.apply(&mut metadata);
                Arc::new(metadata)
            }
        };
        let mut keys = current.keys.clone();
        keys.invalidate(invalidations);

        let sources = Routed {
            overlay,
            fallback: self.sources.as_ref(),
        };
        let input = BuildInput {
            metadata: &metadata,
            keys: &keys,
            config: &self.config,
            sources: &sources,
            remote: self.remote.as_ref(),
        };
        let (cache, next_state) = build(state.clone(), &input).map_err(E::from)?;
        let accepted = check(&current, &cache)?;

        let (sources, remote_schemas) = retained_dependencies(&cache);
        let pruned = keys.prune(&sources, &remote_schemas);
        if pruned > 0 {
            tracing::debug!(pruned, "pruned invalidation keys");
        }
        let snapshot = Arc::new(Snapshot {
            metadata,
            cache: Arc::new(cache),
            keys,
        });
        self.published.store(Arc::clone(&snapshot));
        *state = next_state;
        Ok((snapshot, accepted))
    }
}

/// Dependencies whose invalidation keys survive a rebuild: everything in the
/// cache plus everything currently inconsistent.
pub fn retained_dependencies(
    cache: &SchemaCache,
) -> (BTreeSet<SourceName>, BTreeSet<RemoteSchemaName>) {
    let mut sources: BTreeSet<SourceName> = cache.sources.keys().cloned().collect();
    let mut remote_schemas: BTreeSet<RemoteSchemaName> =
        cache.remote_schemas.keys().cloned().collect();
    for id in cache.inconsistencies.ids() {
        match id {
            MetadataObjId::Source { source } => {
                sources.insert(source.clone());
            }
            MetadataObjId::RemoteSchema { name } => {
                remote_schemas.insert(name.clone());
            }
            _ => {}
        }
    }
    (sources, remote_schemas)
}
