//! The drift check wrapped around an administrative action.
//!
//! The check runs in stages: snapshot the tracked schema, run the action,
//! snapshot again, diff, analyze the impact on the last cache, then either
//! abort or reconcile the metadata and rebuild. Nothing is published unless
//! every stage succeeds. The snapshots and the rebuild of the checked source
//! go through the introspector the caller hands in, which is expected to run
//! inside the same transaction as the action; rolling that transaction back
//! on error is the caller's job.
//!
//! The reconciling edits are applied to the document published at rebuild
//! time, not to the copy read before the action, so an edit published while
//! the action ran is kept.

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_cache::CacheInvalidations;
use strata_common::{InternalError, SourceName};
use strata_config::NewInconsistencyPolicy;
use strata_diagnostics::InconsistentObject;
use strata_metadata::{
    ColumnRename, MetadataObjId, MetadataUpdate, MetadataUpdater, RelationshipTarget,
    SourceMetadata,
};
use strata_schema::{SchemaCache, SchemaCacheHandle, Snapshot, SourceIntrospector, SourceOverlay};

use crate::diff::{diff, SchemaDiff};
use crate::error::DriftError;
use crate::impact::{analyze, Impact};
use crate::snapshot::capture;

/// The result of a successful drift check.
#[derive(Debug)]
pub struct DriftOutcome<T> {
    /// What the administrative action returned.
    pub value: T,
    /// Changes to the tracked schema.
    pub diff: SchemaDiff,
    /// Objects the changes reached.
    pub impact: Impact,
    /// Edits applied to the metadata document, for the persistence layer.
    pub updater: MetadataUpdater,
    /// Objects removed from the metadata.
    pub purged: BTreeSet<MetadataObjId>,
    /// The published cache.
    pub cache: Arc<SchemaCache>,
    /// Inconsistencies that appeared without being explained by the purge.
    /// Always empty under [`NewInconsistencyPolicy::Fatal`].
    pub new_inconsistencies: Vec<InconsistentObject>,
}

/// Runs administrative actions against a source and keeps the cache in step
/// with what they did.
pub struct DriftChecker<'a> {
    handle: &'a SchemaCacheHandle,
    introspector: &'a dyn SourceIntrospector,
    cascade: Option<bool>,
    policy: NewInconsistencyPolicy,
}

impl<'a> DriftChecker<'a> {
    /// Creates a checker using the handle's drift settings.
    pub fn new(handle: &'a SchemaCacheHandle, introspector: &'a dyn SourceIntrospector) -> Self {
        Self {
            handle,
            introspector,
            cascade: None,
            policy: handle.config().drift.new_inconsistencies,
        }
    }

    /// Allows or forbids removing indirect dependents. Without a call the
    /// configured default applies.
    pub fn cascade(mut self, cascade: bool) -> Self {
        self.cascade = Some(cascade);
        self
    }

    /// Overrides the handling of unexplained new inconsistencies.
    pub fn new_inconsistencies(mut self, policy: NewInconsistencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs `action` against `source` inside the drift check.
    pub fn run<T, E>(
        &self,
        source: &SourceName,
        action: impl FnOnce() -> Result<T, E>,
    ) -> Result<DriftOutcome<T>, DriftError>
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let cascade = self
            .cascade
            .unwrap_or(self.handle.config().drift.cascade_by_default);
        let published = self.handle.current();
        let declared = published
            .metadata
            .sources
            .get(source)
            .ok_or_else(|| DriftError::UnknownSource { name: source.clone() })?;

        let before = capture(source, declared, self.introspector)?;
        let value = action().map_err(|e| DriftError::Action(e.into()))?;
        tracing::debug!(source = %source, "administrative action finished");
        let after = capture(source, declared, self.introspector)?;

        let overloaded = after.overloaded_functions(declared);
        if !overloaded.is_empty() {
            tracing::info!(
                source = %source,
                functions = overloaded.len(),
                "drift check rejected overloaded functions"
            );
            return Err(DriftError::OverloadedFunction { functions: overloaded });
        }

        let diff = diff(&before, &after);
        tracing::debug!(
            source = %source,
            dropped_tables = diff.dropped_tables.len(),
            altered_tables = diff.altered_tables.len(),
            dropped_functions = diff.dropped_functions.len(),
            altered_functions = diff.altered_functions.len(),
            "computed schema diff"
        );

        let impact = analyze(source, &diff, &published.cache.dependencies);
        tracing::debug!(
            direct = impact.direct.len(),
            indirect = impact.indirect.len(),
            "computed drift impact"
        );
        if !impact.indirect.is_empty() && !cascade {
            tracing::info!(
                source = %source,
                dependents = impact.indirect.len(),
                "drift check aborted"
            );
            return Err(DriftError::IndirectDependencies {
                dependents: impact.indirect.into_iter().collect(),
            });
        }

        let updater = reconcile(source, declared, &diff, &impact, &published.cache);
        let purged: BTreeSet<MetadataObjId> =
            impact.direct.union(&impact.indirect).cloned().collect();

        let policy = self.policy;
        let invalidations = CacheInvalidations::default().reload_source(source.clone());
        let overlay = SourceOverlay {
            source,
            introspector: self.introspector,
        };
        let check = |previous: &Snapshot, cache: &SchemaCache| {
            let new: Vec<InconsistentObject> = cache
                .inconsistencies
                .new_since(&previous.cache.inconsistencies)
                .filter(|o| !purged.contains(&o.id))
                .cloned()
                .collect();
            match policy {
                NewInconsistencyPolicy::Fatal if !new.is_empty() => {
                    let ids: Vec<String> = new.iter().map(|o| o.id.to_string()).collect();
                    Err(DriftError::from(InternalError::new(format!(
                        "rebuild after schema change introduced new inconsistencies: {}",
                        ids.join(", ")
                    ))))
                }
                _ => Ok(new),
            }
        };
        let (snapshot, new_inconsistencies) =
            self.handle.rebuild_checked(&updater, &invalidations, Some(overlay), check)?;

        tracing::info!(
            source = %source,
            purged = purged.len(),
            edits = updater.len(),
            new_inconsistencies = new_inconsistencies.len(),
            "drift check applied"
        );
        Ok(DriftOutcome {
            value,
            diff,
            impact,
            updater,
            purged,
            cache: Arc::clone(&snapshot.cache),
            new_inconsistencies,
        })
    }
}

/// The metadata edits that bring the document in line with a diff: purge the
/// indirect dependents, follow renames, forget dropped columns, then drop the
/// vanished tables and tracked functions.
pub fn reconcile(
    source: &SourceName,
    declared: &SourceMetadata,
    diff: &SchemaDiff,
    impact: &Impact,
    cache: &SchemaCache,
) -> MetadataUpdater {
    let mut updater = MetadataUpdater::drop_inconsistent(&impact.indirect);

    let targets: Vec<RelationshipTarget> = cache
        .sources
        .get(source)
        .map(|info| {
            info.tables
                .iter()
                .flat_map(|(table, t)| {
                    t.relationships.values().map(move |r| RelationshipTarget {
                        table: table.clone(),
                        relationship: r.name.clone(),
                        remote_table: r.remote_table.clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    for (table, altered) in &diff.altered_tables {
        for renamed in &altered.renamed_columns {
            updater.push(MetadataUpdate::RenameColumn(ColumnRename {
                source: source.clone(),
                table: table.clone(),
                from: renamed.from.clone(),
                to: renamed.to.clone(),
                relationship_targets: targets.clone(),
            }));
        }
        for column in &altered.dropped_columns {
            updater.push(MetadataUpdate::DropColumn {
                source: source.clone(),
                table: table.clone(),
                column: column.clone(),
            });
        }
    }
    for table in &diff.dropped_tables {
        updater.push(MetadataUpdate::DropObject {
            id: MetadataObjId::Table {
                source: source.clone(),
                table: table.clone(),
            },
        });
    }
    for function in diff.dropped_functions.iter().filter(|f| declared.functions.contains_key(*f)) {
        updater.push(MetadataUpdate::DropObject {
            id: MetadataObjId::Function {
                source: source.clone(),
                function: function.clone(),
            },
        });
    }
    updater
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{RenamedColumn, TableDiff};
    use serde_json::json;
    use strata_metadata::{PermissionKind, RelationshipKind};

    fn declared() -> SourceMetadata {
        serde_json::from_value(json!({
            "tables": { "author": {}, "book": {} },
            "functions": { "search_books": {} }
        }))
        .unwrap()
    }

    #[test]
    fn reconcile_orders_edits() {
        let source = SourceName::new("default");
        let mut book = TableDiff::default();
        book.renamed_columns.push(RenamedColumn {
            from: "title".into(),
            to: "name".into(),
        });
        book.dropped_columns.push("isbn".into());
        let diff = SchemaDiff {
            dropped_tables: vec!["author".into()],
            altered_tables: [("book".into(), book)].into_iter().collect(),
            dropped_functions: vec!["search_books".into(), "author_full_name".into()],
            ..SchemaDiff::default()
        };
        let relationship = MetadataObjId::Relationship {
            source: source.clone(),
            table: "book".into(),
            name: "author".into(),
            kind: RelationshipKind::Object,
        };
        let impact = Impact {
            direct: [MetadataObjId::Permission {
                source: source.clone(),
                table: "author".into(),
                role: "user".into(),
                kind: PermissionKind::Select,
            }]
            .into_iter()
            .collect(),
            indirect: [relationship.clone()].into_iter().collect(),
        };
        let updater = reconcile(&source, &declared(), &diff, &impact, &SchemaCache::default());
        let kinds: Vec<&str> = updater
            .updates
            .iter()
            .map(|u| match u {
                MetadataUpdate::DropObject { .. } => "drop",
                MetadataUpdate::DropColumn { .. } => "drop_column",
                MetadataUpdate::RenameColumn(_) => "rename",
            })
            .collect();
        assert_eq!(kinds, vec!["drop", "rename", "drop_column", "drop", "drop"]);
        assert_eq!(updater.updates[0], MetadataUpdate::DropObject { id: relationship });
    }
}
