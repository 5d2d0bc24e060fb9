//! Impact of a schema diff on the objects of the last cache.
//!
//! The roots are the dropped tables with everything they contain, dropped
//! columns and foreign keys, columns whose type changed, and dropped or
//! altered functions. Renames are not roots: the metadata updater rewrites
//! every reference to the old name.

use std::collections::BTreeSet;

use serde::Serialize;
use strata_common::{FunctionName, SourceName, TableName};
use strata_metadata::{DependencyReason, MetadataObjId, SchemaDependency, SchemaObjId};
use strata_schema::DependencyGraph;

use crate::diff::SchemaDiff;

/// Objects affected by a diff.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Impact {
    /// Dropped tables and functions with the objects declared on them. These
    /// leave the metadata together with their owner.
    pub direct: BTreeSet<MetadataObjId>,
    /// Everything else that depends, directly or transitively, on a changed
    /// element. Removing these needs the caller's consent.
    pub indirect: BTreeSet<MetadataObjId>,
}

struct Roots<'a> {
    source: &'a SourceName,
    diff: &'a SchemaDiff,
    dropped_tables: BTreeSet<&'a TableName>,
    dropped_functions: BTreeSet<&'a FunctionName>,
}

impl<'a> Roots<'a> {
    fn new(source: &'a SourceName, diff: &'a SchemaDiff) -> Self {
        Self {
            source,
            diff,
            dropped_tables: diff.dropped_tables.iter().collect(),
            dropped_functions: diff.dropped_functions.iter().collect(),
        }
    }

    fn in_source(&self, source: &SourceName) -> bool {
        source == self.source
    }

    fn function_changed(&self, function: &FunctionName) -> bool {
        self.dropped_functions.contains(function)
            || self.diff.altered_functions.contains_key(function)
    }

    fn hits(&self, dep: &SchemaDependency) -> bool {
        if let Some((source, table)) = dep.target.table() {
            if self.in_source(source) && self.dropped_tables.contains(table) {
                return true;
            }
        }
        match &dep.target {
            SchemaObjId::Column { source, table, column } if self.in_source(source) => {
                let Some(altered) = self.diff.altered_tables.get(table) else {
                    return false;
                };
                let retyped = altered.type_changes.iter().any(|c| &c.column == column);
                let joins_or_types = matches!(
                    dep.reason,
                    DependencyReason::LeftColumn
                        | DependencyReason::RightColumn
                        | DependencyReason::OnType
                );
                altered.dropped_columns.contains(column) || (retyped && joins_or_types)
            }
            SchemaObjId::ForeignKey {
                source,
                table,
                constraint,
            } if self.in_source(source) => self
                .diff
                .altered_tables
                .get(table)
                .is_some_and(|t| t.dropped_foreign_keys.contains(constraint)),
            SchemaObjId::CatalogFunction { source, function }
            | SchemaObjId::Function { source, function }
                if self.in_source(source) =>
            {
                self.function_changed(function)
            }
            _ => false,
        }
    }

    /// The tracked function of the changed function and the permissions on
    /// it, if `id` is one of those.
    fn function_of<'b>(&self, id: &'b MetadataObjId) -> Option<&'b FunctionName> {
        match id {
            MetadataObjId::Function { source, function }
            | MetadataObjId::FunctionPermission { source, function, .. }
                if self.in_source(source) && self.function_changed(function) =>
            {
                Some(function)
            }
            _ => None,
        }
    }

    fn in_dropped_table(&self, id: &MetadataObjId) -> bool {
        match id {
            MetadataObjId::Table { source, table } => {
                self.in_source(source) && self.dropped_tables.contains(table)
            }
            other => other.owner_table().is_some_and(|(source, table)| {
                self.in_source(source) && self.dropped_tables.contains(table)
            }),
        }
    }
}

/// Computes the objects of `graph` affected by `diff` on `source`.
///
/// Altered functions stay tracked and are recompiled by the rebuild, so
/// neither they nor their permissions are listed.
pub fn analyze(source: &SourceName, diff: &SchemaDiff, graph: &DependencyGraph) -> Impact {
    let roots = Roots::new(source, diff);
    let mut affected = graph.direct_dependents(|dep| roots.hits(dep));
    for table in &diff.dropped_tables {
        let id = MetadataObjId::Table {
            source: source.clone(),
            table: table.clone(),
        };
        if graph.contains(&id) {
            affected.insert(id);
        }
    }
    let transitive = graph.transitive_dependents(&affected);
    affected.extend(transitive);

    let mut impact = Impact::default();
    for id in affected {
        match roots.function_of(&id) {
            Some(function) if roots.dropped_functions.contains(function) => {
                impact.direct.insert(id);
            }
            Some(_) => {}
            None if roots.in_dropped_table(&id) => {
                impact.direct.insert(id);
            }
            None => {
                impact.indirect.insert(id);
            }
        }
    }
    impact
}
