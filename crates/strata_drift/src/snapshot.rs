//! Capture of the tracked part of a source's live schema.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use strata_common::{FunctionName, SourceName, TableName};
use strata_metadata::SourceMetadata;
use strata_schema::{FunctionDescriptor, SourceIntrospector, TableDescriptor};

use crate::error::DriftError;

/// Live tables and functions of one source, restricted to the ones the
/// metadata tracks or computes fields with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    /// Tracked tables that exist.
    pub tables: BTreeMap<TableName, TableDescriptor>,
    /// Every live signature of each tracked or computed-field function that
    /// exists.
    pub functions: BTreeMap<FunctionName, Vec<FunctionDescriptor>>,
}

impl SchemaSnapshot {
    /// Restricts a listing to the objects tracked by `declared`.
    pub fn restrict(
        declared: &SourceMetadata,
        tables: Vec<TableDescriptor>,
        functions: Vec<FunctionDescriptor>,
    ) -> Self {
        let referenced: BTreeSet<&FunctionName> = declared
            .functions
            .keys()
            .chain(
                declared
                    .tables
                    .values()
                    .flat_map(|t| t.computed_fields.values().map(|f| &f.function)),
            )
            .collect();
        let mut snapshot = Self::default();
        for mut table in tables {
            if declared.tables.contains_key(&table.name) {
                table.columns.sort_by_key(|c| c.position);
                snapshot.tables.insert(table.name.clone(), table);
            }
        }
        for function in functions {
            if referenced.contains(&function.name) {
                snapshot
                    .functions
                    .entry(function.name.clone())
                    .or_default()
                    .push(function);
            }
        }
        snapshot
    }

    /// Functions tracked by `declared` with more than one live signature.
    pub fn overloaded_functions(&self, declared: &SourceMetadata) -> Vec<FunctionName> {
        self.functions
            .iter()
            .filter(|(name, signatures)| {
                signatures.len() > 1 && declared.functions.contains_key(*name)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Lists the live schema of `source` and keeps the tracked part.
pub fn capture(
    source: &SourceName,
    declared: &SourceMetadata,
    introspector: &dyn SourceIntrospector,
) -> Result<SchemaSnapshot, DriftError> {
    let failed = |error| DriftError::Snapshot {
        name: source.clone(),
        error,
    };
    let tables = introspector
        .list_tables(source, &declared.configuration)
        .map_err(failed)?;
    let functions = introspector
        .list_functions(source, &declared.configuration)
        .map_err(failed)?;
    let snapshot = SchemaSnapshot::restrict(declared, tables, functions);
    tracing::debug!(
        source = %source,
        tables = snapshot.tables.len(),
        functions = snapshot.functions.len(),
        "captured schema snapshot"
    );
    Ok(snapshot)
}
