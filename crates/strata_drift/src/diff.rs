//! Classification of the differences between two schema snapshots.
//!
//! Columns are matched by ordinal position: a column that keeps its position
//! but changes its name was renamed, a position that disappears was dropped
//! and a new position was added.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use strata_common::{ColumnName, ConstraintName, FunctionName, TableName};
use strata_schema::{ColumnDescriptor, FunctionDescriptor, TableDescriptor, Volatility};

use crate::snapshot::SchemaSnapshot;

/// A column that kept its position under a new name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RenamedColumn {
    /// Name before the action.
    pub from: ColumnName,
    /// Name after the action.
    pub to: ColumnName,
}

/// A column whose database type changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TypeChange {
    /// The column, as named before the action.
    pub column: ColumnName,
    /// Type before the action.
    pub from: String,
    /// Type after the action.
    pub to: String,
}

/// Changes to one table that still exists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TableDiff {
    /// New columns.
    pub added_columns: Vec<ColumnName>,
    /// Columns that no longer exist.
    pub dropped_columns: Vec<ColumnName>,
    /// Renamed columns.
    pub renamed_columns: Vec<RenamedColumn>,
    /// Columns with a new type.
    pub type_changes: Vec<TypeChange>,
    /// Foreign keys that no longer exist.
    pub dropped_foreign_keys: Vec<ConstraintName>,
}

impl TableDiff {
    /// Returns `true` if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.dropped_columns.is_empty()
            && self.renamed_columns.is_empty()
            && self.type_changes.is_empty()
            && self.dropped_foreign_keys.is_empty()
    }
}

/// Changes to one function that still exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionDiff {
    /// Argument types or return type changed.
    pub signature_changed: bool,
    /// Volatility before and after, if it changed.
    pub volatility: Option<(Volatility, Volatility)>,
}

/// Everything that changed in the tracked part of a source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    /// Tables that no longer exist.
    pub dropped_tables: Vec<TableName>,
    /// Tables that changed.
    pub altered_tables: BTreeMap<TableName, TableDiff>,
    /// Functions that no longer exist.
    pub dropped_functions: Vec<FunctionName>,
    /// Functions that changed.
    pub altered_functions: BTreeMap<FunctionName, FunctionDiff>,
}

impl SchemaDiff {
    /// Returns `true` if the action left the tracked schema untouched.
    pub fn is_empty(&self) -> bool {
        self.dropped_tables.is_empty()
            && self.altered_tables.is_empty()
            && self.dropped_functions.is_empty()
            && self.altered_functions.is_empty()
    }
}

/// Compares the snapshots taken before and after an action.
pub fn diff(before: &SchemaSnapshot, after: &SchemaSnapshot) -> SchemaDiff {
    let mut result = SchemaDiff::default();
    for (name, old) in &before.tables {
        match after.tables.get(name) {
            None => result.dropped_tables.push(name.clone()),
            Some(new) => {
                let table = diff_table(old, new);
                if !table.is_empty() {
                    result.altered_tables.insert(name.clone(), table);
                }
            }
        }
    }
    for (name, old) in &before.functions {
        match (old.first(), after.functions.get(name).and_then(|f| f.first())) {
            (Some(_), None) => result.dropped_functions.push(name.clone()),
            (Some(old), Some(new)) => {
                if let Some(function) = diff_function(old, new) {
                    result.altered_functions.insert(name.clone(), function);
                }
            }
            (None, _) => {}
        }
    }
    result
}

fn diff_table(before: &TableDescriptor, after: &TableDescriptor) -> TableDiff {
    let by_position: BTreeMap<u32, &ColumnDescriptor> =
        after.columns.iter().map(|c| (c.position, c)).collect();
    let old_positions: BTreeSet<u32> = before.columns.iter().map(|c| c.position).collect();

    let mut table = TableDiff::default();
    for old in &before.columns {
        let Some(new) = by_position.get(&old.position) else {
            table.dropped_columns.push(old.name.clone());
            continue;
        };
        if new.name != old.name {
            table.renamed_columns.push(RenamedColumn {
                from: old.name.clone(),
                to: new.name.clone(),
            });
        }
        if new.ty != old.ty {
            table.type_changes.push(TypeChange {
                column: old.name.clone(),
                from: old.ty.clone(),
                to: new.ty.clone(),
            });
        }
    }
    table.added_columns = after
        .columns
        .iter()
        .filter(|c| !old_positions.contains(&c.position))
        .map(|c| c.name.clone())
        .collect();

    let live: BTreeSet<&ConstraintName> =
        after.foreign_keys.iter().map(|fk| &fk.constraint).collect();
    table.dropped_foreign_keys = before
        .foreign_keys
        .iter()
        .filter(|fk| !live.contains(&fk.constraint))
        .map(|fk| fk.constraint.clone())
        .collect();
    table
}

fn diff_function(before: &FunctionDescriptor, after: &FunctionDescriptor) -> Option<FunctionDiff> {
    let arguments = |f: &FunctionDescriptor| {
        f.arguments.iter().map(|a| a.ty.clone()).collect::<Vec<_>>()
    };
    let signature_changed = arguments(before) != arguments(after)
        || before.returns_table != after.returns_table
        || before.returns_set != after.returns_set;
    let volatility = (before.volatility != after.volatility)
        .then_some((before.volatility, after.volatility));
    (signature_changed || volatility.is_some()).then_some(FunctionDiff {
        signature_changed,
        volatility,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{function, table};

    fn snapshot(
        tables: Vec<TableDescriptor>,
        functions: Vec<FunctionDescriptor>,
    ) -> SchemaSnapshot {
        SchemaSnapshot {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
            functions: functions
                .into_iter()
                .map(|f| (f.name.clone(), vec![f]))
                .collect(),
        }
    }

    #[test]
    fn identical_snapshots_have_no_diff() {
        let before = snapshot(
            vec![table("author", &[("id", "integer")])],
            vec![function("find", &["text"])],
        );
        assert!(diff(&before, &before.clone()).is_empty());
    }

    #[test]
    fn columns_match_by_position() {
        let before = snapshot(
            vec![table("author", &[("id", "integer"), ("name", "text"), ("age", "integer")])],
            Vec::new(),
        );
        let after = snapshot(
            vec![table("author", &[("id", "bigint"), ("full_name", "text")])],
            Vec::new(),
        );
        let result = diff(&before, &after);
        let author = &result.altered_tables[&TableName::new("author")];
        assert_eq!(
            author.renamed_columns,
            vec![RenamedColumn {
                from: "name".into(),
                to: "full_name".into()
            }]
        );
        assert_eq!(author.dropped_columns, vec![ColumnName::new("age")]);
        assert_eq!(author.type_changes[0].column, ColumnName::new("id"));
        assert_eq!(author.type_changes[0].to, "bigint");
        assert!(author.added_columns.is_empty());
    }

    #[test]
    fn added_positions_are_new_columns() {
        let before = snapshot(vec![table("author", &[("id", "integer")])], Vec::new());
        let after = snapshot(
            vec![table("author", &[("id", "integer"), ("bio", "text")])],
            Vec::new(),
        );
        let result = diff(&before, &after);
        assert_eq!(
            result.altered_tables[&TableName::new("author")].added_columns,
            vec![ColumnName::new("bio")]
        );
    }

    #[test]
    fn dropped_and_altered_functions() {
        let before = snapshot(
            vec![table("author", &[("id", "integer")])],
            vec![function("find", &["text"]), function("search", &["text"])],
        );
        let after = snapshot(Vec::new(), vec![function("find", &["integer"])]);
        let result = diff(&before, &after);
        assert_eq!(result.dropped_tables, vec![TableName::new("author")]);
        assert_eq!(result.dropped_functions, vec![FunctionName::new("search")]);
        assert!(result.altered_functions[&FunctionName::new("find")].signature_changed);
    }

    #[test]
    fn volatility_change_alone_alters_a_function() {
        let before = snapshot(Vec::new(), vec![function("find", &["text"])]);
        let mut volatile = function("find", &["text"]);
        volatile.volatility = Volatility::Volatile;
        let after = snapshot(Vec::new(), vec![volatile]);
        let result = diff(&before, &after);
        let find = &result.altered_functions[&FunctionName::new("find")];
        assert!(!find.signature_changed);
        assert_eq!(find.volatility, Some((Volatility::Stable, Volatility::Volatile)));
    }
}
