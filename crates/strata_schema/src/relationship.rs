//! Object and array relationships of a tracked table.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use strata_common::{ColumnName, ConstraintName, RelationshipName, TableName};
use strata_metadata::{
    DependencyReason, MetadataObjId, RelationshipJoin, RelationshipKind, SchemaDependency,
    SchemaObjId, TableMetadata,
};

use crate::context::CollectLog;
use crate::errors;
use crate::schema_cache::{ColumnInfo, RelationshipInfo};
use crate::source::{foreign_key_on, SourceView};

struct ResolvedJoin {
    remote_table: TableName,
    column_mapping: BTreeMap<ColumnName, ColumnName>,
    constraint: Option<ConstraintName>,
    dependencies: Vec<SchemaDependency>,
}

/// Compiles every relationship declared on `table`.
pub fn compile_relationships(
    view: &SourceView<'_>,
    table: &TableName,
    declared: &TableMetadata,
    columns: &BTreeMap<ColumnName, ColumnInfo>,
    log: &mut CollectLog,
) -> BTreeMap<RelationshipName, RelationshipInfo> {
    let mut compiled = BTreeMap::new();
    let objects = declared
        .object_relationships
        .iter()
        .map(|(name, r)| (name, RelationshipKind::Object, r.join(), definition(r)));
    let arrays = declared
        .array_relationships
        .iter()
        .map(|(name, r)| (name, RelationshipKind::Array, r.join(), definition(r)));

    for (name, kind, join, definition) in objects.chain(arrays) {
        let id = MetadataObjId::Relationship {
            source: view.name.clone(),
            table: table.clone(),
            name: name.clone(),
            kind,
        };
        if columns.contains_key(name.as_str()) {
            log.reject(id, definition, errors::conflicts_with_column("relationship", name));
            continue;
        }
        if kind == RelationshipKind::Array && declared.object_relationships.contains_key(name) {
            log.reject(
                id,
                definition,
                format!("relationship name \"{name}\" is already used by an object relationship"),
            );
            continue;
        }
        let resolved = match resolve_join(view, table, join) {
            Ok(resolved) => resolved,
            Err(reason) => {
                log.reject(id, definition, reason);
                continue;
            }
        };
        let mut dependencies = vec![SchemaDependency::new(
            SchemaObjId::table_of(view.name, table),
            DependencyReason::Parent,
        )];
        dependencies.extend(resolved.dependencies);
        log.record(
            id,
            vec![SchemaObjId::Relationship {
                source: view.name.clone(),
                table: table.clone(),
                name: name.clone(),
            }],
            dependencies,
        );
        compiled.insert(
            name.clone(),
            RelationshipInfo {
                name: name.clone(),
                kind,
                remote_table: resolved.remote_table,
                column_mapping: resolved.column_mapping,
                constraint: resolved.constraint,
            },
        );
    }
    compiled
}

fn definition<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn resolve_join(
    view: &SourceView<'_>,
    table: &TableName,
    join: RelationshipJoin<'_>,
) -> Result<ResolvedJoin, String> {
    let source = view.name;
    let live = view
        .live_table(table)
        .ok_or_else(|| errors::missing_table(table))?;
    let mut dependencies = Vec::new();

    match join {
        RelationshipJoin::LocalForeignKey(column) => {
            if live.column(column).is_none() {
                return Err(errors::missing_column(column, table));
            }
            let fk = foreign_key_on(live, column).ok_or_else(|| {
                format!("no foreign-key constraint exists on column \"{column}\"")
            })?;
            for (local, remote) in &fk.column_mapping {
                dependencies.push(SchemaDependency::new(
                    SchemaObjId::column(source, table, local),
                    DependencyReason::LeftColumn,
                ));
                dependencies.push(SchemaDependency::new(
                    SchemaObjId::column(source, &fk.foreign_table, remote),
                    DependencyReason::RightColumn,
                ));
            }
            dependencies.push(SchemaDependency::new(
                SchemaObjId::ForeignKey {
                    source: source.clone(),
                    table: table.clone(),
                    constraint: fk.constraint.clone(),
                },
                DependencyReason::ForeignKey,
            ));
            dependencies.push(SchemaDependency::new(
                SchemaObjId::table_of(source, &fk.foreign_table),
                DependencyReason::RemoteTable,
            ));
            Ok(ResolvedJoin {
                remote_table: fk.foreign_table.clone(),
                column_mapping: fk.column_mapping.clone(),
                constraint: Some(fk.constraint.clone()),
                dependencies,
            })
        }
        RelationshipJoin::RemoteForeignKey(reference) => {
            let remote = view
                .live_table(&reference.table)
                .ok_or_else(|| errors::missing_table(&reference.table))?;
            if remote.column(&reference.column).is_none() {
                return Err(errors::missing_column(&reference.column, &reference.table));
            }
            let fk = remote
                .foreign_keys
                .iter()
                .find(|fk| {
                    fk.column_mapping.contains_key(&reference.column)
                        && &fk.foreign_table == table
                })
                .ok_or_else(|| {
                    format!(
                        "no foreign-key constraint on column \"{}\" of table \"{}\" references table \"{table}\"",
                        reference.column, reference.table
                    )
                })?;
            let mut column_mapping = BTreeMap::new();
            for (remote_column, local_column) in &fk.column_mapping {
                dependencies.push(SchemaDependency::new(
                    SchemaObjId::column(source, table, local_column),
                    DependencyReason::LeftColumn,
                ));
                dependencies.push(SchemaDependency::new(
                    SchemaObjId::column(source, &reference.table, remote_column),
                    DependencyReason::RightColumn,
                ));
                column_mapping.insert(local_column.clone(), remote_column.clone());
            }
            dependencies.push(SchemaDependency::new(
                SchemaObjId::ForeignKey {
                    source: source.clone(),
                    table: reference.table.clone(),
                    constraint: fk.constraint.clone(),
                },
                DependencyReason::ForeignKey,
            ));
            dependencies.push(SchemaDependency::new(
                SchemaObjId::table_of(source, &reference.table),
                DependencyReason::RemoteTable,
            ));
            Ok(ResolvedJoin {
                remote_table: reference.table.clone(),
                column_mapping,
                constraint: Some(fk.constraint.clone()),
                dependencies,
            })
        }
        RelationshipJoin::Manual(manual) => {
            if manual.column_mapping.is_empty() {
                return Err("column mapping must not be empty".to_string());
            }
            let remote = view
                .live_table(&manual.remote_table)
                .ok_or_else(|| errors::missing_table(&manual.remote_table))?;
            for (local, remote_column) in &manual.column_mapping {
                if live.column(local).is_none() {
                    return Err(errors::missing_column(local, table));
                }
                if remote.column(remote_column).is_none() {
                    return Err(errors::missing_column(remote_column, &manual.remote_table));
                }
                dependencies.push(SchemaDependency::new(
                    SchemaObjId::column(source, table, local),
                    DependencyReason::LeftColumn,
                ));
                dependencies.push(SchemaDependency::new(
                    SchemaObjId::column(source, &manual.remote_table, remote_column),
                    DependencyReason::RightColumn,
                ));
            }
            dependencies.push(SchemaDependency::new(
                SchemaObjId::table_of(source, &manual.remote_table),
                DependencyReason::RemoteTable,
            ));
            Ok(ResolvedJoin {
                remote_table: manual.remote_table.clone(),
                column_mapping: manual.column_mapping.clone(),
                constraint: None,
                dependencies,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{catalog, source_metadata};
    use serde_json::json;
    use strata_common::SourceName;

    fn columns(names: &[&str]) -> BTreeMap<ColumnName, ColumnInfo> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| {
                (
                    ColumnName::new(*n),
                    ColumnInfo {
                        name: ColumnName::new(*n),
                        graphql_name: n.to_string(),
                        ty: "integer".to_string(),
                        graphql_type: "Int".to_string(),
                        nullable: false,
                        position: i as u32 + 1,
                    },
                )
            })
            .collect()
    }

    fn compile(
        table: &str,
        declared: Value,
        cols: &[&str],
    ) -> (BTreeMap<RelationshipName, RelationshipInfo>, CollectLog) {
        let name = SourceName::new("default");
        let metadata = source_metadata(json!({ "tables": { table: declared } }));
        let catalog = catalog();
        let view = SourceView::new(&name, &metadata, &catalog);
        let mut log = CollectLog::new();
        let table = TableName::new(table);
        let declared = &metadata.tables[&table];
        let compiled = compile_relationships(&view, &table, declared, &columns(cols), &mut log);
        (compiled, log)
    }

    #[test]
    fn object_relationship_over_local_foreign_key() {
        let (compiled, log) = compile(
            "book",
            json!({ "object_relationships": { "author": { "using": { "foreign_key_constraint_on": "author_id" } } } }),
            &["id", "author_id", "title"],
        );
        let author = &compiled[&RelationshipName::new("author")];
        assert_eq!(author.remote_table.as_str(), "author");
        assert_eq!(author.constraint.as_ref().map(|c| c.as_str()), Some("book_author_id_fkey"));
        let deps = &log.objects[0].dependencies;
        for reason in [
            DependencyReason::Parent,
            DependencyReason::LeftColumn,
            DependencyReason::RightColumn,
            DependencyReason::ForeignKey,
            DependencyReason::RemoteTable,
        ] {
            assert!(deps.iter().any(|d| d.reason == reason), "missing {reason}");
        }
    }

    #[test]
    fn array_relationship_reverses_mapping() {
        let (compiled, log) = compile(
            "author",
            json!({ "array_relationships": { "books": { "using": { "foreign_key_constraint_on": {
                "table": "book", "column": "author_id"
            } } } } }),
            &["id", "name"],
        );
        assert!(log.inconsistencies.is_empty());
        let books = &compiled[&RelationshipName::new("books")];
        assert_eq!(
            books.column_mapping.get(&ColumnName::new("id")).map(|c| c.as_str()),
            Some("author_id")
        );
    }

    #[test]
    fn name_conflict_with_column() {
        let (compiled, log) = compile(
            "book",
            json!({ "object_relationships": { "title": { "using": { "foreign_key_constraint_on": "author_id" } } } }),
            &["id", "author_id", "title"],
        );
        assert!(compiled.is_empty());
        assert!(log.inconsistencies[0].reasons[0].contains("conflicts with a column"));
    }

    #[test]
    fn manual_mapping_checks_both_sides() {
        let (compiled, log) = compile(
            "book",
            json!({ "object_relationships": { "writer": { "using": { "manual_configuration": {
                "remote_table": "author", "column_mapping": { "author_id": "age" }
            } } } } }),
            &["id", "author_id", "title"],
        );
        assert!(compiled.is_empty());
        assert!(log.inconsistencies[0].reasons[0]
            .ends_with("column \"age\" does not exist on table \"author\""));
    }

    #[test]
    fn missing_constraint() {
        let (_, log) = compile(
            "book",
            json!({ "object_relationships": { "named": { "using": { "foreign_key_constraint_on": "title" } } } }),
            &["id", "author_id", "title"],
        );
        assert!(log.inconsistencies[0].reasons[0].contains("no foreign-key constraint"));
    }
}
