//! Compilation of one tracked table and everything layered on it.
//!
//! The base layer (columns, keys, naming) comes from the live catalog. The
//! layers above it (relationships, computed fields, permissions, event
//! triggers) only look at other tables through keyed catalog lookups, so the
//! order tables are compiled in never matters and a table's compilation can
//! run on its own thread.

use std::collections::BTreeMap;

use serde_json::Value;
use strata_common::{ColumnName, TableName};
use strata_metadata::{
    DependencyReason, MetadataObjId, SchemaDependency, SchemaObjId, TableMetadata,
};

use crate::computed_field::compile_computed_fields;
use crate::context::{BuildContext, CollectLog};
use crate::errors;
use crate::event_trigger::compile_event_triggers;
use crate::introspect::TableDescriptor;
use crate::permission::{compile_permissions, PermissionScope};
use crate::relationship::compile_relationships;
use crate::schema_cache::{ColumnInfo, TableInfo};
use crate::source::SourceView;

/// A compiled table as stored in the table memo.
#[derive(Clone, Debug, PartialEq)]
pub struct TableBuild {
    /// The table, if its base layer compiled.
    pub info: Option<TableInfo>,
    /// Everything collected while compiling the table and its children.
    pub log: CollectLog,
}

/// Maps a database type to the API scalar exposing it.
pub fn scalar_type(ty: &str, stringify_numeric_types: bool) -> String {
    let scalar = match ty {
        "smallint" | "integer" | "int" | "int2" | "int4" | "serial" | "smallserial" => "Int",
        "bigint" | "int8" | "bigserial" if stringify_numeric_types => "String",
        "bigint" | "int8" | "bigserial" => "bigint",
        "numeric" | "decimal" if stringify_numeric_types => "String",
        "numeric" | "decimal" => "numeric",
        "real" | "double precision" | "float4" | "float8" => "Float",
        "boolean" | "bool" => "Boolean",
        "text" | "varchar" | "character varying" | "char" | "character" | "citext" => "String",
        other => return other.to_string(),
    };
    scalar.to_string()
}

/// Compiles a tracked table.
///
/// If the table itself is rejected, its children are still recorded with
/// their parent edge so that the resolver quarantines them with it.
pub fn compile_table(
    ctx: &BuildContext<'_>,
    view: &SourceView<'_>,
    name: &TableName,
    declared: &TableMetadata,
) -> TableBuild {
    let mut log = CollectLog::new();
    let id = MetadataObjId::Table {
        source: view.name.clone(),
        table: name.clone(),
    };
    let base = view
        .live_table(name)
        .ok_or_else(|| errors::missing_table(name))
        .and_then(|live| compile_columns(ctx, name, declared, live).map(|columns| (live, columns)));
    let (live, columns) = match base {
        Ok(base) => base,
        Err(reason) => {
            let definition = serde_json::to_value(declared).unwrap_or(Value::Null);
            log.reject(id, definition, reason);
            record_orphans(view, name, declared, &mut log);
            return TableBuild { info: None, log };
        }
    };

    let mut provides = vec![SchemaObjId::table_of(view.name, name)];
    provides.extend(columns.keys().map(|c| SchemaObjId::column(view.name, name, c)));
    provides.extend(live.foreign_keys.iter().map(|fk| SchemaObjId::ForeignKey {
        source: view.name.clone(),
        table: name.clone(),
        constraint: fk.constraint.clone(),
    }));
    log.record(
        id,
        provides,
        vec![SchemaDependency::new(
            SchemaObjId::Source {
                source: view.name.clone(),
            },
            DependencyReason::Parent,
        )],
    );

    let relationships = compile_relationships(view, name, declared, &columns, &mut log);
    let computed_fields =
        compile_computed_fields(view, name, declared, &columns, &relationships, &mut log);
    let permissions = compile_permissions(
        &PermissionScope {
            view,
            table: name,
            columns: &columns,
            computed_fields: &computed_fields,
        },
        declared,
        &mut log,
    );
    let event_triggers = compile_event_triggers(view, name, declared, &columns, &mut log);

    let info = TableInfo {
        name: name.clone(),
        graphql_name: declared
            .configuration
            .custom_name
            .clone()
            .unwrap_or_else(|| name.to_string()),
        columns,
        primary_key: live.primary_key.clone(),
        foreign_keys: live
            .foreign_keys
            .iter()
            .map(|fk| (fk.constraint.clone(), fk.clone()))
            .collect(),
        relationships,
        computed_fields,
        permissions,
        event_triggers,
    };
    TableBuild {
        info: Some(info),
        log,
    }
}

fn compile_columns(
    ctx: &BuildContext<'_>,
    name: &TableName,
    declared: &TableMetadata,
    live: &TableDescriptor,
) -> Result<BTreeMap<ColumnName, ColumnInfo>, String> {
    let config = &declared.configuration.column_config;
    if let Some(unknown) = config.keys().find(|c| live.column(c).is_none()) {
        return Err(format!(
            "custom column name configured for a column that does not exist: {}",
            errors::missing_column(unknown, name)
        ));
    }

    let mut columns = BTreeMap::new();
    let mut exposed: BTreeMap<String, &ColumnName> = BTreeMap::new();
    for column in &live.columns {
        let graphql_name = config
            .get(&column.name)
            .and_then(|c| c.custom_name.clone())
            .unwrap_or_else(|| column.name.to_string());
        if let Some(other) = exposed.insert(graphql_name.clone(), &column.name) {
            return Err(format!(
                "columns \"{other}\" and \"{}\" are both exposed as \"{graphql_name}\"",
                column.name
            ));
        }
        columns.insert(
            column.name.clone(),
            ColumnInfo {
                name: column.name.clone(),
                graphql_type: scalar_type(&column.ty, ctx.stringify_numeric_types()),
                graphql_name,
                ty: column.ty.clone(),
                nullable: column.nullable,
                position: column.position,
            },
        );
    }
    Ok(columns)
}

fn record_orphans(
    view: &SourceView<'_>,
    name: &TableName,
    declared: &TableMetadata,
    log: &mut CollectLog,
) {
    let parent =
        SchemaDependency::new(SchemaObjId::table_of(view.name, name), DependencyReason::Parent);
    for child in declared.child_ids(view.name, name) {
        log.record(child, Vec::new(), vec![parent.clone()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{IntrospectionError, RemoteSchemaDescriptor, RemoteSchemaIntrospector};
    use crate::testing::{catalog, source_metadata};
    use serde_json::json;
    use std::time::Duration;
    use strata_common::{RemoteSchemaName, SourceName};
    use strata_config::StrataConfig;
    use strata_metadata::RemoteSchemaDefinition;

    struct NoRemote;

    impl RemoteSchemaIntrospector for NoRemote {
        fn introspect(
            &self,
            _: &RemoteSchemaName,
            _: &RemoteSchemaDefinition,
            _: Duration,
        ) -> Result<RemoteSchemaDescriptor, IntrospectionError> {
            unreachable!()
        }
    }

    fn compile(table: &str, tables: Value, config: StrataConfig) -> TableBuild {
        let name = SourceName::new("default");
        let metadata = source_metadata(json!({ "tables": tables }));
        let catalog = catalog();
        let view = SourceView::new(&name, &metadata, &catalog);
        let ctx = BuildContext::new(&config, &NoRemote);
        let table = TableName::new(table);
        compile_table(&ctx, &view, &table, &metadata.tables[&table])
    }

    #[test]
    fn table_provides_columns_and_keys() {
        let build = compile("book", json!({ "book": {} }), StrataConfig::default());
        let info = build.info.unwrap();
        assert_eq!(info.columns.len(), 3);
        let provides = &build.log.objects[0].provides;
        assert!(provides.contains(&SchemaObjId::ForeignKey {
            source: "default".into(),
            table: "book".into(),
            constraint: "book_author_id_fkey".into(),
        }));
        assert_eq!(provides.len(), 1 + 3 + 1);
    }

    #[test]
    fn untracked_children_of_missing_table_are_orphaned() {
        let build = compile(
            "publisher",
            json!({ "publisher": { "select_permissions": { "user": { "columns": "*" } } } }),
            StrataConfig::default(),
        );
        assert!(build.info.is_none());
        assert!(build.log.inconsistencies[0].reasons[0].contains("does not exist in the source"));
        assert_eq!(build.log.objects.len(), 1);
        assert_eq!(build.log.objects[0].dependencies[0].reason, DependencyReason::Parent);
    }

    #[test]
    fn custom_column_names_must_not_collide() {
        let build = compile(
            "author",
            json!({ "author": { "configuration": { "column_config": { "name": { "custom_name": "id" } } } } }),
            StrataConfig::default(),
        );
        assert!(build.info.is_none());
        assert!(build.log.inconsistencies[0].reasons[0].contains("both exposed as \"id\""));
    }

    #[test]
    fn custom_names_are_applied() {
        let build = compile(
            "author",
            json!({ "author": { "configuration": {
                "custom_name": "writers",
                "column_config": { "name": { "custom_name": "fullName" } }
            } } }),
            StrataConfig::default(),
        );
        let info = build.info.unwrap();
        assert_eq!(info.graphql_name, "writers");
        assert_eq!(info.columns[&ColumnName::new("name")].graphql_name, "fullName");
    }

    #[test]
    fn numeric_types_can_be_stringified() {
        assert_eq!(scalar_type("bigint", false), "bigint");
        assert_eq!(scalar_type("bigint", true), "String");
        assert_eq!(scalar_type("integer", true), "Int");
        assert_eq!(scalar_type("uuid", false), "uuid");
    }
}
