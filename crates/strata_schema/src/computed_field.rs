//! Computed fields: table fields backed by a stored function taking the row.

use std::collections::BTreeMap;

use serde_json::Value;
use strata_common::{ColumnName, ComputedFieldName, FunctionName, RelationshipName, TableName};
use strata_metadata::{
    ComputedField, DependencyReason, MetadataObjId, SchemaDependency, SchemaObjId, TableMetadata,
};

use crate::context::CollectLog;
use crate::errors;
use crate::introspect::FunctionDescriptor;
use crate::schema_cache::{ColumnInfo, ComputedFieldInfo, RelationshipInfo};
use crate::source::SourceView;

/// Compiles every computed field declared on `table`.
pub fn compile_computed_fields(
    view: &SourceView<'_>,
    table: &TableName,
    declared: &TableMetadata,
    columns: &BTreeMap<ColumnName, ColumnInfo>,
    relationships: &BTreeMap<RelationshipName, RelationshipInfo>,
    log: &mut CollectLog,
) -> BTreeMap<ComputedFieldName, ComputedFieldInfo> {
    let mut compiled = BTreeMap::new();
    for (name, field) in &declared.computed_fields {
        let id = MetadataObjId::ComputedField {
            source: view.name.clone(),
            table: table.clone(),
            name: name.clone(),
        };
        let definition = serde_json::to_value(field).unwrap_or(Value::Null);
        match compile_one(view, table, name, field, columns, relationships) {
            Ok((info, dependencies)) => {
                log.record(
                    id,
                    vec![SchemaObjId::ComputedField {
                        source: view.name.clone(),
                        table: table.clone(),
                        name: name.clone(),
                    }],
                    dependencies,
                );
                compiled.insert(name.clone(), info);
            }
            Err(reason) => log.reject(id, definition, reason),
        }
    }
    compiled
}

fn compile_one(
    view: &SourceView<'_>,
    table: &TableName,
    name: &ComputedFieldName,
    field: &ComputedField,
    columns: &BTreeMap<ColumnName, ColumnInfo>,
    relationships: &BTreeMap<RelationshipName, RelationshipInfo>,
) -> Result<(ComputedFieldInfo, Vec<SchemaDependency>), String> {
    if columns.contains_key(name.as_str()) {
        return Err(errors::conflicts_with_column("computed field", name));
    }
    if relationships.contains_key(name.as_str()) {
        return Err(format!(
            "computed field name \"{name}\" conflicts with a relationship of the same name"
        ));
    }
    let function = single_function(view, &field.function)?;
    let (position, argument) = match &field.table_argument {
        Some(arg) => function
            .arguments
            .iter()
            .enumerate()
            .find(|(_, a)| a.name.as_deref() == Some(arg.as_str()))
            .ok_or_else(|| {
                format!("function \"{}\" has no argument named \"{arg}\"", field.function)
            })?,
        None => function
            .arguments
            .iter()
            .enumerate()
            .next()
            .ok_or_else(|| format!("function \"{}\" has no arguments", field.function))?,
    };
    let label = argument
        .name
        .clone()
        .unwrap_or_else(|| format!("${}", position + 1));
    if argument.ty != table.as_str() {
        return Err(format!(
            "argument \"{label}\" of function \"{}\" must have the row type of table \"{table}\", found \"{}\"",
            field.function, argument.ty
        ));
    }

    let mut dependencies = vec![
        SchemaDependency::new(SchemaObjId::table_of(view.name, table), DependencyReason::Parent),
        SchemaDependency::new(
            SchemaObjId::CatalogFunction {
                source: view.name.clone(),
                function: field.function.clone(),
            },
            DependencyReason::Function,
        ),
    ];
    if let Some(returns) = &function.returns_table {
        dependencies.push(SchemaDependency::new(
            SchemaObjId::table_of(view.name, returns),
            DependencyReason::ReturnType,
        ));
    }
    let info = ComputedFieldInfo {
        name: name.clone(),
        function: field.function.clone(),
        table_argument: label,
        returns_table: function.returns_table.clone(),
        returns_set: function.returns_set,
    };
    Ok((info, dependencies))
}

/// Looks up the only catalog entry of a function.
pub(crate) fn single_function<'a>(
    view: &SourceView<'a>,
    function: &FunctionName,
) -> Result<&'a FunctionDescriptor, String> {
    match view.catalog.functions.get(function).map(Vec::as_slice) {
        None | Some([]) => Err(errors::missing_function(function)),
        Some([only]) => Ok(only),
        Some(_) => Err(errors::overloaded_function(function)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{catalog, source_metadata};
    use serde_json::json;
    use strata_common::SourceName;

    fn compile(declared: Value) -> (BTreeMap<ComputedFieldName, ComputedFieldInfo>, CollectLog) {
        let name = SourceName::new("default");
        let metadata = source_metadata(json!({ "tables": { "author": declared } }));
        let catalog = catalog();
        let view = SourceView::new(&name, &metadata, &catalog);
        let mut log = CollectLog::new();
        let table = TableName::new("author");
        let compiled = compile_computed_fields(
            &view,
            &table,
            &metadata.tables[&table],
            &BTreeMap::new(),
            &BTreeMap::new(),
            &mut log,
        );
        (compiled, log)
    }

    #[test]
    fn row_argument_defaults_to_first() {
        let (compiled, log) = compile(json!({
            "computed_fields": { "full_name": { "function": "author_full_name" } }
        }));
        assert_eq!(compiled[&ComputedFieldName::new("full_name")].table_argument, "$1");
        assert!(log.objects[0].dependencies.iter().any(|d| d.reason == DependencyReason::Function));
    }

    #[test]
    fn wrong_row_type_is_rejected() {
        let (compiled, log) =
            compile(json!({ "computed_fields": { "hits": { "function": "search_books" } } }));
        assert!(compiled.is_empty());
        assert!(log.inconsistencies[0].reasons[0]
            .contains("must have the row type of table \"author\""));
    }

    #[test]
    fn overloaded_and_missing_functions() {
        let (_, log) = compile(json!({ "computed_fields": {
            "a": { "function": "find" },
            "b": { "function": "nope" }
        } }));
        assert!(log.inconsistencies[0].reasons[0].contains("is overloaded"));
        assert!(log.inconsistencies[1].reasons[0].contains("does not exist in the source"));
    }
}
