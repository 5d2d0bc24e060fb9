//! Tracked stored functions and the roles allowed to call them.

use std::collections::BTreeSet;

use serde_json::Value;
use strata_common::{FunctionName, TableName};
use strata_metadata::{
    DependencyReason, FunctionExposure, FunctionMetadata, MetadataObjId, PermissionKind,
    SchemaDependency, SchemaObjId,
};

use crate::computed_field::single_function;
use crate::context::CollectLog;
use crate::introspect::{FunctionDescriptor, Volatility};
use crate::schema_cache::FunctionInfo;
use crate::source::SourceView;

/// A compiled function as stored in the function memo.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionBuild {
    /// The function, if it compiled.
    pub info: Option<FunctionInfo>,
    /// Collected objects and rejections, including permissions.
    pub log: CollectLog,
}

/// Root a function is exposed in when its configuration does not say.
pub fn default_exposure(volatility: Volatility) -> FunctionExposure {
    match volatility {
        Volatility::Volatile => FunctionExposure::Mutation,
        Volatility::Stable | Volatility::Immutable => FunctionExposure::Query,
    }
}

/// Compiles a tracked function and its permissions.
pub fn compile_function(
    view: &SourceView<'_>,
    name: &FunctionName,
    declared: &FunctionMetadata,
) -> FunctionBuild {
    let mut log = CollectLog::new();
    let id = MetadataObjId::Function {
        source: view.name.clone(),
        function: name.clone(),
    };
    let resolved = single_function(view, name)
        .and_then(|descriptor| returned_table(descriptor).map(|table| (descriptor, table)));
    let mut info = match resolved {
        Ok((descriptor, returns_table)) => {
            let info = function_info(name, declared, descriptor, returns_table);
            log.record(
                id,
                vec![SchemaObjId::Function {
                    source: view.name.clone(),
                    function: name.clone(),
                }],
                vec![
                    SchemaDependency::new(
                        SchemaObjId::Source {
                            source: view.name.clone(),
                        },
                        DependencyReason::Parent,
                    ),
                    SchemaDependency::new(
                        SchemaObjId::CatalogFunction {
                            source: view.name.clone(),
                            function: name.clone(),
                        },
                        DependencyReason::Function,
                    ),
                    SchemaDependency::new(
                        SchemaObjId::table_of(view.name, &info.returns_table),
                        DependencyReason::ReturnType,
                    ),
                ],
            );
            Some(info)
        }
        Err(reason) => {
            let definition = serde_json::to_value(declared).unwrap_or(Value::Null);
            log.reject(id, definition, reason);
            None
        }
    };

    let mut granted = BTreeSet::new();
    for permission in &declared.permissions {
        let role = &permission.role;
        let perm_id = MetadataObjId::FunctionPermission {
            source: view.name.clone(),
            function: name.clone(),
            role: role.clone(),
        };
        let definition = || serde_json::to_value(permission).unwrap_or(Value::Null);
        if role.is_admin() {
            log.reject(perm_id, definition(), "the admin role can always call every function");
            continue;
        }
        granted.insert(role.clone());
        let mut dependencies = vec![SchemaDependency::new(
            SchemaObjId::Function {
                source: view.name.clone(),
                function: name.clone(),
            },
            DependencyReason::Parent,
        )];
        if let Some(info) = &info {
            dependencies.push(SchemaDependency::new(
                SchemaObjId::Permission {
                    source: view.name.clone(),
                    table: info.returns_table.clone(),
                    role: role.clone(),
                    kind: PermissionKind::Select,
                },
                DependencyReason::Permission,
            ));
        }
        log.record(perm_id, Vec::new(), dependencies);
    }
    if let Some(info) = info.as_mut() {
        info.permissions = granted;
    }
    FunctionBuild { info, log }
}

fn returned_table(descriptor: &FunctionDescriptor) -> Result<&TableName, String> {
    match &descriptor.returns_table {
        Some(table) if descriptor.returns_set => Ok(table),
        _ => Err(format!(
            "function \"{}\" must return a set of rows of a tracked table",
            descriptor.name
        )),
    }
}

fn function_info(
    name: &FunctionName,
    declared: &FunctionMetadata,
    descriptor: &FunctionDescriptor,
    returns_table: &TableName,
) -> FunctionInfo {
    let config = &declared.configuration;
    FunctionInfo {
        name: name.clone(),
        graphql_name: config.custom_name.clone().unwrap_or_else(|| name.to_string()),
        returns_table: returns_table.clone(),
        exposed_as: config
            .exposed_as
            .unwrap_or_else(|| default_exposure(descriptor.volatility)),
        volatility: descriptor.volatility,
        arguments: descriptor.arguments.clone(),
        permissions: BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{catalog, source_metadata};
    use serde_json::json;
    use strata_common::SourceName;

    fn compile(function: &str, declared: Value) -> FunctionBuild {
        let name = SourceName::new("default");
        let metadata = source_metadata(json!({ "functions": { function: declared } }));
        let catalog = catalog();
        let view = SourceView::new(&name, &metadata, &catalog);
        let function = FunctionName::new(function);
        compile_function(&view, &function, &metadata.functions[&function])
    }

    #[test]
    fn exposure_follows_volatility() {
        let stable = compile("search_books", json!({})).info.unwrap();
        assert_eq!(stable.exposed_as, FunctionExposure::Query);
        let volatile = compile("add_book", json!({})).info.unwrap();
        assert_eq!(volatile.exposed_as, FunctionExposure::Mutation);
        let forced = compile("add_book", json!({ "configuration": { "exposed_as": "query" } }))
            .info
            .unwrap();
        assert_eq!(forced.exposed_as, FunctionExposure::Query);
    }

    #[test]
    fn scalar_functions_cannot_be_tracked() {
        let build = compile("author_full_name", json!({}));
        assert!(build.info.is_none());
        assert!(build.log.inconsistencies[0].reasons[0].contains("must return a set of rows"));
    }

    #[test]
    fn overloaded_function_is_rejected_and_permissions_orphaned() {
        let build = compile("find", json!({ "permissions": [ { "role": "user" } ] }));
        assert!(build.info.is_none());
        assert!(build.log.inconsistencies[0].reasons[0].contains("overloaded"));
        assert_eq!(build.log.objects.len(), 1);
        assert_eq!(build.log.objects[0].dependencies.len(), 1);
    }

    #[test]
    fn permission_requires_select_on_return_table() {
        let build = compile(
            "search_books",
            json!({ "permissions": [ { "role": "user" }, { "role": "admin" } ] }),
        );
        let permission = &build.log.objects[1];
        assert!(permission.dependencies.contains(&SchemaDependency::new(
            SchemaObjId::Permission {
                source: "default".into(),
                table: "book".into(),
                role: "user".into(),
                kind: PermissionKind::Select,
            },
            DependencyReason::Permission,
        )));
        assert_eq!(build.log.inconsistencies.len(), 1);
        assert_eq!(build.info.unwrap().permissions.len(), 1);
    }
}
