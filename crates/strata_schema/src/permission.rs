//! Select, insert, update and delete permissions of a tracked table.
//!
//! Each (role, operation) pair is a separate object: a broken update
//! permission does not take the role's select permission with it.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use strata_common::{ColumnName, ComputedFieldName, RoleName, TableName};
use strata_metadata::{
    DependencyReason, MetadataObjId, PermissionColumns, PermissionKind, SchemaDependency,
    SchemaObjId, TableMetadata,
};

use crate::bool_exp::{compile_bool_exp, BoolExp};
use crate::context::CollectLog;
use crate::errors;
use crate::schema_cache::{
    ColumnInfo, ComputedFieldInfo, DeletePermInfo, InsertPermInfo, RolePermissions,
    SelectPermInfo, UpdatePermInfo,
};
use crate::source::SourceView;

/// What a permission may refer to on its table.
pub struct PermissionScope<'v, 'a> {
    /// Source of the table.
    pub view: &'v SourceView<'a>,
    /// The table.
    pub table: &'v TableName,
    /// Its columns.
    pub columns: &'v BTreeMap<ColumnName, ColumnInfo>,
    /// Its consistent computed fields.
    pub computed_fields: &'v BTreeMap<ComputedFieldName, ComputedFieldInfo>,
}

struct Compiling<'s, 'v, 'a> {
    scope: &'s PermissionScope<'v, 'a>,
    dependencies: Vec<SchemaDependency>,
}

impl<'s, 'v, 'a> Compiling<'s, 'v, 'a> {
    fn new(scope: &'s PermissionScope<'v, 'a>) -> Self {
        let parent = SchemaDependency::new(
            SchemaObjId::table_of(scope.view.name, scope.table),
            DependencyReason::Parent,
        );
        Self {
            scope,
            dependencies: vec![parent],
        }
    }

    fn column(&mut self, column: &ColumnName, reason: DependencyReason) -> Result<(), String> {
        if !self.scope.columns.contains_key(column) {
            return Err(errors::missing_column(column, self.scope.table));
        }
        self.dependencies.push(SchemaDependency::new(
            SchemaObjId::column(self.scope.view.name, self.scope.table, column),
            reason,
        ));
        Ok(())
    }

    fn columns(&mut self, columns: &PermissionColumns) -> Result<BTreeSet<ColumnName>, String> {
        match columns {
            PermissionColumns::All => Ok(self.scope.columns.keys().cloned().collect()),
            PermissionColumns::None => Ok(BTreeSet::new()),
            PermissionColumns::Only(listed) => {
                for column in listed {
                    self.column(column, DependencyReason::Column)?;
                }
                Ok(listed.iter().cloned().collect())
            }
        }
    }

    fn bool_exp(&mut self, exp: &Value) -> Result<BoolExp, String> {
        compile_bool_exp(self.scope.view, self.scope.table, exp, &mut self.dependencies)
    }

    fn presets(
        &mut self,
        set: &BTreeMap<ColumnName, Value>,
    ) -> Result<BTreeMap<ColumnName, Value>, String> {
        for column in set.keys() {
            self.column(column, DependencyReason::OnType)?;
        }
        Ok(set.clone())
    }

    fn computed_fields(
        &mut self,
        fields: &[ComputedFieldName],
    ) -> Result<BTreeSet<ComputedFieldName>, String> {
        for field in fields {
            if !self.scope.computed_fields.contains_key(field) {
                return Err(format!(
                    "computed field \"{field}\" does not exist on table \"{}\"",
                    self.scope.table
                ));
            }
            self.dependencies.push(SchemaDependency::new(
                SchemaObjId::ComputedField {
                    source: self.scope.view.name.clone(),
                    table: self.scope.table.clone(),
                    name: field.clone(),
                },
                DependencyReason::Column,
            ));
        }
        Ok(fields.iter().cloned().collect())
    }
}

/// Compiles every permission declared on a table.
pub fn compile_permissions(
    scope: &PermissionScope<'_, '_>,
    declared: &TableMetadata,
    log: &mut CollectLog,
) -> BTreeMap<RoleName, RolePermissions> {
    let mut compiled: BTreeMap<RoleName, RolePermissions> = BTreeMap::new();

    for (role, perm) in &declared.select_permissions {
        let result = compile_one(scope, role, PermissionKind::Select, perm, log, |c| {
            Ok(SelectPermInfo {
                columns: c.columns(&perm.columns)?,
                computed_fields: c.computed_fields(&perm.computed_fields)?,
                filter: c.bool_exp(&perm.filter)?,
                limit: perm.limit,
                allow_aggregations: perm.allow_aggregations,
            })
        });
        if let Some(info) = result {
            compiled.entry(role.clone()).or_default().select = Some(info);
        }
    }
    for (role, perm) in &declared.insert_permissions {
        let result = compile_one(scope, role, PermissionKind::Insert, perm, log, |c| {
            Ok(InsertPermInfo {
                columns: c.columns(&perm.columns)?,
                check: c.bool_exp(&perm.check)?,
                set: c.presets(&perm.set)?,
            })
        });
        if let Some(info) = result {
            compiled.entry(role.clone()).or_default().insert = Some(info);
        }
    }
    for (role, perm) in &declared.update_permissions {
        let result = compile_one(scope, role, PermissionKind::Update, perm, log, |c| {
            Ok(UpdatePermInfo {
                columns: c.columns(&perm.columns)?,
                filter: c.bool_exp(&perm.filter)?,
                check: perm.check.as_ref().map(|check| c.bool_exp(check)).transpose()?,
                set: c.presets(&perm.set)?,
            })
        });
        if let Some(info) = result {
            compiled.entry(role.clone()).or_default().update = Some(info);
        }
    }
    for (role, perm) in &declared.delete_permissions {
        let result = compile_one(scope, role, PermissionKind::Delete, perm, log, |c| {
            Ok(DeletePermInfo {
                filter: c.bool_exp(&perm.filter)?,
            })
        });
        if let Some(info) = result {
            compiled.entry(role.clone()).or_default().delete = Some(info);
        }
    }
    compiled
}

fn compile_one<P, T, F>(
    scope: &PermissionScope<'_, '_>,
    role: &RoleName,
    kind: PermissionKind,
    declared: &P,
    log: &mut CollectLog,
    compile: F,
) -> Option<T>
where
    P: Serialize,
    F: FnOnce(&mut Compiling<'_, '_, '_>) -> Result<T, String>,
{
    let id = MetadataObjId::Permission {
        source: scope.view.name.clone(),
        table: scope.table.clone(),
        role: role.clone(),
        kind,
    };
    let definition = || serde_json::to_value(declared).unwrap_or(Value::Null);
    if role.is_admin() {
        log.reject(id, definition(), "permissions cannot be defined for the admin role");
        return None;
    }
    let mut compiling = Compiling::new(scope);
    match compile(&mut compiling) {
        Ok(info) => {
            let provides = vec![SchemaObjId::Permission {
                source: scope.view.name.clone(),
                table: scope.table.clone(),
                role: role.clone(),
                kind,
            }];
            let mut dependencies = compiling.dependencies;
            dependencies.sort();
            dependencies.dedup();
            log.record(id, provides, dependencies);
            Some(info)
        }
        Err(reason) => {
            log.reject(id, definition(), reason);
            None
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

    fn compile(declared: Value) -> (BTreeMap<RoleName, RolePermissions>, CollectLog) {
        let name = SourceName::new("default");
        let metadata = source_metadata(json!({ "tables": { "author": declared } }));
        let catalog = catalog();
        let view = SourceView::new(&name, &metadata, &catalog);
        let table = TableName::new("author");
        let columns = columns(&["id", "name"]);
        let computed = BTreeMap::new();
        let scope = PermissionScope {
            view: &view,
            table: &table,
            columns: &columns,
            computed_fields: &computed,
        };
        let mut log = CollectLog::new();
        let compiled = compile_permissions(&scope, &metadata.tables[&table], &mut log);
        (compiled, log)
    }

    #[test]
    fn star_expands_to_every_column() {
        let (compiled, log) = compile(json!({
            "select_permissions": { "user": { "columns": "*", "filter": { "id": { "_eq": 1 } } } }
        }));
        let select = compiled[&RoleName::new("user")].select.as_ref().unwrap();
        assert_eq!(select.columns.len(), 2);
        let deps = &log.objects[0].dependencies;
        assert!(deps.iter().any(|d| d.reason == DependencyReason::Parent));
        assert!(deps.iter().any(|d| d.reason == DependencyReason::Column));
    }

    #[test]
    fn missing_column_rejects_only_that_permission() {
        let (compiled, log) = compile(json!({
            "select_permissions": { "user": { "columns": ["id", "age"] } },
            "delete_permissions": { "user": { "filter": {} } }
        }));
        let user = &compiled[&RoleName::new("user")];
        assert!(user.select.is_none());
        assert!(user.delete.is_some());
        assert_eq!(log.inconsistencies.len(), 1);
        assert_eq!(
            log.inconsistencies[0].reasons[0],
            "in select permission for role \"user\" on table \"author\" in source \"default\": \
             column \"age\" does not exist on table \"author\""
        );
    }

    #[test]
    fn presets_depend_on_column_type() {
        let (_, log) = compile(json!({
            "insert_permissions": { "user": { "columns": ["name"], "check": {}, "set": { "id": "X-Strata-User-Id" } } }
        }));
        assert!(log.objects[0]
            .dependencies
            .iter()
            .any(|d| d.reason == DependencyReason::OnType));
    }

    #[test]
    fn admin_role_is_rejected() {
        let (compiled, log) = compile(json!({
            "update_permissions": { "admin": { "columns": "*" } }
        }));
        assert!(compiled.is_empty());
        assert!(log.inconsistencies[0].reasons[0].contains("admin role"));
    }

    #[test]
    fn missing_computed_field() {
        let (_, log) = compile(json!({
            "select_permissions": { "user": { "columns": [], "computed_fields": ["full_name"] } }
        }));
        assert!(log.inconsistencies[0].reasons[0]
            .contains("computed field \"full_name\" does not exist"));
    }
}
