//! The API projection: the root fields each role sees in each serving mode.
//!
//! Projection runs last, over objects the resolver kept. Root-field clashes
//! between objects are found earlier, during collection, with
//! [`root_field_conflicts`], so that the losing object and its dependents are
//! quarantined like any other inconsistency.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use strata_common::RoleName;
use strata_config::ServingMode;
use strata_metadata::{ActionType, FunctionExposure, MetadataObjId};

use crate::bool_exp::BoolExp;
use crate::errors;
use crate::schema_cache::{
    ActionInfo, DeletePermInfo, FunctionInfo, InsertPermInfo, RemoteSchemaInfo, RolePermissions,
    SchemaCache, SelectPermInfo, TableInfo, UpdatePermInfo,
};

/// A root operation type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Root {
    /// Query root.
    Query,
    /// Mutation root.
    Mutation,
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Root::Query => write!(f, "query"),
            Root::Mutation => write!(f, "mutation"),
        }
    }
}

impl From<FunctionExposure> for Root {
    fn from(exposure: FunctionExposure) -> Self {
        match exposure {
            FunctionExposure::Query => Root::Query,
            FunctionExposure::Mutation => Root::Mutation,
        }
    }
}

impl From<ActionType> for Root {
    fn from(ty: ActionType) -> Self {
        match ty {
            ActionType::Query => Root::Query,
            ActionType::Mutation => Root::Mutation,
        }
    }
}

/// Root fields visible to one role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RootFields {
    /// Query root fields.
    pub query: BTreeSet<String>,
    /// Mutation root fields.
    pub mutation: BTreeSet<String>,
}

impl RootFields {
    fn add(&mut self, root: Root, field: impl Into<String>) {
        match root {
            Root::Query => self.query.insert(field.into()),
            Root::Mutation => self.mutation.insert(field.into()),
        };
    }

    /// Returns `true` if the role sees no root field.
    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.mutation.is_empty()
    }
}

/// The API of one serving mode.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApiSchema {
    /// Root fields by role.
    pub roles: BTreeMap<RoleName, RootFields>,
}

impl ApiSchema {
    /// Root fields of a role, if the role has any.
    pub fn role(&self, role: &RoleName) -> Option<&RootFields> {
        self.roles.get(role)
    }
}

/// Fields a table claims under admin naming in standard mode.
pub fn table_root_fields(table: &TableInfo) -> Vec<(Root, String)> {
    let name = &table.graphql_name;
    let mut fields = vec![(Root::Query, name.clone())];
    if !table.primary_key.is_empty() {
        fields.push((Root::Query, format!("{name}_by_pk")));
    }
    fields.push((Root::Query, format!("{name}_aggregate")));
    for prefix in ["insert", "update", "delete"] {
        fields.push((Root::Mutation, format!("{prefix}_{name}")));
    }
    fields
}

/// Field a function claims.
pub fn function_root_field(function: &FunctionInfo) -> (Root, String) {
    (function.exposed_as.into(), function.graphql_name.clone())
}

/// Field an action claims.
pub fn action_root_field(action: &ActionInfo) -> (Root, String) {
    (action.ty.into(), action.name.to_string())
}

/// Fields a remote schema claims.
pub fn remote_root_fields(remote: &RemoteSchemaInfo) -> Vec<(Root, String)> {
    remote
        .query_fields
        .iter()
        .map(|f| (Root::Query, f.clone()))
        .chain(remote.mutation_fields.iter().map(|f| (Root::Mutation, f.clone())))
        .collect()
}

/// Finds objects whose root fields clash with an earlier object's.
///
/// Claims are processed in identifier order. An object is rejected as a
/// whole at its first clash and its fields are not claimed, so a later
/// object may still use them.
pub fn root_field_conflicts(
    claims: BTreeMap<MetadataObjId, Vec<(Root, String)>>,
) -> Vec<(MetadataObjId, String)> {
    let mut claimed: BTreeMap<(Root, String), MetadataObjId> = BTreeMap::new();
    let mut rejected = Vec::new();
    for (owner, fields) in claims {
        let clash = fields.iter().find_map(|field| claimed.get(field).map(|other| (field, other)));
        match clash {
            Some(((root, field), other)) => {
                let reason = errors::conflicting_root_field(field, &root.to_string(), other);
                rejected.push((owner, reason));
            }
            None => {
                for field in fields {
                    claimed.entry(field).or_insert_with(|| owner.clone());
                }
            }
        }
    }
    rejected
}

fn admin_permissions() -> RolePermissions {
    RolePermissions {
        select: Some(SelectPermInfo {
            columns: BTreeSet::new(),
            computed_fields: BTreeSet::new(),
            filter: BoolExp::always(),
            limit: None,
            allow_aggregations: true,
        }),
        insert: Some(InsertPermInfo {
            columns: BTreeSet::new(),
            check: BoolExp::always(),
            set: BTreeMap::new(),
        }),
        update: Some(UpdatePermInfo {
            columns: BTreeSet::new(),
            filter: BoolExp::always(),
            check: None,
            set: BTreeMap::new(),
        }),
        delete: Some(DeletePermInfo {
            filter: BoolExp::always(),
        }),
    }
}

/// Every role that appears in a permission, plus the admin role.
pub fn roles(cache: &SchemaCache) -> BTreeSet<RoleName> {
    let mut roles = BTreeSet::from([RoleName::admin()]);
    for source in cache.sources.values() {
        for table in source.tables.values() {
            roles.extend(table.permissions.keys().cloned());
        }
        for function in source.functions.values() {
            roles.extend(function.permissions.iter().cloned());
        }
    }
    for action in cache.actions.values() {
        roles.extend(action.permissions.iter().cloned());
    }
    roles
}

/// Projects the API of one serving mode out of an assembled cache.
pub fn project_api(cache: &SchemaCache, mode: ServingMode) -> ApiSchema {
    let admin = admin_permissions();
    let mut api = ApiSchema::default();
    for role in roles(cache) {
        let mut fields = RootFields::default();
        for source in cache.sources.values() {
            for table in source.tables.values() {
                let permissions = if role.is_admin() {
                    Some(&admin)
                } else {
                    table.permissions.get(&role)
                };
                if let Some(permissions) = permissions {
                    table_fields(mode, table, permissions, &mut fields);
                }
            }
            for function in source.functions.values() {
                if !(role.is_admin() || function.permissions.contains(&role)) {
                    continue;
                }
                let (root, name) = function_root_field(function);
                match mode {
                    ServingMode::Standard => fields.add(root, name),
                    ServingMode::Relay => {
                        let returns_pk_table = source
                            .tables
                            .get(&function.returns_table)
                            .is_some_and(|t| !t.primary_key.is_empty());
                        if returns_pk_table {
                            fields.add(root, format!("{name}_connection"));
                        }
                    }
                }
            }
        }
        for action in cache.actions.values() {
            if role.is_admin() || action.permissions.contains(&role) {
                let (root, name) = action_root_field(action);
                fields.add(root, name);
            }
        }
        if mode == ServingMode::Standard {
            for remote in cache.remote_schemas.values() {
                for (root, field) in remote_root_fields(remote) {
                    fields.add(root, field);
                }
            }
        }
        if mode == ServingMode::Relay && !fields.query.is_empty() {
            fields.query.insert("node".to_string());
        }
        if !fields.is_empty() {
            api.roles.insert(role, fields);
        }
    }
    api
}

fn table_fields(
    mode: ServingMode,
    table: &TableInfo,
    permissions: &RolePermissions,
    fields: &mut RootFields,
) {
    let name = &table.graphql_name;
    let has_pk = !table.primary_key.is_empty();
    if mode == ServingMode::Relay && !has_pk {
        return;
    }
    if let Some(select) = &permissions.select {
        match mode {
            ServingMode::Standard => {
                fields.add(Root::Query, name.clone());
                if has_pk {
                    fields.add(Root::Query, format!("{name}_by_pk"));
                }
                if select.allow_aggregations {
                    fields.add(Root::Query, format!("{name}_aggregate"));
                }
            }
            ServingMode::Relay => fields.add(Root::Query, format!("{name}_connection")),
        }
    }
    if permissions.insert.is_some() {
        fields.add(Root::Mutation, format!("insert_{name}"));
    }
    if permissions.update.is_some() {
        fields.add(Root::Mutation, format!("update_{name}"));
    }
    if permissions.delete.is_some() {
        fields.add(Root::Mutation, format!("delete_{name}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_cache::SourceInfo;
    use strata_common::TableName;

    fn table(name: &str, primary_key: &[&str]) -> TableInfo {
        TableInfo {
            name: TableName::new(name),
            graphql_name: name.to_string(),
            columns: BTreeMap::new(),
            primary_key: primary_key.iter().map(|c| (*c).into()).collect(),
            foreign_keys: BTreeMap::new(),
            relationships: BTreeMap::new(),
            computed_fields: BTreeMap::new(),
            permissions: BTreeMap::new(),
            event_triggers: BTreeMap::new(),
        }
    }

    fn select_only() -> RolePermissions {
        RolePermissions {
            select: Some(SelectPermInfo {
                columns: BTreeSet::new(),
                computed_fields: BTreeSet::new(),
                filter: BoolExp::always(),
                limit: None,
                allow_aggregations: false,
            }),
            ..RolePermissions::default()
        }
    }

    fn cache() -> SchemaCache {
        let mut author = table("author", &["id"]);
        author.permissions.insert("user".into(), select_only());
        let log = table("audit_log", &[]);
        let mut source = SourceInfo::default();
        source.tables.insert("author".into(), author);
        source.tables.insert("audit_log".into(), log);
        let mut cache = SchemaCache::default();
        cache.sources.insert("default".into(), source);
        cache.remote_schemas.insert(
            "countries".into(),
            RemoteSchemaInfo {
                name: "countries".into(),
                url: "http://countries".to_string(),
                query_fields: vec!["country".to_string()],
                mutation_fields: Vec::new(),
            },
        );
        cache
    }

    #[test]
    fn standard_mode_respects_permissions() {
        let api = project_api(&cache(), ServingMode::Standard);
        let user = api.role(&"user".into()).unwrap();
        let query: Vec<_> = user.query.iter().map(String::as_str).collect();
        assert_eq!(query, vec!["author", "author_by_pk", "country"]);
        assert!(user.mutation.is_empty());

        let admin = api.role(&RoleName::admin()).unwrap();
        assert!(admin.query.contains("audit_log_aggregate"));
        assert!(admin.mutation.contains("delete_author"));
    }

    #[test]
    fn relay_mode_needs_primary_keys() {
        let api = project_api(&cache(), ServingMode::Relay);
        let admin = api.role(&RoleName::admin()).unwrap();
        assert!(admin.query.contains("author_connection"));
        assert!(admin.query.contains("node"));
        assert!(!admin.query.iter().any(|f| f.starts_with("audit_log")));
        assert!(!admin.query.contains("country"));
    }

    #[test]
    fn later_object_loses_a_root_field_clash() {
        let first = MetadataObjId::Table {
            source: "default".into(),
            table: "author".into(),
        };
        let second = MetadataObjId::RemoteSchema { name: "legacy".into() };
        let mut claims = BTreeMap::new();
        claims.insert(first.clone(), table_root_fields(&table("author", &["id"])));
        claims.insert(second.clone(), vec![(Root::Query, "author_by_pk".to_string())]);
        let rejected = root_field_conflicts(claims);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, second);
        assert_eq!(
            rejected[0].1,
            "conflicting root field \"author_by_pk\" in the query root, already provided by table \"author\" in source \"default\""
        );
    }
}
