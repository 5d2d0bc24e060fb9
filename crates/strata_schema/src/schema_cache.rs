//! The compiled schema cache and the per-object information it holds.
//!
//! Everything here is immutable once assembled. A rebuild produces a new
//! [`SchemaCache`]; readers holding the previous one keep a consistent view
//! until they fetch the latest.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use strata_common::{
    ActionName, CollectionName, ColumnName, ComputedFieldName, ConstraintName, FunctionName,
    RelationshipName, RemoteSchemaName, RoleName, SourceName, TableName, TriggerName, TypeName,
};
use strata_config::ServingMode;
use strata_diagnostics::Inconsistencies;
use strata_metadata::{
    ActionKind, ActionType, FieldDefinition, FunctionExposure, RelationshipKind, RetryConf,
};

use crate::api::ApiSchema;
use crate::bool_exp::BoolExp;
use crate::cron::CronSchedule;
use crate::graph::DependencyGraph;
use crate::introspect::{ForeignKeyDescriptor, FunctionArgument, Volatility};

/// The output of a build.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SchemaCache {
    /// Consistent objects of each source.
    pub sources: BTreeMap<SourceName, SourceInfo>,
    /// Consistent remote schemas.
    pub remote_schemas: BTreeMap<RemoteSchemaName, RemoteSchemaInfo>,
    /// Custom types, empty if none are defined or they are inconsistent.
    pub custom_types: BTreeMap<TypeName, CustomTypeKind>,
    /// Consistent actions.
    pub actions: BTreeMap<ActionName, ActionInfo>,
    /// Consistent scheduled jobs.
    pub cron_triggers: BTreeMap<TriggerName, CronTriggerInfo>,
    /// Consistent query collections.
    pub query_collections: BTreeMap<CollectionName, CollectionInfo>,
    /// Allowed query collections.
    pub allowlist: BTreeSet<CollectionName>,
    /// Compiled API projection per serving mode.
    pub api: BTreeMap<ServingMode, ApiSchema>,
    /// Dependency edges between the consistent objects.
    pub dependencies: DependencyGraph,
    /// Objects excluded from this cache, with reasons.
    pub inconsistencies: Inconsistencies,
}

impl SchemaCache {
    /// Looks up a consistent table.
    pub fn table(&self, source: &SourceName, table: &TableName) -> Option<&TableInfo> {
        self.sources.get(source)?.tables.get(table)
    }

    /// Looks up a consistent function.
    pub fn function(&self, source: &SourceName, function: &FunctionName) -> Option<&FunctionInfo> {
        self.sources.get(source)?.functions.get(function)
    }
}

/// Consistent objects of one source.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SourceInfo {
    /// Tracked tables.
    pub tables: BTreeMap<TableName, TableInfo>,
    /// Tracked functions.
    pub functions: BTreeMap<FunctionName, FunctionInfo>,
}

/// A tracked table and its consistent children.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableInfo {
    /// Table name.
    pub name: TableName,
    /// Name used for root fields.
    pub graphql_name: String,
    /// Columns by name.
    pub columns: BTreeMap<ColumnName, ColumnInfo>,
    /// Primary-key columns.
    pub primary_key: Vec<ColumnName>,
    /// Foreign keys by constraint name.
    pub foreign_keys: BTreeMap<ConstraintName, ForeignKeyDescriptor>,
    /// Relationships.
    pub relationships: BTreeMap<RelationshipName, RelationshipInfo>,
    /// Computed fields.
    pub computed_fields: BTreeMap<ComputedFieldName, ComputedFieldInfo>,
    /// Permissions by role.
    pub permissions: BTreeMap<RoleName, RolePermissions>,
    /// Event triggers.
    pub event_triggers: BTreeMap<TriggerName, EventTriggerInfo>,
}

/// A column of a tracked table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: ColumnName,
    /// Name exposed in the API.
    pub graphql_name: String,
    /// Database type.
    pub ty: String,
    /// API scalar type.
    pub graphql_type: String,
    /// Whether the column accepts nulls.
    pub nullable: bool,
    /// Ordinal position.
    pub position: u32,
}

/// A resolved relationship.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelationshipInfo {
    /// Relationship name.
    pub name: RelationshipName,
    /// Cardinality.
    pub kind: RelationshipKind,
    /// Joined table.
    pub remote_table: TableName,
    /// Local column to remote column.
    pub column_mapping: BTreeMap<ColumnName, ColumnName>,
    /// The constraint followed, if the join is not manual.
    pub constraint: Option<ConstraintName>,
}

/// A resolved computed field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComputedFieldInfo {
    /// Field name.
    pub name: ComputedFieldName,
    /// Function computing the field.
    pub function: FunctionName,
    /// Argument receiving the row.
    pub table_argument: String,
    /// Table returned, if the function returns rows.
    pub returns_table: Option<TableName>,
    /// Whether a set of rows is returned.
    pub returns_set: bool,
}

/// Permissions of one role on one table.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RolePermissions {
    /// Select permission.
    pub select: Option<SelectPermInfo>,
    /// Insert permission.
    pub insert: Option<InsertPermInfo>,
    /// Update permission.
    pub update: Option<UpdatePermInfo>,
    /// Delete permission.
    pub delete: Option<DeletePermInfo>,
}

impl RolePermissions {
    /// Returns `true` if no permission is left.
    pub fn is_empty(&self) -> bool {
        self.select.is_none()
            && self.insert.is_none()
            && self.update.is_none()
            && self.delete.is_none()
    }
}

/// A compiled select permission.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectPermInfo {
    /// Readable columns.
    pub columns: BTreeSet<ColumnName>,
    /// Readable computed fields.
    pub computed_fields: BTreeSet<ComputedFieldName>,
    /// Row filter.
    pub filter: BoolExp,
    /// Row limit.
    pub limit: Option<u32>,
    /// Whether aggregate queries are exposed.
    pub allow_aggregations: bool,
}

/// A compiled insert permission.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InsertPermInfo {
    /// Insertable columns.
    pub columns: BTreeSet<ColumnName>,
    /// Post-insert check.
    pub check: BoolExp,
    /// Column presets.
    pub set: BTreeMap<ColumnName, Value>,
}

/// A compiled update permission.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpdatePermInfo {
    /// Updatable columns.
    pub columns: BTreeSet<ColumnName>,
    /// Pre-update filter.
    pub filter: BoolExp,
    /// Post-update check.
    pub check: Option<BoolExp>,
    /// Column presets.
    pub set: BTreeMap<ColumnName, Value>,
}

/// A compiled delete permission.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeletePermInfo {
    /// Row filter.
    pub filter: BoolExp,
}

/// A compiled event trigger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventTriggerInfo {
    /// Trigger name.
    pub name: TriggerName,
    /// Fires on insert.
    pub insert: bool,
    /// Columns whose update fires the trigger; `None` if updates are ignored.
    pub update: Option<BTreeSet<ColumnName>>,
    /// Fires on delete.
    pub delete: bool,
    /// Can be invoked by hand.
    pub enable_manual: bool,
    /// Delivery endpoint.
    pub webhook: String,
    /// Retry policy.
    pub retry_conf: RetryConf,
}

/// A tracked function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    /// Function name.
    pub name: FunctionName,
    /// Name exposed in the API.
    pub graphql_name: String,
    /// Table whose rows are returned.
    pub returns_table: TableName,
    /// Root the function is exposed in.
    pub exposed_as: FunctionExposure,
    /// Volatility class.
    pub volatility: Volatility,
    /// Arguments.
    pub arguments: Vec<FunctionArgument>,
    /// Roles allowed to call the function.
    pub permissions: BTreeSet<RoleName>,
}

/// A consistent remote schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemoteSchemaInfo {
    /// Remote schema name.
    pub name: RemoteSchemaName,
    /// Endpoint.
    pub url: String,
    /// Query root fields.
    pub query_fields: Vec<String>,
    /// Mutation root fields.
    pub mutation_fields: Vec<String>,
}

/// Kind of a custom type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomTypeKind {
    /// Scalar.
    Scalar,
    /// Enum.
    Enum,
    /// Input object.
    InputObject,
    /// Output object.
    Object,
}

/// A consistent action.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionInfo {
    /// Action name.
    pub name: ActionName,
    /// Root the action is exposed in.
    pub ty: ActionType,
    /// Delivery mode.
    pub kind: ActionKind,
    /// Arguments.
    pub arguments: Vec<FieldDefinition>,
    /// Output type reference.
    pub output_type: String,
    /// Handler endpoint.
    pub handler: String,
    /// Roles allowed to call the action.
    pub permissions: BTreeSet<RoleName>,
}

/// A consistent scheduled job.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CronTriggerInfo {
    /// Trigger name.
    pub name: TriggerName,
    /// Delivery endpoint.
    pub webhook: String,
    /// Parsed schedule.
    pub schedule: CronSchedule,
    /// Static payload.
    pub payload: Option<Value>,
}

/// A consistent query collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: CollectionName,
    /// Query text by query name.
    pub queries: BTreeMap<String, String>,
}
