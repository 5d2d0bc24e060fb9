//! Types of the metadata document, deserialized from JSON.
//!
//! Every collection is an ordered map keyed by the object's name, so the
//! declaration order in the source document never influences a build and two
//! documents with the same content serialize (and hash) identically.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_common::{
    ActionName, CollectionName, ColumnName, ComputedFieldName, FunctionName, RelationshipName,
    RemoteSchemaName, RoleName, SourceName, TableName, TriggerName, TypeName,
};

use crate::ids::{MetadataObjId, PermissionKind, RelationshipKind};

/// The full declarative configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Per-data-source object declarations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<SourceName, SourceMetadata>,
    /// Remote services merged into the API.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remote_schemas: BTreeMap<RemoteSchemaName, RemoteSchemaMetadata>,
    /// Custom scalar, enum, input and object type definitions used by actions.
    #[serde(default, skip_serializing_if = "CustomTypes::is_empty")]
    pub custom_types: CustomTypes,
    /// Stored actions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<ActionName, ActionMetadata>,
    /// Scheduled jobs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cron_triggers: BTreeMap<TriggerName, CronTriggerMetadata>,
    /// Named query collections.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_collections: BTreeMap<CollectionName, QueryCollection>,
    /// Query collections whose queries are allowed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist: Vec<AllowlistEntry>,
}

/// Objects declared on one backing data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Opaque connection configuration, consumed by the data-source collaborator.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub configuration: Value,
    /// Tracked tables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tables: BTreeMap<TableName, TableMetadata>,
    /// Tracked stored functions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<FunctionName, FunctionMetadata>,
}

/// A tracked table and everything layered on top of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Naming overrides for the table and its columns.
    #[serde(default, skip_serializing_if = "TableConfiguration::is_empty")]
    pub configuration: TableConfiguration,
    /// Relationships that resolve to at most one remote row.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub object_relationships: BTreeMap<RelationshipName, ObjectRelationship>,
    /// Relationships that resolve to many remote rows.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub array_relationships: BTreeMap<RelationshipName, ArrayRelationship>,
    /// Fields computed by a stored function taking the table row.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub computed_fields: BTreeMap<ComputedFieldName, ComputedField>,
    /// Select permissions by role.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub select_permissions: BTreeMap<RoleName, SelectPermission>,
    /// Insert permissions by role.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub insert_permissions: BTreeMap<RoleName, InsertPermission>,
    /// Update permissions by role.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub update_permissions: BTreeMap<RoleName, UpdatePermission>,
    /// Delete permissions by role.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub delete_permissions: BTreeMap<RoleName, DeletePermission>,
    /// Event triggers fired on row changes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub event_triggers: BTreeMap<TriggerName, EventTrigger>,
}

/// Naming overrides for a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableConfiguration {
    /// Replaces the table name in generated root fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    /// Per-column naming overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_config: BTreeMap<ColumnName, ColumnConfig>,
}

impl TableConfiguration {
    /// Returns `true` if no override is configured.
    pub fn is_empty(&self) -> bool {
        self.custom_name.is_none() && self.column_config.is_empty()
    }
}

/// Naming override for a column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnConfig {
    /// Replaces the column name in the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

/// An object relationship declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRelationship {
    /// How the relationship joins to its remote table.
    pub using: ObjectRelationshipUsing,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Join strategy of an object relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectRelationshipUsing {
    /// Follow the foreign-key constraint declared on this column.
    ForeignKeyConstraintOn(ColumnName),
    /// Explicit column mapping to a remote table.
    ManualConfiguration(ManualConfiguration),
}

/// An array relationship declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayRelationship {
    /// How the relationship joins to its remote table.
    pub using: ArrayRelationshipUsing,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Join strategy of an array relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayRelationshipUsing {
    /// Follow a foreign-key constraint on the remote table pointing back here.
    ForeignKeyConstraintOn(RemoteForeignKey),
    /// Explicit column mapping to a remote table.
    ManualConfiguration(ManualConfiguration),
}

/// The remote side of an array relationship's foreign key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteForeignKey {
    /// The table holding the constraint.
    pub table: TableName,
    /// The constrained column on that table.
    pub column: ColumnName,
}

/// An explicit join between this table and a remote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualConfiguration {
    /// The joined table, in the same source.
    pub remote_table: TableName,
    /// Local column to remote column.
    pub column_mapping: BTreeMap<ColumnName, ColumnName>,
}

/// The kind-independent view of a relationship's join.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelationshipJoin<'a> {
    /// Object relationship over a local foreign-key column.
    LocalForeignKey(&'a ColumnName),
    /// Array relationship over a remote foreign key.
    RemoteForeignKey(&'a RemoteForeignKey),
    /// Manual mapping.
    Manual(&'a ManualConfiguration),
}

impl ObjectRelationship {
    /// Returns the join of this relationship.
    pub fn join(&self) -> RelationshipJoin<'_> {
        match &self.using {
            ObjectRelationshipUsing::ForeignKeyConstraintOn(column) => {
                RelationshipJoin::LocalForeignKey(column)
            }
            ObjectRelationshipUsing::ManualConfiguration(manual) => {
                RelationshipJoin::Manual(manual)
            }
        }
    }
}

impl ArrayRelationship {
    /// Returns the join of this relationship.
    pub fn join(&self) -> RelationshipJoin<'_> {
        match &self.using {
            ArrayRelationshipUsing::ForeignKeyConstraintOn(fk) => {
                RelationshipJoin::RemoteForeignKey(fk)
            }
            ArrayRelationshipUsing::ManualConfiguration(manual) => RelationshipJoin::Manual(manual),
        }
    }
}

/// A field computed by a stored function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedField {
    /// The function computing the field.
    pub function: FunctionName,
    /// The argument receiving the table row; defaults to the first argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_argument: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Column list of a permission: every column, or an explicit subset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PermissionColumns {
    /// Every column of the table (`"*"`).
    All,
    /// No column (`[]`).
    #[default]
    None,
    /// The listed columns.
    Only(Vec<ColumnName>),
}

impl PermissionColumns {
    /// Returns the explicitly listed columns, if any.
    pub fn listed(&self) -> &[ColumnName] {
        match self {
            PermissionColumns::Only(columns) => columns,
            PermissionColumns::All | PermissionColumns::None => &[],
        }
    }

    /// Returns a mutable handle on the explicitly listed columns.
    pub fn listed_mut(&mut self) -> Option<&mut Vec<ColumnName>> {
        match self {
            PermissionColumns::Only(columns) => Some(columns),
            PermissionColumns::All | PermissionColumns::None => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawColumns {
    Star(String),
    List(Vec<ColumnName>),
}

impl Serialize for PermissionColumns {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PermissionColumns::All => RawColumns::Star("*".to_string()).serialize(serializer),
            PermissionColumns::None => RawColumns::List(Vec::new()).serialize(serializer),
            PermissionColumns::Only(columns) => columns.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for PermissionColumns {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawColumns::deserialize(deserializer)? {
            RawColumns::Star(star) if star == "*" => Ok(PermissionColumns::All),
            RawColumns::Star(other) => Err(serde::de::Error::custom(format!(
                "expected \"*\" or a list of columns, found {other:?}"
            ))),
            RawColumns::List(columns) if columns.is_empty() => Ok(PermissionColumns::None),
            RawColumns::List(columns) => Ok(PermissionColumns::Only(columns)),
        }
    }
}

/// Select permission for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectPermission {
    /// Readable columns.
    #[serde(default)]
    pub columns: PermissionColumns,
    /// Readable computed fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computed_fields: Vec<ComputedFieldName>,
    /// Row filter, as a boolean expression.
    #[serde(default)]
    pub filter: Value,
    /// Maximum number of rows returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Whether aggregate queries are exposed.
    #[serde(default)]
    pub allow_aggregations: bool,
}

/// Insert permission for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertPermission {
    /// Insertable columns.
    #[serde(default)]
    pub columns: PermissionColumns,
    /// Post-insert row check.
    #[serde(default)]
    pub check: Value,
    /// Column presets.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<ColumnName, Value>,
}

/// Update permission for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePermission {
    /// Updatable columns.
    #[serde(default)]
    pub columns: PermissionColumns,
    /// Pre-update row filter.
    #[serde(default)]
    pub filter: Value,
    /// Post-update row check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<Value>,
    /// Column presets.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<ColumnName, Value>,
}

/// Delete permission for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletePermission {
    /// Row filter.
    #[serde(default)]
    pub filter: Value,
}

/// An event trigger on a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTrigger {
    /// Operations that fire the trigger.
    pub definition: EventTriggerOperations,
    /// Delivery endpoint.
    pub webhook: String,
    /// Delivery retry policy.
    #[serde(default)]
    pub retry_conf: RetryConf,
}

/// Operations an event trigger listens to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTriggerOperations {
    /// Fire on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<OperationSpec>,
    /// Fire on update of the listed columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<OperationSpec>,
    /// Fire on delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<OperationSpec>,
    /// Allow invoking the trigger by hand.
    #[serde(default)]
    pub enable_manual: bool,
}

/// Column scope of one event-trigger operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Columns included in (or, for updates, watched by) the operation.
    #[serde(default)]
    pub columns: PermissionColumns,
}

/// Retry policy for event delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConf {
    /// Retries after the first failed delivery.
    pub num_retries: u32,
    /// Seconds between retries.
    pub interval_sec: u32,
    /// Delivery timeout in seconds.
    pub timeout_sec: u32,
}

impl Default for RetryConf {
    fn default() -> Self {
        Self {
            num_retries: 0,
            interval_sec: 10,
            timeout_sec: 60,
        }
    }
}

/// A tracked stored function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    /// Exposure and naming overrides.
    #[serde(default)]
    pub configuration: FunctionConfiguration,
    /// Roles allowed to call the function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<RolePermission>,
}

/// Exposure and naming overrides of a function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfiguration {
    /// Replaces the function name in the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    /// Forces the root the function is exposed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_as: Option<FunctionExposure>,
}

/// Root a function is exposed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionExposure {
    /// Query root.
    Query,
    /// Mutation root.
    Mutation,
}

/// A grant of some object to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    /// The role granted access.
    pub role: RoleName,
}

/// A remote service merged into the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSchemaMetadata {
    /// Connection definition.
    pub definition: RemoteSchemaDefinition,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// How to reach a remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSchemaDefinition {
    /// Endpoint URL.
    pub url: String,
    /// Introspection timeout; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Static headers sent with every request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Forward client headers to the service.
    #[serde(default)]
    pub forward_client_headers: bool,
}

/// Custom type definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomTypes {
    /// Custom scalars.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scalars: Vec<ScalarTypeDefinition>,
    /// Custom enums.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enums: Vec<EnumTypeDefinition>,
    /// Input object types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_objects: Vec<InputObjectDefinition>,
    /// Output object types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ObjectTypeDefinition>,
}

impl CustomTypes {
    /// Returns `true` if no custom type is defined.
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
            && self.enums.is_empty()
            && self.input_objects.is_empty()
            && self.objects.is_empty()
    }
}

/// A custom scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarTypeDefinition {
    /// Type name.
    pub name: TypeName,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A custom enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumTypeDefinition {
    /// Type name.
    pub name: TypeName,
    /// Enum values.
    pub values: Vec<EnumValue>,
}

/// One enum value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    /// The value.
    pub value: String,
}

/// An input object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputObjectDefinition {
    /// Type name.
    pub name: TypeName,
    /// Fields.
    pub fields: Vec<FieldDefinition>,
}

/// An output object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTypeDefinition {
    /// Type name.
    pub name: TypeName,
    /// Fields.
    pub fields: Vec<FieldDefinition>,
    /// Relationships from this type to tracked tables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<TypeRelationship>,
}

/// A typed field of a custom type, or an argument of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name.
    pub name: String,
    /// GraphQL type reference, e.g. `[String!]!`.
    #[serde(rename = "type")]
    pub ty: String,
}

/// A relationship from a custom object type to a tracked table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRelationship {
    /// Relationship name.
    pub name: String,
    /// Cardinality.
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    /// Source of the remote table.
    #[serde(default = "default_source")]
    pub source: SourceName,
    /// Joined table.
    pub remote_table: TableName,
    /// Object field to table column.
    pub field_mapping: BTreeMap<String, ColumnName>,
}

fn default_source() -> SourceName {
    SourceName::new("default")
}

/// A stored action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMetadata {
    /// The action's signature and handler.
    pub definition: ActionDefinition,
    /// Roles allowed to call the action.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<RolePermission>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Signature and handler of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Synchronous or asynchronous delivery.
    #[serde(default)]
    pub kind: ActionKind,
    /// Root the action is exposed in.
    #[serde(rename = "type", default)]
    pub ty: ActionType,
    /// Input arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<FieldDefinition>,
    /// Output type reference.
    pub output_type: String,
    /// Handler endpoint.
    pub handler: String,
}

/// Delivery mode of an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// The handler's response is returned directly.
    #[default]
    Synchronous,
    /// The request is queued and its result fetched later.
    Asynchronous,
}

/// Root an action is exposed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Query root.
    Query,
    /// Mutation root.
    #[default]
    Mutation,
}

/// A scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronTriggerMetadata {
    /// Delivery endpoint.
    pub webhook: String,
    /// Five-field cron schedule.
    pub schedule: String,
    /// Static payload delivered with every event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A named collection of queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryCollection {
    /// Queries in the collection.
    #[serde(default)]
    pub queries: Vec<CollectionQuery>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One named query of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionQuery {
    /// Query name, unique within the collection.
    pub name: String,
    /// Query text.
    pub query: String,
}

/// An allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    /// The allowed collection.
    pub collection: CollectionName,
}

impl fmt::Display for FunctionExposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionExposure::Query => write!(f, "query"),
            FunctionExposure::Mutation => write!(f, "mutation"),
        }
    }
}

impl Metadata {
    /// Returns the table declaration, if tracked.
    pub fn table(&self, source: &SourceName, table: &TableName) -> Option<&TableMetadata> {
        self.sources.get(source)?.tables.get(table)
    }

    /// Returns a mutable handle on the table declaration, if tracked.
    pub fn table_mut(
        &mut self,
        source: &SourceName,
        table: &TableName,
    ) -> Option<&mut TableMetadata> {
        self.sources.get_mut(source)?.tables.get_mut(table)
    }

    /// Lists the identifier of every declared object, in identifier order.
    pub fn object_ids(&self) -> Vec<MetadataObjId> {
        let mut ids = Vec::new();
        for (source, src) in &self.sources {
            ids.push(MetadataObjId::Source {
                source: source.clone(),
            });
            for (table, tbl) in &src.tables {
                ids.push(MetadataObjId::Table {
                    source: source.clone(),
                    table: table.clone(),
                });
                ids.extend(tbl.child_ids(source, table));
            }
            for (function, func) in &src.functions {
                ids.push(MetadataObjId::Function {
                    source: source.clone(),
                    function: function.clone(),
                });
                ids.extend(func.permissions.iter().map(|p| MetadataObjId::FunctionPermission {
                    source: source.clone(),
                    function: function.clone(),
                    role: p.role.clone(),
                }));
            }
        }
        ids.extend(
            self.remote_schemas
                .keys()
                .map(|name| MetadataObjId::RemoteSchema { name: name.clone() }),
        );
        if !self.custom_types.is_empty() {
            ids.push(MetadataObjId::CustomTypes);
        }
        for (name, action) in &self.actions {
            ids.push(MetadataObjId::Action { name: name.clone() });
            ids.extend(action.permissions.iter().map(|p| MetadataObjId::ActionPermission {
                action: name.clone(),
                role: p.role.clone(),
            }));
        }
        ids.extend(
            self.cron_triggers
                .keys()
                .map(|name| MetadataObjId::CronTrigger { name: name.clone() }),
        );
        ids.extend(
            self.query_collections
                .keys()
                .map(|name| MetadataObjId::QueryCollection { name: name.clone() }),
        );
        ids.extend(self.allowlist.iter().map(|entry| MetadataObjId::AllowlistEntry {
            collection: entry.collection.clone(),
        }));
        ids.sort();
        ids.dedup();
        ids
    }

    /// Returns the raw definition of a declared object, or `Null` if it is
    /// not declared.
    pub fn object_definition(&self, id: &MetadataObjId) -> Value {
        self.lookup_definition(id).unwrap_or(Value::Null)
    }

    fn lookup_definition(&self, id: &MetadataObjId) -> Option<Value> {
        fn json<T: Serialize>(value: &T) -> Option<Value> {
            serde_json::to_value(value).ok()
        }
        match id {
            MetadataObjId::Source { source } => json(&self.sources.get(source)?.configuration),
            MetadataObjId::Table { source, table } => json(self.table(source, table)?),
            MetadataObjId::Function { source, function } => {
                json(self.sources.get(source)?.functions.get(function)?)
            }
            MetadataObjId::FunctionPermission {
                source,
                function,
                role,
            } => {
                let func = self.sources.get(source)?.functions.get(function)?;
                json(func.permissions.iter().find(|p| &p.role == role)?)
            }
            MetadataObjId::Relationship {
                source,
                table,
                name,
                kind,
            } => {
                let tbl = self.table(source, table)?;
                match kind {
                    RelationshipKind::Object => json(tbl.object_relationships.get(name)?),
                    RelationshipKind::Array => json(tbl.array_relationships.get(name)?),
                }
            }
            MetadataObjId::ComputedField {
                source,
                table,
                name,
            } => json(self.table(source, table)?.computed_fields.get(name)?),
            MetadataObjId::Permission {
                source,
                table,
                role,
                kind,
            } => {
                let tbl = self.table(source, table)?;
                match kind {
                    PermissionKind::Select => json(tbl.select_permissions.get(role)?),
                    PermissionKind::Insert => json(tbl.insert_permissions.get(role)?),
                    PermissionKind::Update => json(tbl.update_permissions.get(role)?),
                    PermissionKind::Delete => json(tbl.delete_permissions.get(role)?),
                }
            }
            MetadataObjId::EventTrigger {
                source,
                table,
                name,
            } => json(self.table(source, table)?.event_triggers.get(name)?),
            MetadataObjId::RemoteSchema { name } => json(self.remote_schemas.get(name)?),
            MetadataObjId::CustomTypes => json(&self.custom_types),
            MetadataObjId::Action { name } => json(self.actions.get(name)?),
            MetadataObjId::ActionPermission { action, role } => {
                let act = self.actions.get(action)?;
                json(act.permissions.iter().find(|p| &p.role == role)?)
            }
            MetadataObjId::CronTrigger { name } => json(self.cron_triggers.get(name)?),
            MetadataObjId::QueryCollection { name } => json(self.query_collections.get(name)?),
            MetadataObjId::AllowlistEntry { collection } => {
                json(self.allowlist.iter().find(|e| &e.collection == collection)?)
            }
        }
    }
}

impl TableMetadata {
    /// Identifiers of the objects this table owns: relationships, computed
    /// fields, permissions and event triggers.
    pub fn child_ids(&self, source: &SourceName, table: &TableName) -> Vec<MetadataObjId> {
        let relationship = |name: &RelationshipName, kind| MetadataObjId::Relationship {
            source: source.clone(),
            table: table.clone(),
            name: name.clone(),
            kind,
        };
        let permission = |role: &RoleName, kind| MetadataObjId::Permission {
            source: source.clone(),
            table: table.clone(),
            role: role.clone(),
            kind,
        };
        let mut ids: Vec<MetadataObjId> = Vec::new();
        ids.extend(
            self.object_relationships
                .keys()
                .map(|n| relationship(n, RelationshipKind::Object)),
        );
        ids.extend(
            self.array_relationships
                .keys()
                .map(|n| relationship(n, RelationshipKind::Array)),
        );
        ids.extend(self.computed_fields.keys().map(|n| MetadataObjId::ComputedField {
            source: source.clone(),
            table: table.clone(),
            name: n.clone(),
        }));
        ids.extend(
            self.select_permissions
                .keys()
                .map(|r| permission(r, PermissionKind::Select)),
        );
        ids.extend(
            self.insert_permissions
                .keys()
                .map(|r| permission(r, PermissionKind::Insert)),
        );
        ids.extend(
            self.update_permissions
                .keys()
                .map(|r| permission(r, PermissionKind::Update)),
        );
        ids.extend(
            self.delete_permissions
                .keys()
                .map(|r| permission(r, PermissionKind::Delete)),
        );
        ids.extend(self.event_triggers.keys().map(|n| MetadataObjId::EventTrigger {
            source: source.clone(),
            table: table.clone(),
            name: n.clone(),
        }));
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_relationships() {
        let table: TableMetadata = serde_json::from_value(json!({
            "object_relationships": {
                "author": { "using": { "foreign_key_constraint_on": "author_id" } },
                "editor": { "using": { "manual_configuration": {
                    "remote_table": "author",
                    "column_mapping": { "editor_id": "id" }
                } } }
            },
            "array_relationships": {
                "reviews": { "using": { "foreign_key_constraint_on": {
                    "table": "review", "column": "book_id"
                } } }
            }
        }))
        .unwrap();
        assert!(matches!(
            table.object_relationships["author"].join(),
            RelationshipJoin::LocalForeignKey(c) if c.as_str() == "author_id"
        ));
        assert!(matches!(
            table.object_relationships["editor"].join(),
            RelationshipJoin::Manual(m) if m.remote_table.as_str() == "author"
        ));
        assert!(matches!(
            table.array_relationships["reviews"].join(),
            RelationshipJoin::RemoteForeignKey(fk) if fk.table.as_str() == "review"
        ));
    }

    #[test]
    fn permission_columns_star_and_list() {
        let all: PermissionColumns = serde_json::from_value(json!("*")).unwrap();
        assert_eq!(all, PermissionColumns::All);
        let some: PermissionColumns = serde_json::from_value(json!(["id", "name"])).unwrap();
        assert_eq!(some.listed().len(), 2);
        let none: PermissionColumns = serde_json::from_value(json!([])).unwrap();
        assert_eq!(none, PermissionColumns::None);
        assert!(serde_json::from_value::<PermissionColumns>(json!("id")).is_err());
        assert_eq!(serde_json::to_value(&all).unwrap(), json!("*"));
    }

    #[test]
    fn empty_collections_are_not_serialized() {
        let metadata = Metadata::default();
        assert_eq!(serde_json::to_value(&metadata).unwrap(), json!({}));
    }

    #[test]
    fn action_defaults() {
        let action: ActionMetadata = serde_json::from_value(json!({
            "definition": { "output_type": "LoginResponse", "handler": "http://auth/login" }
        }))
        .unwrap();
        assert_eq!(action.definition.kind, ActionKind::Synchronous);
        assert_eq!(action.definition.ty, ActionType::Mutation);
    }

    #[test]
    fn type_relationship_defaults_to_default_source() {
        let rel: TypeRelationship = serde_json::from_value(json!({
            "name": "user", "type": "object", "remote_table": "user",
            "field_mapping": { "user_id": "id" }
        }))
        .unwrap();
        assert_eq!(rel.source.as_str(), "default");
    }

    #[test]
    fn object_ids_and_definitions() {
        let metadata: Metadata = serde_json::from_value(json!({
            "sources": { "default": { "tables": { "author": {
                "select_permissions": { "user": { "columns": "*", "filter": {} } }
            } } } },
            "allowlist": [ { "collection": "allowed" } ]
        }))
        .unwrap();
        let ids = metadata.object_ids();
        let permission = MetadataObjId::Permission {
            source: "default".into(),
            table: "author".into(),
            role: "user".into(),
            kind: PermissionKind::Select,
        };
        assert!(ids.contains(&permission));
        assert!(ids.contains(&MetadataObjId::AllowlistEntry {
            collection: "allowed".into()
        }));
        assert!(!ids.contains(&MetadataObjId::CustomTypes));
        assert_eq!(metadata.object_definition(&permission)["columns"], json!("*"));
        assert_eq!(
            metadata.object_definition(&MetadataObjId::Action { name: "x".into() }),
            Value::Null
        );
    }
}
