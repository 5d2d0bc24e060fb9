//! Identifiers of declared objects and of the finer-grained targets that
//! dependency edges point at.
//!
//! A [`MetadataObjId`] names one declared entity and is the unit of
//! inconsistency reporting. A [`SchemaObjId`] names something an object can
//! depend on, such as a single column. One metadata object usually provides
//! several schema objects (a table provides itself and all its columns).

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_common::{
    ActionName, CollectionName, ColumnName, ComputedFieldName, ConstraintName, FunctionName,
    RelationshipName, RemoteSchemaName, RoleName, SourceName, TableName, TriggerName, TypeName,
};

/// Cardinality of a relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// At most one remote row.
    Object,
    /// Any number of remote rows.
    Array,
}

/// The operation a table permission governs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Reading rows.
    Select,
    /// Inserting rows.
    Insert,
    /// Updating rows.
    Update,
    /// Deleting rows.
    Delete,
}

impl PermissionKind {
    /// All permission kinds, in declaration order.
    pub const ALL: [PermissionKind; 4] = [
        PermissionKind::Select,
        PermissionKind::Insert,
        PermissionKind::Update,
        PermissionKind::Delete,
    ];
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionKind::Select => write!(f, "select"),
            PermissionKind::Insert => write!(f, "insert"),
            PermissionKind::Update => write!(f, "update"),
            PermissionKind::Delete => write!(f, "delete"),
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipKind::Object => write!(f, "object"),
            RelationshipKind::Array => write!(f, "array"),
        }
    }
}

/// Identifies one declared object in the metadata document.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetadataObjId {
    /// A backing data source.
    Source {
        /// Source name.
        source: SourceName,
    },
    /// A tracked table.
    Table {
        /// Source name.
        source: SourceName,
        /// Table name.
        table: TableName,
    },
    /// A tracked function.
    Function {
        /// Source name.
        source: SourceName,
        /// Function name.
        function: FunctionName,
    },
    /// A role's permission to call a function.
    FunctionPermission {
        /// Source name.
        source: SourceName,
        /// Function name.
        function: FunctionName,
        /// Granted role.
        role: RoleName,
    },
    /// An object or array relationship.
    Relationship {
        /// Source name.
        source: SourceName,
        /// Owning table.
        table: TableName,
        /// Relationship name.
        name: RelationshipName,
        /// Cardinality.
        kind: RelationshipKind,
    },
    /// A computed field.
    ComputedField {
        /// Source name.
        source: SourceName,
        /// Owning table.
        table: TableName,
        /// Field name.
        name: ComputedFieldName,
    },
    /// A table permission for one role and operation.
    Permission {
        /// Source name.
        source: SourceName,
        /// Owning table.
        table: TableName,
        /// Role.
        role: RoleName,
        /// Operation.
        kind: PermissionKind,
    },
    /// An event trigger.
    EventTrigger {
        /// Source name.
        source: SourceName,
        /// Owning table.
        table: TableName,
        /// Trigger name.
        name: TriggerName,
    },
    /// A remote service.
    RemoteSchema {
        /// Remote schema name.
        name: RemoteSchemaName,
    },
    /// The custom type definitions, validated as one unit.
    CustomTypes,
    /// An action.
    Action {
        /// Action name.
        name: ActionName,
    },
    /// A role's permission to call an action.
    ActionPermission {
        /// Action name.
        action: ActionName,
        /// Granted role.
        role: RoleName,
    },
    /// A scheduled trigger.
    CronTrigger {
        /// Trigger name.
        name: TriggerName,
    },
    /// A query collection.
    QueryCollection {
        /// Collection name.
        name: CollectionName,
    },
    /// An allow-list entry.
    AllowlistEntry {
        /// Allowed collection.
        collection: CollectionName,
    },
}

impl MetadataObjId {
    /// Returns the table that owns this object, for relationships, computed
    /// fields, permissions and event triggers.
    pub fn owner_table(&self) -> Option<(&SourceName, &TableName)> {
        match self {
            MetadataObjId::Relationship { source, table, .. }
            | MetadataObjId::ComputedField { source, table, .. }
            | MetadataObjId::Permission { source, table, .. }
            | MetadataObjId::EventTrigger { source, table, .. } => Some((source, table)),
            _ => None,
        }
    }

    /// Returns the source this object lives in, if any.
    pub fn source(&self) -> Option<&SourceName> {
        match self {
            MetadataObjId::Source { source }
            | MetadataObjId::Table { source, .. }
            | MetadataObjId::Function { source, .. }
            | MetadataObjId::FunctionPermission { source, .. }
            | MetadataObjId::Relationship { source, .. }
            | MetadataObjId::ComputedField { source, .. }
            | MetadataObjId::Permission { source, .. }
            | MetadataObjId::EventTrigger { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Short machine-readable kind, used as the `type` of report entries.
    pub fn kind_name(&self) -> &'static str {
        match self {
            MetadataObjId::Source { .. } => "source",
            MetadataObjId::Table { .. } => "table",
            MetadataObjId::Function { .. } => "function",
            MetadataObjId::FunctionPermission { .. } => "function_permission",
            MetadataObjId::Relationship {
                kind: RelationshipKind::Object,
                ..
            } => "object_relation",
            MetadataObjId::Relationship {
                kind: RelationshipKind::Array,
                ..
            } => "array_relation",
            MetadataObjId::ComputedField { .. } => "computed_field",
            MetadataObjId::Permission { kind, .. } => match kind {
                PermissionKind::Select => "select_permission",
                PermissionKind::Insert => "insert_permission",
                PermissionKind::Update => "update_permission",
                PermissionKind::Delete => "delete_permission",
            },
            MetadataObjId::EventTrigger { .. } => "event_trigger",
            MetadataObjId::RemoteSchema { .. } => "remote_schema",
            MetadataObjId::CustomTypes => "custom_types",
            MetadataObjId::Action { .. } => "action",
            MetadataObjId::ActionPermission { .. } => "action_permission",
            MetadataObjId::CronTrigger { .. } => "cron_trigger",
            MetadataObjId::QueryCollection { .. } => "query_collection",
            MetadataObjId::AllowlistEntry { .. } => "allowlist",
        }
    }
}

impl fmt::Display for MetadataObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataObjId::Source { source } => write!(f, "source {source:?}"),
            MetadataObjId::Table { source, table } => {
                write!(f, "table {table:?} in source {source:?}")
            }
            MetadataObjId::Function { source, function } => {
                write!(f, "function {function:?} in source {source:?}")
            }
            MetadataObjId::FunctionPermission {
                source,
                function,
                role,
            } => write!(
                f,
                "permission for role {role:?} on function {function:?} in source {source:?}"
            ),
            MetadataObjId::Relationship {
                source,
                table,
                name,
                kind,
            } => write!(
                f,
                "{kind} relationship {name:?} on table {table:?} in source {source:?}"
            ),
            MetadataObjId::ComputedField {
                source,
                table,
                name,
            } => write!(
                f,
                "computed field {name:?} on table {table:?} in source {source:?}"
            ),
            MetadataObjId::Permission {
                source,
                table,
                role,
                kind,
            } => write!(
                f,
                "{kind} permission for role {role:?} on table {table:?} in source {source:?}"
            ),
            MetadataObjId::EventTrigger {
                source,
                table,
                name,
            } => write!(
                f,
                "event trigger {name:?} on table {table:?} in source {source:?}"
            ),
            MetadataObjId::RemoteSchema { name } => write!(f, "remote schema {name:?}"),
            MetadataObjId::CustomTypes => write!(f, "custom types"),
            MetadataObjId::Action { name } => write!(f, "action {name:?}"),
            MetadataObjId::ActionPermission { action, role } => {
                write!(f, "permission for role {role:?} on action {action:?}")
            }
            MetadataObjId::CronTrigger { name } => write!(f, "cron trigger {name:?}"),
            MetadataObjId::QueryCollection { name } => write!(f, "query collection {name:?}"),
            MetadataObjId::AllowlistEntry { collection } => {
                write!(f, "allowlist entry for collection {collection:?}")
            }
        }
    }
}

/// A dependency target.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaObjId {
    /// A data source whose catalog was introspected.
    Source {
        /// Source name.
        source: SourceName,
    },
    /// A function present in a source catalog, tracked or not.
    CatalogFunction {
        /// Source name.
        source: SourceName,
        /// Function name.
        function: FunctionName,
    },
    /// A tracked table.
    Table {
        /// Source name.
        source: SourceName,
        /// Table name.
        table: TableName,
    },
    /// A column of a tracked table.
    Column {
        /// Source name.
        source: SourceName,
        /// Table name.
        table: TableName,
        /// Column name.
        column: ColumnName,
    },
    /// A foreign-key constraint of a tracked table.
    ForeignKey {
        /// Source name.
        source: SourceName,
        /// Constrained table.
        table: TableName,
        /// Constraint name.
        constraint: ConstraintName,
    },
    /// A relationship of a tracked table.
    Relationship {
        /// Source name.
        source: SourceName,
        /// Owning table.
        table: TableName,
        /// Relationship name.
        name: RelationshipName,
    },
    /// A computed field of a tracked table.
    ComputedField {
        /// Source name.
        source: SourceName,
        /// Owning table.
        table: TableName,
        /// Field name.
        name: ComputedFieldName,
    },
    /// A table permission.
    Permission {
        /// Source name.
        source: SourceName,
        /// Owning table.
        table: TableName,
        /// Role.
        role: RoleName,
        /// Operation.
        kind: PermissionKind,
    },
    /// A tracked function.
    Function {
        /// Source name.
        source: SourceName,
        /// Function name.
        function: FunctionName,
    },
    /// A remote schema.
    RemoteSchema {
        /// Remote schema name.
        name: RemoteSchemaName,
    },
    /// A custom type.
    CustomType {
        /// Type name.
        name: TypeName,
    },
    /// An action.
    Action {
        /// Action name.
        name: ActionName,
    },
    /// A query collection.
    QueryCollection {
        /// Collection name.
        name: CollectionName,
    },
}

impl SchemaObjId {
    /// Returns the table this target belongs to (or is), if any.
    pub fn table(&self) -> Option<(&SourceName, &TableName)> {
        match self {
            SchemaObjId::Table { source, table }
            | SchemaObjId::Column { source, table, .. }
            | SchemaObjId::ForeignKey { source, table, .. }
            | SchemaObjId::Relationship { source, table, .. }
            | SchemaObjId::ComputedField { source, table, .. }
            | SchemaObjId::Permission { source, table, .. } => Some((source, table)),
            _ => None,
        }
    }

    /// Shorthand for a column target.
    pub fn column(source: &SourceName, table: &TableName, column: &ColumnName) -> Self {
        SchemaObjId::Column {
            source: source.clone(),
            table: table.clone(),
            column: column.clone(),
        }
    }

    /// Shorthand for a table target.
    pub fn table_of(source: &SourceName, table: &TableName) -> Self {
        SchemaObjId::Table {
            source: source.clone(),
            table: table.clone(),
        }
    }
}

impl fmt::Display for SchemaObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaObjId::Source { source } => write!(f, "source {source:?}"),
            SchemaObjId::CatalogFunction { source, function } => {
                write!(f, "function {function:?} in the catalog of source {source:?}")
            }
            SchemaObjId::Table { source, table } => {
                write!(f, "table {table:?} in source {source:?}")
            }
            SchemaObjId::Column {
                source,
                table,
                column,
            } => write!(
                f,
                "column {column:?} of table {table:?} in source {source:?}"
            ),
            SchemaObjId::ForeignKey {
                source,
                table,
                constraint,
            } => write!(
                f,
                "foreign key {constraint:?} of table {table:?} in source {source:?}"
            ),
            SchemaObjId::Relationship {
                source,
                table,
                name,
            } => write!(
                f,
                "relationship {name:?} of table {table:?} in source {source:?}"
            ),
            SchemaObjId::ComputedField {
                source,
                table,
                name,
            } => write!(
                f,
                "computed field {name:?} of table {table:?} in source {source:?}"
            ),
            SchemaObjId::Permission {
                source,
                table,
                role,
                kind,
            } => write!(
                f,
                "{kind} permission for role {role:?} on table {table:?} in source {source:?}"
            ),
            SchemaObjId::Function { source, function } => {
                write!(f, "function {function:?} in source {source:?}")
            }
            SchemaObjId::RemoteSchema { name } => write!(f, "remote schema {name:?}"),
            SchemaObjId::CustomType { name } => write!(f, "custom type {name:?}"),
            SchemaObjId::Action { name } => write!(f, "action {name:?}"),
            SchemaObjId::QueryCollection { name } => write!(f, "query collection {name:?}"),
        }
    }
}

/// Why an object depends on a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyReason {
    /// The target owns the dependent (a table owns its permissions).
    Parent,
    /// A column is read or written.
    Column,
    /// A local join column of a relationship.
    LeftColumn,
    /// A remote join column of a relationship.
    RightColumn,
    /// The joined table of a relationship.
    RemoteTable,
    /// The constraint a relationship follows.
    ForeignKey,
    /// A relationship traversed by a boolean expression.
    Relationship,
    /// The table a function returns.
    ReturnType,
    /// The column's type matters (presets, typed arguments).
    OnType,
    /// The function a computed field calls.
    Function,
    /// A permission that must exist for this grant to make sense.
    Permission,
    /// A custom type used in a signature.
    CustomType,
    /// A query collection referenced by the allow-list.
    Collection,
}

impl fmt::Display for DependencyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DependencyReason::Parent => "parent",
            DependencyReason::Column => "column",
            DependencyReason::LeftColumn => "left column",
            DependencyReason::RightColumn => "right column",
            DependencyReason::RemoteTable => "remote table",
            DependencyReason::ForeignKey => "foreign key",
            DependencyReason::Relationship => "relationship",
            DependencyReason::ReturnType => "return type",
            DependencyReason::OnType => "column type",
            DependencyReason::Function => "function",
            DependencyReason::Permission => "permission",
            DependencyReason::CustomType => "custom type",
            DependencyReason::Collection => "collection",
        };
        f.write_str(text)
    }
}

/// One outgoing dependency edge of an object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaDependency {
    /// What is depended on.
    pub target: SchemaObjId,
    /// Why.
    pub reason: DependencyReason,
}

impl SchemaDependency {
    /// Creates a dependency edge.
    pub fn new(target: SchemaObjId, reason: DependencyReason) -> Self {
        Self { target, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permission() -> MetadataObjId {
        MetadataObjId::Permission {
            source: "default".into(),
            table: "author".into(),
            role: "user".into(),
            kind: PermissionKind::Select,
        }
    }

    #[test]
    fn display_reads_as_a_path() {
        assert_eq!(
            permission().to_string(),
            "select permission for role \"user\" on table \"author\" in source \"default\""
        );
    }

    #[test]
    fn owner_table_only_for_table_children() {
        assert!(permission().owner_table().is_some());
        let table = MetadataObjId::Table {
            source: "default".into(),
            table: "author".into(),
        };
        assert!(table.owner_table().is_none());
        assert_eq!(table.source().map(|s| s.as_str()), Some("default"));
    }

    #[test]
    fn kind_names() {
        assert_eq!(permission().kind_name(), "select_permission");
        assert_eq!(MetadataObjId::CustomTypes.kind_name(), "custom_types");
    }

    #[test]
    fn serde_tagged_shape() {
        let json = serde_json::to_value(permission()).unwrap();
        assert_eq!(json["type"], "permission");
        assert_eq!(json["kind"], "select");
        let back: MetadataObjId = serde_json::from_value(json).unwrap();
        assert_eq!(back, permission());
    }

    #[test]
    fn schema_obj_table_of_column() {
        let col = SchemaObjId::column(&"default".into(), &"author".into(), &"id".into());
        let (source, table) = col.table().unwrap();
        assert_eq!(source.as_str(), "default");
        assert_eq!(table.as_str(), "author");
        assert!(SchemaObjId::RemoteSchema { name: "x".into() }.table().is_none());
    }
}
