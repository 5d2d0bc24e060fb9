//! Composable edits to a metadata document.
//!
//! The drift checker never mutates the persisted document directly. It
//! produces a [`MetadataUpdater`], applies it to an in-memory copy for the
//! rebuild, and hands the same updater to the persistence layer so the stored
//! document receives exactly the edits the new schema cache was built from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strata_common::{ColumnName, RelationshipName, SourceName, TableName};

use crate::document::{
    ArrayRelationshipUsing, Metadata, ObjectRelationshipUsing, PermissionColumns, SourceMetadata,
    TableMetadata,
};
use crate::ids::{MetadataObjId, PermissionKind, RelationshipKind};

/// One edit of the metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetadataUpdate {
    /// Removes a declared object. Removing a table or function removes
    /// everything declared on it. Removing an absent object is a no-op.
    DropObject {
        /// The object to remove.
        id: MetadataObjId,
    },
    /// Forgets a column that no longer exists on a table.
    DropColumn {
        /// Source name.
        source: SourceName,
        /// Table name.
        table: TableName,
        /// The dropped column.
        column: ColumnName,
    },
    /// Rewrites every reference to a renamed column.
    RenameColumn(ColumnRename),
}

/// A column rename and the relationship targets needed to follow boolean
/// expressions across tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRename {
    /// Source name.
    pub source: SourceName,
    /// The table whose column was renamed.
    pub table: TableName,
    /// Old column name.
    pub from: ColumnName,
    /// New column name.
    pub to: ColumnName,
    /// Remote tables of relationships whose join the document alone does not
    /// name (object relationships over a local foreign key).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationship_targets: Vec<RelationshipTarget>,
}

/// The remote table a relationship resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipTarget {
    /// Owning table.
    pub table: TableName,
    /// Relationship name.
    pub relationship: RelationshipName,
    /// Joined table.
    pub remote_table: TableName,
}

/// An ordered list of edits, applied atomically by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdater {
    /// Edits, in application order.
    pub updates: Vec<MetadataUpdate>,
}

impl MetadataUpdater {
    /// Creates an empty updater.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the edits that remove every listed object from the document.
    pub fn drop_inconsistent<'a>(ids: impl IntoIterator<Item = &'a MetadataObjId>) -> Self {
        let mut updater = Self::new();
        for id in ids {
            updater.push(MetadataUpdate::DropObject { id: id.clone() });
        }
        updater
    }

    /// Appends one edit.
    pub fn push(&mut self, update: MetadataUpdate) {
        self.updates.push(update);
    }

    /// Appends all edits of another updater.
    pub fn extend(&mut self, other: MetadataUpdater) {
        self.updates.extend(other.updates);
    }

    /// Returns `true` if the updater holds no edit.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Number of edits.
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Applies every edit in order.
    pub fn apply(&self, metadata: &mut Metadata) {
        for update in &self.updates {
            match update {
                MetadataUpdate::DropObject { id } => drop_object(metadata, id),
                MetadataUpdate::DropColumn {
                    source,
                    table,
                    column,
                } => {
                    if let Some(tbl) = metadata.table_mut(source, table) {
                        drop_column(tbl, column);
                    }
                }
                MetadataUpdate::RenameColumn(rename) => rename_column(metadata, rename),
            }
        }
    }
}

fn drop_object(metadata: &mut Metadata, id: &MetadataObjId) {
    match id {
        MetadataObjId::Source { source } => {
            metadata.sources.remove(source);
        }
        MetadataObjId::Table { source, table } => {
            if let Some(src) = metadata.sources.get_mut(source) {
                src.tables.remove(table);
            }
        }
        MetadataObjId::Function { source, function } => {
            if let Some(src) = metadata.sources.get_mut(source) {
                src.functions.remove(function);
            }
        }
        MetadataObjId::FunctionPermission {
            source,
            function,
            role,
        } => {
            let func = metadata
                .sources
                .get_mut(source)
                .and_then(|src| src.functions.get_mut(function));
            if let Some(func) = func {
                func.permissions.retain(|p| &p.role != role);
            }
        }
        MetadataObjId::Relationship {
            source,
            table,
            name,
            kind,
        } => {
            if let Some(tbl) = metadata.table_mut(source, table) {
                match kind {
                    RelationshipKind::Object => {
                        tbl.object_relationships.remove(name);
                    }
                    RelationshipKind::Array => {
                        tbl.array_relationships.remove(name);
                    }
                }
            }
        }
        MetadataObjId::ComputedField {
            source,
            table,
            name,
        } => {
            if let Some(tbl) = metadata.table_mut(source, table) {
                tbl.computed_fields.remove(name);
            }
        }
        MetadataObjId::Permission {
            source,
            table,
            role,
            kind,
        } => {
            if let Some(tbl) = metadata.table_mut(source, table) {
                match kind {
                    PermissionKind::Select => {
                        tbl.select_permissions.remove(role);
                    }
                    PermissionKind::Insert => {
                        tbl.insert_permissions.remove(role);
                    }
                    PermissionKind::Update => {
                        tbl.update_permissions.remove(role);
                    }
                    PermissionKind::Delete => {
                        tbl.delete_permissions.remove(role);
                    }
                }
            }
        }
        MetadataObjId::EventTrigger {
            source,
            table,
            name,
        } => {
            if let Some(tbl) = metadata.table_mut(source, table) {
                tbl.event_triggers.remove(name);
            }
        }
        MetadataObjId::RemoteSchema { name } => {
            metadata.remote_schemas.remove(name);
        }
        MetadataObjId::CustomTypes => metadata.custom_types = Default::default(),
        MetadataObjId::Action { name } => {
            metadata.actions.remove(name);
        }
        MetadataObjId::ActionPermission { action, role } => {
            if let Some(act) = metadata.actions.get_mut(action) {
                act.permissions.retain(|p| &p.role != role);
            }
        }
        MetadataObjId::CronTrigger { name } => {
            metadata.cron_triggers.remove(name);
        }
        MetadataObjId::QueryCollection { name } => {
            metadata.query_collections.remove(name);
        }
        MetadataObjId::AllowlistEntry { collection } => {
            metadata.allowlist.retain(|e| &e.collection != collection);
        }
    }
}

fn drop_column(table: &mut TableMetadata, column: &ColumnName) {
    table.configuration.column_config.remove(column);
    let remove = |columns: &mut PermissionColumns| {
        if let Some(list) = columns.listed_mut() {
            list.retain(|c| c != column);
            if list.is_empty() {
                *columns = PermissionColumns::None;
            }
        }
    };
    for perm in table.select_permissions.values_mut() {
        remove(&mut perm.columns);
    }
    for perm in table.insert_permissions.values_mut() {
        remove(&mut perm.columns);
        perm.set.remove(column);
    }
    for perm in table.update_permissions.values_mut() {
        remove(&mut perm.columns);
        perm.set.remove(column);
    }
    for trigger in table.event_triggers.values_mut() {
        let ops = &mut trigger.definition;
        for spec in [&mut ops.insert, &mut ops.update, &mut ops.delete]
            .into_iter()
            .flatten()
        {
            remove(&mut spec.columns);
        }
    }
}

type RelationshipMap = BTreeMap<(TableName, RelationshipName), TableName>;

/// Maps every relationship of a source to its remote table.
fn relationship_map(source: &SourceMetadata, extra: &[RelationshipTarget]) -> RelationshipMap {
    let mut map = RelationshipMap::new();
    for (table, tbl) in &source.tables {
        for (name, rel) in &tbl.object_relationships {
            if let ObjectRelationshipUsing::ManualConfiguration(manual) = &rel.using {
                map.insert((table.clone(), name.clone()), manual.remote_table.clone());
            }
        }
        for (name, rel) in &tbl.array_relationships {
            let remote = match &rel.using {
                ArrayRelationshipUsing::ForeignKeyConstraintOn(fk) => &fk.table,
                ArrayRelationshipUsing::ManualConfiguration(manual) => &manual.remote_table,
            };
            map.insert((table.clone(), name.clone()), remote.clone());
        }
    }
    for target in extra {
        map.insert(
            (target.table.clone(), target.relationship.clone()),
            target.remote_table.clone(),
        );
    }
    map
}

fn rename_column(metadata: &mut Metadata, rename: &ColumnRename) {
    let ColumnRename {
        source,
        table,
        from,
        to,
        relationship_targets,
    } = rename;
    if let Some(src) = metadata.sources.get_mut(source) {
        let relationships = relationship_map(src, relationship_targets);
        let exp = BoolExpRename {
            table,
            from,
            to,
            relationships: &relationships,
        };
        for (name, tbl) in src.tables.iter_mut() {
            rename_in_bool_exps(tbl, name, &exp);
            rename_in_relationships(tbl, name, rename);
        }
        if let Some(tbl) = src.tables.get_mut(table) {
            rename_in_own_declarations(tbl, from, to);
        }
    }
    for object in &mut metadata.custom_types.objects {
        for rel in &mut object.relationships {
            if &rel.source == source && &rel.remote_table == table {
                for column in rel.field_mapping.values_mut() {
                    if column == from {
                        *column = to.clone();
                    }
                }
            }
        }
    }
}

fn rename_in_own_declarations(table: &mut TableMetadata, from: &ColumnName, to: &ColumnName) {
    if let Some(config) = table.configuration.column_config.remove(from) {
        table.configuration.column_config.insert(to.clone(), config);
    }
    let rename_list = |columns: &mut PermissionColumns| {
        if let Some(list) = columns.listed_mut() {
            for column in list.iter_mut().filter(|c| *c == from) {
                *column = to.clone();
            }
        }
    };
    let rename_preset = |set: &mut BTreeMap<ColumnName, Value>| {
        if let Some(value) = set.remove(from) {
            set.insert(to.clone(), value);
        }
    };
    for perm in table.select_permissions.values_mut() {
        rename_list(&mut perm.columns);
    }
    for perm in table.insert_permissions.values_mut() {
        rename_list(&mut perm.columns);
        rename_preset(&mut perm.set);
    }
    for perm in table.update_permissions.values_mut() {
        rename_list(&mut perm.columns);
        rename_preset(&mut perm.set);
    }
    for trigger in table.event_triggers.values_mut() {
        let ops = &mut trigger.definition;
        for spec in [&mut ops.insert, &mut ops.update, &mut ops.delete]
            .into_iter()
            .flatten()
        {
            rename_list(&mut spec.columns);
        }
    }
}

fn rename_in_relationships(
    owner: &mut TableMetadata,
    owner_name: &TableName,
    rename: &ColumnRename,
) {
    let local = owner_name == &rename.table;
    let swap = |column: &mut ColumnName| {
        if column == &rename.from {
            *column = rename.to.clone();
        }
    };
    let remap = |mapping: &mut BTreeMap<ColumnName, ColumnName>, remote: bool| {
        let entries = std::mem::take(mapping);
        for (mut left, mut right) in entries {
            if local {
                swap(&mut left);
            }
            if remote {
                swap(&mut right);
            }
            mapping.insert(left, right);
        }
    };
    for rel in owner.object_relationships.values_mut() {
        match &mut rel.using {
            ObjectRelationshipUsing::ForeignKeyConstraintOn(column) if local => swap(column),
            ObjectRelationshipUsing::ForeignKeyConstraintOn(_) => {}
            ObjectRelationshipUsing::ManualConfiguration(manual) => {
                let remote = manual.remote_table == rename.table;
                remap(&mut manual.column_mapping, remote);
            }
        }
    }
    for rel in owner.array_relationships.values_mut() {
        match &mut rel.using {
            ArrayRelationshipUsing::ForeignKeyConstraintOn(fk) => {
                if fk.table == rename.table {
                    swap(&mut fk.column);
                }
            }
            ArrayRelationshipUsing::ManualConfiguration(manual) => {
                let remote = manual.remote_table == rename.table;
                remap(&mut manual.column_mapping, remote);
            }
        }
    }
}

struct BoolExpRename<'a> {
    table: &'a TableName,
    from: &'a ColumnName,
    to: &'a ColumnName,
    relationships: &'a RelationshipMap,
}

fn rename_in_bool_exps(tbl: &mut TableMetadata, name: &TableName, exp: &BoolExpRename<'_>) {
    for perm in tbl.select_permissions.values_mut() {
        exp.walk(&mut perm.filter, name);
    }
    for perm in tbl.insert_permissions.values_mut() {
        exp.walk(&mut perm.check, name);
    }
    for perm in tbl.update_permissions.values_mut() {
        exp.walk(&mut perm.filter, name);
        if let Some(check) = &mut perm.check {
            exp.walk(check, name);
        }
    }
    for perm in tbl.delete_permissions.values_mut() {
        exp.walk(&mut perm.filter, name);
    }
}

impl BoolExpRename<'_> {
    fn walk(&self, exp: &mut Value, current: &TableName) {
        let Value::Object(map) = exp else {
            return;
        };
        let keys: Vec<String> = map.keys().cloned().collect();
        for key in keys {
            match key.as_str() {
                "_and" | "_or" => {
                    if let Some(Value::Array(items)) = map.get_mut(&key) {
                        for item in items {
                            self.walk(item, current);
                        }
                    }
                }
                "_not" => {
                    if let Some(inner) = map.get_mut(&key) {
                        self.walk(inner, current);
                    }
                }
                op if op.starts_with('_') => {}
                field => {
                    let rel = (current.clone(), RelationshipName::new(field));
                    if let Some(remote) = self.relationships.get(&rel) {
                        if let Some(inner) = map.get_mut(&key) {
                            self.walk(inner, remote);
                        }
                    } else if current == self.table && field == self.from.as_str() {
                        rename_key(map, &key, self.to.as_str());
                    }
                }
            }
        }
    }
}

fn rename_key(map: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = map.remove(from) {
        map.insert(to.to_string(), value);
    }
}
