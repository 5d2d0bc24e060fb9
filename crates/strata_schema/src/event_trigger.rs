//! Event triggers on tracked tables.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use strata_common::{ColumnName, TableName, TriggerName};
use strata_metadata::{
    DependencyReason, EventTrigger, MetadataObjId, PermissionColumns, SchemaDependency,
    SchemaObjId, TableMetadata,
};

use crate::context::CollectLog;
use crate::errors;
use crate::schema_cache::{ColumnInfo, EventTriggerInfo};
use crate::source::SourceView;

/// Longest accepted trigger name. Trigger names become part of database
/// object names, which have a length limit.
pub const MAX_TRIGGER_NAME_LEN: usize = 42;

/// Compiles every event trigger declared on `table`.
pub fn compile_event_triggers(
    view: &SourceView<'_>,
    table: &TableName,
    declared: &TableMetadata,
    columns: &BTreeMap<ColumnName, ColumnInfo>,
    log: &mut CollectLog,
) -> BTreeMap<TriggerName, EventTriggerInfo> {
    let mut compiled = BTreeMap::new();
    for (name, trigger) in &declared.event_triggers {
        let id = MetadataObjId::EventTrigger {
            source: view.name.clone(),
            table: table.clone(),
            name: name.clone(),
        };
        let mut dependencies = vec![SchemaDependency::new(
            SchemaObjId::table_of(view.name, table),
            DependencyReason::Parent,
        )];
        match compile_one(view, table, name, trigger, columns, &mut dependencies) {
            Ok(info) => {
                log.record(id, Vec::new(), dependencies);
                compiled.insert(name.clone(), info);
            }
            Err(reason) => {
                let definition = serde_json::to_value(trigger).unwrap_or(Value::Null);
                log.reject(id, definition, reason);
            }
        }
    }
    compiled
}

/// Checks the length and character set of a trigger name.
pub fn validate_trigger_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_TRIGGER_NAME_LEN {
        return Err(format!(
            "trigger name must be between 1 and {MAX_TRIGGER_NAME_LEN} characters long"
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!(
            "trigger name \"{name}\" may only contain letters, digits, '_' and '-'"
        ));
    }
    Ok(())
}

fn compile_one(
    view: &SourceView<'_>,
    table: &TableName,
    name: &TriggerName,
    trigger: &EventTrigger,
    columns: &BTreeMap<ColumnName, ColumnInfo>,
    dependencies: &mut Vec<SchemaDependency>,
) -> Result<EventTriggerInfo, String> {
    validate_trigger_name(name.as_str())?;
    let ops = &trigger.definition;
    if ops.insert.is_none() && ops.update.is_none() && ops.delete.is_none() && !ops.enable_manual {
        return Err("at least one operation or manual invocation must be enabled".to_string());
    }
    if trigger.webhook.trim().is_empty() {
        return Err("webhook must not be empty".to_string());
    }

    let mut listed = |spec: &PermissionColumns| -> Result<BTreeSet<ColumnName>, String> {
        match spec {
            PermissionColumns::All => Ok(columns.keys().cloned().collect()),
            PermissionColumns::None => Ok(BTreeSet::new()),
            PermissionColumns::Only(list) => {
                for column in list {
                    if !columns.contains_key(column) {
                        return Err(errors::missing_column(column, table));
                    }
                    dependencies.push(SchemaDependency::new(
                        SchemaObjId::column(view.name, table, column),
                        DependencyReason::Column,
                    ));
                }
                Ok(list.iter().cloned().collect())
            }
        }
    };
    for spec in [&ops.insert, &ops.delete].into_iter().flatten() {
        listed(&spec.columns)?;
    }
    let update = match &ops.update {
        Some(spec) => {
            let watched = listed(&spec.columns)?;
            if watched.is_empty() {
                return Err("update operation must watch at least one column".to_string());
            }
            Some(watched)
        }
        None => None,
    };

    Ok(EventTriggerInfo {
        name: name.clone(),
        insert: ops.insert.is_some(),
        update,
        delete: ops.delete.is_some(),
        enable_manual: ops.enable_manual,
        webhook: trigger.webhook.clone(),
        retry_conf: trigger.retry_conf.clone(),
    })
}
