//! Query collections and the allow-list.

use std::collections::BTreeMap;

use serde_json::Value;
use strata_common::CollectionName;
use strata_metadata::{
    AllowlistEntry, DependencyReason, MetadataObjId, QueryCollection, SchemaDependency,
    SchemaObjId,
};

use crate::context::CollectLog;
use crate::schema_cache::CollectionInfo;

/// Compiles a query collection.
pub fn compile_query_collection(
    name: &CollectionName,
    declared: &QueryCollection,
    log: &mut CollectLog,
) -> Option<CollectionInfo> {
    let id = MetadataObjId::QueryCollection { name: name.clone() };
    let mut queries = BTreeMap::new();
    for query in &declared.queries {
        let reason = if query.query.trim().is_empty() {
            Some(format!("query \"{}\" is empty", query.name))
        } else if queries.insert(query.name.clone(), query.query.clone()).is_some() {
            Some(format!("query name \"{}\" is used more than once", query.name))
        } else {
            None
        };
        if let Some(reason) = reason {
            let definition = serde_json::to_value(declared).unwrap_or(Value::Null);
            log.reject(id, definition, reason);
            return None;
        }
    }
    log.record(id, vec![SchemaObjId::QueryCollection { name: name.clone() }], Vec::new());
    Some(CollectionInfo {
        name: name.clone(),
        queries,
    })
}

/// Records an allow-list entry. The collection it names is checked by the
/// resolver through the entry's dependency edge.
pub fn compile_allowlist_entry(entry: &AllowlistEntry, log: &mut CollectLog) {
    log.record(
        MetadataObjId::AllowlistEntry {
            collection: entry.collection.clone(),
        },
        Vec::new(),
        vec![SchemaDependency::new(
            SchemaObjId::QueryCollection {
                name: entry.collection.clone(),
            },
            DependencyReason::Collection,
        )],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection(value: Value) -> QueryCollection {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn collection_provides_itself() {
        let mut log = CollectLog::new();
        let info = compile_query_collection(
            &"allowed".into(),
            &collection(json!({
                "queries": [ { "name": "authors", "query": "query { author { id } }" } ]
            })),
            &mut log,
        )
        .unwrap();
        assert_eq!(info.queries.len(), 1);
        assert_eq!(
            log.objects[0].provides,
            vec![SchemaObjId::QueryCollection { name: "allowed".into() }]
        );
    }

    #[test]
    fn duplicate_query_names_are_rejected() {
        let mut log = CollectLog::new();
        let info = compile_query_collection(
            &"allowed".into(),
            &collection(json!({ "queries": [
                { "name": "q", "query": "query { a }" },
                { "name": "q", "query": "query { b }" }
            ] })),
            &mut log,
        );
        assert!(info.is_none());
        assert!(log.inconsistencies[0].reasons[0].contains("used more than once"));
    }

    #[test]
    fn allowlist_entry_depends_on_collection() {
        let mut log = CollectLog::new();
        compile_allowlist_entry(&AllowlistEntry { collection: "allowed".into() }, &mut log);
        assert_eq!(log.objects[0].dependencies[0].reason, DependencyReason::Collection);
    }
}
