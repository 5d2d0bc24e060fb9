//! Conformance test helpers for the strata schema-cache compiler.
//!
//! Provides call-counting introspection doubles whose live schema can be
//! changed between builds, the library fixture (`author`, `book` and a few
//! functions) and shortcuts for building a cache handle over them.

#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use strata_common::{RemoteSchemaName, SourceName, TableName};
use strata_config::{load_config_from_str, StrataConfig};
use strata_metadata::{Metadata, RemoteSchemaDefinition};
use strata_schema::{
    ColumnDescriptor, ForeignKeyDescriptor, FunctionArgument, FunctionDescriptor,
    IntrospectionError, RemoteSchemaDescriptor, RemoteSchemaIntrospector, SchemaCacheHandle,
    SourceCatalog, SourceIntrospector, TableDescriptor, Volatility,
};

/// A data source whose live schema is held in memory.
///
/// Each catalog listing counts as one call; a source without a catalog is
/// unreachable.
#[derive(Default)]
pub struct MockSource {
    catalogs: Mutex<BTreeMap<SourceName, SourceCatalog>>,
    calls: AtomicUsize,
}

impl MockSource {
    /// Creates a double serving `catalog` as source `default`.
    pub fn new(catalog: SourceCatalog) -> Arc<Self> {
        let source = Self::default();
        source.set_catalog("default", catalog);
        Arc::new(source)
    }

    /// Replaces the live schema of a source.
    pub fn set_catalog(&self, source: &str, catalog: SourceCatalog) {
        self.lock().insert(source.into(), catalog);
    }

    /// Makes a source unreachable.
    pub fn remove_catalog(&self, source: &str) {
        self.lock().remove(source);
    }

    /// Changes the live schema of a source in place, like a DDL statement.
    pub fn alter(&self, source: &str, change: impl FnOnce(&mut SourceCatalog)) {
        change(self.lock().entry(source.into()).or_default());
    }

    /// Number of table listings served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<SourceName, SourceCatalog>> {
        self.catalogs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn catalog_of(&self, source: &SourceName) -> Result<SourceCatalog, IntrospectionError> {
        self.lock()
            .get(source)
            .cloned()
            .ok_or_else(|| IntrospectionError::Unreachable {
                message: format!("no database for source {source}"),
            })
    }
}

impl SourceIntrospector for MockSource {
    fn list_tables(
        &self,
        source: &SourceName,
        _: &Value,
    ) -> Result<Vec<TableDescriptor>, IntrospectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.catalog_of(source)?.tables.into_values().collect())
    }

    fn list_functions(
        &self,
        source: &SourceName,
        _: &Value,
    ) -> Result<Vec<FunctionDescriptor>, IntrospectionError> {
        Ok(self.catalog_of(source)?.functions.into_values().flatten().collect())
    }
}

/// Remote services held in memory. Unknown services time out.
#[derive(Default)]
pub struct MockRemote {
    schemas: Mutex<BTreeMap<RemoteSchemaName, RemoteSchemaDescriptor>>,
    calls: AtomicUsize,
}

impl MockRemote {
    /// Creates a double with no service.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serves `query_fields` as service `name`.
    pub fn set_schema(&self, name: &str, query_fields: &[&str]) {
        let descriptor = RemoteSchemaDescriptor {
            query_fields: query_fields.iter().map(|f| f.to_string()).collect(),
            mutation_fields: Vec::new(),
            types: Vec::new(),
        };
        self.schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), descriptor);
    }

    /// Number of introspections served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteSchemaIntrospector for MockRemote {
    fn introspect(
        &self,
        name: &RemoteSchemaName,
        _: &RemoteSchemaDefinition,
        timeout: Duration,
    ) -> Result<RemoteSchemaDescriptor, IntrospectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or(IntrospectionError::Timeout { after: timeout })
    }
}

/// A column descriptor at `position`.
pub fn column(name: &str, ty: &str, position: u32) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.into(),
        ty: ty.to_string(),
        nullable: false,
        position,
    }
}

/// A stable function over `args`, optionally returning rows of a table.
pub fn function(name: &str, args: &[&str], returns: Option<&str>) -> FunctionDescriptor {
    FunctionDescriptor {
        name: name.into(),
        arguments: args
            .iter()
            .map(|ty| FunctionArgument {
                name: None,
                ty: ty.to_string(),
            })
            .collect(),
        returns_table: returns.map(Into::into),
        returns_set: returns.is_some(),
        volatility: Volatility::Stable,
    }
}

/// `author(id, name)` and `book(id, author_id, title)` with
/// `book.author_id` referencing `author.id`, plus `search_books(text)` and
/// `author_full_name(author)`.
pub fn library_catalog() -> SourceCatalog {
    let author = TableDescriptor {
        name: "author".into(),
        columns: vec![column("id", "integer", 1), column("name", "text", 2)],
        primary_key: vec!["id".into()],
        foreign_keys: Vec::new(),
    };
    let book = TableDescriptor {
        name: "book".into(),
        columns: vec![
            column("id", "integer", 1),
            column("author_id", "integer", 2),
            column("title", "text", 3),
        ],
        primary_key: vec!["id".into()],
        foreign_keys: vec![ForeignKeyDescriptor {
            constraint: "book_author_id_fkey".into(),
            foreign_table: "author".into(),
            column_mapping: [("author_id".into(), "id".into())].into_iter().collect(),
        }],
    };
    SourceCatalog::new(
        vec![author, book],
        vec![
            function("search_books", &["text"], Some("book")),
            function("author_full_name", &["author"], None),
        ],
    )
}

/// Drops a table and every foreign key pointing at it, like
/// `DROP TABLE ... CASCADE`.
pub fn drop_table(catalog: &mut SourceCatalog, table: &str) {
    let table = TableName::new(table);
    catalog.tables.remove(&table);
    for other in catalog.tables.values_mut() {
        other.foreign_keys.retain(|fk| fk.foreign_table != table);
    }
}

/// The library document: both tables tracked, `book.author` over the foreign
/// key, and select permissions for role `user`.
pub fn library_metadata() -> Metadata {
    metadata(json!({
        "sources": { "default": { "tables": {
            "author": {
                "select_permissions": { "user": { "columns": ["id", "name"] } }
            },
            "book": {
                "object_relationships": {
                    "author": { "using": { "foreign_key_constraint_on": "author_id" } }
                },
                "select_permissions": { "user": { "columns": "*" } }
            }
        } } }
    }))
}

/// Parses a metadata document from JSON.
pub fn metadata(value: Value) -> Metadata {
    serde_json::from_value(value).unwrap()
}

/// Parses a `strata.toml` body.
pub fn make_config(toml: &str) -> StrataConfig {
    load_config_from_str(toml).unwrap()
}

/// Builds a handle over the doubles with the default configuration.
pub fn make_handle(
    metadata: Metadata,
    sources: &Arc<MockSource>,
    remote: &Arc<MockRemote>,
) -> SchemaCacheHandle {
    make_handle_with(metadata, StrataConfig::default(), sources, remote)
}

/// Builds a handle over the doubles.
pub fn make_handle_with(
    metadata: Metadata,
    config: StrataConfig,
    sources: &Arc<MockSource>,
    remote: &Arc<MockRemote>,
) -> SchemaCacheHandle {
    let sources: Arc<dyn SourceIntrospector> = sources.clone();
    let remote: Arc<dyn RemoteSchemaIntrospector> = remote.clone();
    SchemaCacheHandle::new(metadata, config, sources, remote).unwrap()
}
