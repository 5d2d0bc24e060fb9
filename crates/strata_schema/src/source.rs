//! Source-level compilation: the introspected catalog and the read-only view
//! every table and function of the source is compiled against.

use std::collections::BTreeMap;

use serde_json::Value;
use strata_common::{
    ColumnName, ContentHash, ContentHasher, RelationshipName, SourceName, StrataResult, TableName,
};
use strata_config::BuildConfig;
use strata_metadata::{MetadataObjId, RelationshipJoin, SchemaObjId, SourceMetadata};

use crate::context::CollectLog;
use crate::errors;
use crate::introspect::{ForeignKeyDescriptor, IntrospectionError, SourceCatalog, TableDescriptor};

/// Result of introspecting one source, as stored in the catalog memo.
pub type CatalogResult = Result<SourceCatalog, IntrospectionError>;

/// A source's declarations together with its live catalog.
#[derive(Clone, Copy)]
pub struct SourceView<'a> {
    /// Source name.
    pub name: &'a SourceName,
    /// Declarations of the source.
    pub metadata: &'a SourceMetadata,
    /// Live catalog of the source.
    pub catalog: &'a SourceCatalog,
}

impl<'a> SourceView<'a> {
    /// Creates a view.
    pub fn new(
        name: &'a SourceName,
        metadata: &'a SourceMetadata,
        catalog: &'a SourceCatalog,
    ) -> Self {
        Self {
            name,
            metadata,
            catalog,
        }
    }

    /// Looks up a live table.
    pub fn live_table(&self, table: &TableName) -> Option<&'a TableDescriptor> {
        self.catalog.tables.get(table)
    }

    /// Returns `true` if the live table has the column.
    pub fn has_column(&self, table: &TableName, column: &ColumnName) -> bool {
        self.live_table(table)
            .is_some_and(|t| t.column(column).is_some())
    }

    /// Returns the table a declared relationship joins to, if it resolves.
    pub fn relationship_target(
        &self,
        table: &TableName,
        name: &RelationshipName,
    ) -> Option<TableName> {
        let declared = self.metadata.tables.get(table)?;
        let join = declared
            .object_relationships
            .get(name)
            .map(|r| r.join())
            .or_else(|| declared.array_relationships.get(name).map(|r| r.join()))?;
        match join {
            RelationshipJoin::LocalForeignKey(column) => {
                let live = self.live_table(table)?;
                foreign_key_on(live, column).map(|fk| fk.foreign_table.clone())
            }
            RelationshipJoin::RemoteForeignKey(fk) => Some(fk.table.clone()),
            RelationshipJoin::Manual(manual) => Some(manual.remote_table.clone()),
        }
    }

    /// Fingerprint of everything a table compilation reads beyond its own
    /// declaration: the catalog, every table's relationship declarations
    /// (followed by boolean expressions) and the build settings.
    pub fn fingerprint(&self, build: &BuildConfig) -> StrataResult<ContentHash> {
        let relationships: BTreeMap<&TableName, _> = self
            .metadata
            .tables
            .iter()
            .map(|(name, t)| (name, (&t.object_relationships, &t.array_relationships)))
            .collect();
        let mut hasher = ContentHasher::new();
        hasher
            .update(self.name)?
            .update(self.catalog)?
            .update(&relationships)?
            .update(build)?;
        Ok(hasher.finish())
    }
}

/// Finds the foreign key of `table` constraining `column`.
pub fn foreign_key_on<'t>(
    table: &'t TableDescriptor,
    column: &ColumnName,
) -> Option<&'t ForeignKeyDescriptor> {
    table
        .foreign_keys
        .iter()
        .find(|fk| fk.column_mapping.contains_key(column))
}

/// Records the source object, or rejects it if introspection failed.
///
/// A consistent source provides itself and every function in its catalog,
/// tracked or not, so computed fields and tracked functions can depend on
/// catalog entries.
pub fn compile_source(
    name: &SourceName,
    catalog: &CatalogResult,
    definition: &Value,
) -> CollectLog {
    let mut log = CollectLog::new();
    let id = MetadataObjId::Source {
        source: name.clone(),
    };
    match catalog {
        Ok(catalog) => {
            let mut provides = vec![SchemaObjId::Source {
                source: name.clone(),
            }];
            provides.extend(catalog.functions.keys().map(|f| SchemaObjId::CatalogFunction {
                source: name.clone(),
                function: f.clone(),
            }));
            log.record(id, provides, Vec::new());
        }
        Err(err) => log.reject(id, definition.clone(), errors::introspection_failed("source", err)),
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{ColumnDescriptor, FunctionDescriptor, Volatility};
    use serde_json::json;

    fn catalog() -> SourceCatalog {
        let column = |name: &str, position| ColumnDescriptor {
            name: name.into(),
            ty: "integer".to_string(),
            nullable: false,
            position,
        };
        let author = TableDescriptor {
            name: "author".into(),
            columns: vec![column("id", 1)],
            primary_key: vec!["id".into()],
            foreign_keys: Vec::new(),
        };
        let book = TableDescriptor {
            name: "book".into(),
            columns: vec![column("id", 1), column("author_id", 2)],
            primary_key: vec!["id".into()],
            foreign_keys: vec![ForeignKeyDescriptor {
                constraint: "book_author_fkey".into(),
                foreign_table: "author".into(),
                column_mapping: [("author_id".into(), "id".into())].into_iter().collect(),
            }],
        };
        let search = FunctionDescriptor {
            name: "search_books".into(),
            arguments: Vec::new(),
            returns_table: Some("book".into()),
            returns_set: true,
            volatility: Volatility::Stable,
        };
        SourceCatalog::new(vec![author, book], vec![search])
    }

    fn metadata() -> SourceMetadata {
        serde_json::from_value(json!({
            "tables": {
                "author": { "array_relationships": { "books": { "using": {
                    "foreign_key_constraint_on": { "table": "book", "column": "author_id" }
                } } } },
                "book": { "object_relationships": { "author": { "using": {
                    "foreign_key_constraint_on": "author_id"
                } } } }
            }
        }))
        .unwrap()
    }

    #[test]
    fn relationship_targets_resolve_through_the_catalog() {
        let name = SourceName::new("default");
        let (metadata, catalog) = (metadata(), catalog());
        let view = SourceView::new(&name, &metadata, &catalog);
        assert_eq!(
            view.relationship_target(&"book".into(), &"author".into()),
            Some("author".into())
        );
        assert_eq!(
            view.relationship_target(&"author".into(), &"books".into()),
            Some("book".into())
        );
        assert_eq!(view.relationship_target(&"author".into(), &"missing".into()), None);
        assert!(view.has_column(&"book".into(), &"author_id".into()));
        assert!(!view.has_column(&"author".into(), &"age".into()));
    }

    #[test]
    fn fingerprint_tracks_relationships_but_not_permissions() {
        let name = SourceName::new("default");
        let catalog = catalog();
        let build = BuildConfig::default();
        let base = metadata();
        let before = SourceView::new(&name, &base, &catalog).fingerprint(&build).unwrap();

        let mut with_permission = base.clone();
        with_permission
            .tables
            .get_mut(&TableName::new("author"))
            .unwrap()
            .select_permissions
            .insert("user".into(), serde_json::from_value(json!({ "columns": "*" })).unwrap());
        let same = SourceView::new(&name, &with_permission, &catalog)
            .fingerprint(&build)
            .unwrap();
        assert_eq!(before, same);

        let mut without_relationship = base;
        without_relationship
            .tables
            .get_mut(&TableName::new("book"))
            .unwrap()
            .object_relationships
            .clear();
        let changed = SourceView::new(&name, &without_relationship, &catalog)
            .fingerprint(&build)
            .unwrap();
        assert_ne!(before, changed);
    }

    #[test]
    fn failed_source_is_rejected() {
        let name = SourceName::new("default");
        let log = compile_source(
            &name,
            &Err(IntrospectionError::Unreachable {
                message: "connection refused".to_string(),
            }),
            &Value::Null,
        );
        assert!(log.objects.is_empty());
        assert_eq!(
            log.inconsistencies[0].reasons[0],
            "in source \"default\": failed to introspect source: unreachable: connection refused"
        );
    }

    #[test]
    fn source_provides_catalog_functions() {
        let name = SourceName::new("default");
        let log = compile_source(&name, &Ok(catalog()), &Value::Null);
        assert!(log.objects[0].provides.contains(&SchemaObjId::CatalogFunction {
            source: name.clone(),
            function: "search_books".into(),
        }));
    }
}
