//! End-to-end drift checks around administrative schema changes.

use std::sync::Arc;

use strata_cache::CacheInvalidations;
use strata_config::NewInconsistencyPolicy;
use strata_conformance::{
    column, drop_table, function, library_catalog, library_metadata, make_config, make_handle,
    make_handle_with, metadata, MockRemote, MockSource,
};
use strata_drift::{DriftChecker, DriftError};
use strata_metadata::{MetadataObjId, PermissionColumns, PermissionKind, RelationshipKind};

type ActionResult = Result<(), std::io::Error>;

fn book_author() -> MetadataObjId {
    MetadataObjId::Relationship {
        source: "default".into(),
        table: "book".into(),
        name: "author".into(),
        kind: RelationshipKind::Object,
    }
}

fn drop_author(sources: &MockSource) -> ActionResult {
    sources.alter("default", |catalog| drop_table(catalog, "author"));
    Ok(())
}

#[test]
fn drop_without_cascade_lists_indirect_dependents() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(library_metadata(), &sources, &remote);
    assert!(handle.cache().inconsistencies.is_empty());
    let before = handle.current();

    let err = DriftChecker::new(&handle, sources.as_ref())
        .cascade(false)
        .run(&"default".into(), || drop_author(&sources))
        .unwrap_err();

    match &err {
        DriftError::IndirectDependencies { dependents } => {
            assert_eq!(dependents, &vec![book_author()])
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_request_error());
    assert!(Arc::ptr_eq(&before, &handle.current()));
}

#[test]
fn drop_with_cascade_purges_the_relationship() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(library_metadata(), &sources, &remote);

    let outcome = DriftChecker::new(&handle, sources.as_ref())
        .cascade(true)
        .run(&"default".into(), || drop_author(&sources))
        .unwrap();

    assert_eq!(outcome.diff.dropped_tables, vec!["author".into()]);
    assert!(outcome.purged.contains(&book_author()));
    assert!(outcome.new_inconsistencies.is_empty());

    let cache = &outcome.cache;
    assert!(cache.inconsistencies.is_empty());
    assert!(cache.table(&"default".into(), &"author".into()).is_none());
    let book = cache.table(&"default".into(), &"book".into()).unwrap();
    assert!(book.relationships.is_empty());
    assert!(cache.dependencies.is_closed());

    let document = handle.metadata();
    let tables = &document.sources["default"].tables;
    assert!(!tables.contains_key("author"));
    assert!(tables["book"].object_relationships.is_empty());
}

#[test]
fn configured_default_cascades() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let config = make_config("[drift]\ncascade_by_default = true\n");
    let handle = make_handle_with(library_metadata(), config, &sources, &remote);

    let outcome = DriftChecker::new(&handle, sources.as_ref())
        .run(&"default".into(), || drop_author(&sources))
        .unwrap();
    assert!(outcome.purged.contains(&book_author()));
}

#[test]
fn overloading_a_tracked_function_is_rejected() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let mut document = library_metadata();
    document.sources.get_mut("default").unwrap().functions =
        serde_json::from_value(serde_json::json!({ "search_books": {} })).unwrap();
    let handle = make_handle(document, &sources, &remote);
    assert!(handle.cache().function(&"default".into(), &"search_books".into()).is_some());
    let before = handle.current();

    let err = DriftChecker::new(&handle, sources.as_ref())
        .cascade(true)
        .run(&"default".into(), || -> ActionResult {
            sources.alter("default", |catalog| {
                catalog
                    .functions
                    .entry("search_books".into())
                    .or_default()
                    .push(function("search_books", &["integer"], Some("book")));
            });
            Ok(())
        })
        .unwrap_err();

    match err {
        DriftError::OverloadedFunction { functions } => {
            assert_eq!(functions, vec!["search_books".into()])
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(Arc::ptr_eq(&before, &handle.current()));
}

#[test]
fn renamed_column_is_followed_in_permissions() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(library_metadata(), &sources, &remote);

    let outcome = DriftChecker::new(&handle, sources.as_ref())
        .cascade(false)
        .run(&"default".into(), || -> ActionResult {
            sources.alter("default", |catalog| {
                let author = catalog.tables.get_mut("author").unwrap();
                author.columns[1] = column("full_name", "text", 2);
            });
            Ok(())
        })
        .unwrap();

    assert!(outcome.impact.indirect.is_empty());
    assert!(outcome.cache.inconsistencies.is_empty());
    let author = outcome.cache.table(&"default".into(), &"author".into()).unwrap();
    assert!(author.columns.contains_key("full_name"));

    let document = handle.metadata();
    let permission = &document.sources["default"].tables["author"].select_permissions["user"];
    assert_eq!(
        permission.columns,
        PermissionColumns::Only(vec!["id".into(), "full_name".into()])
    );
}

fn rename_author_name(sources: &MockSource) {
    sources.alter("default", |catalog| {
        let author = catalog.tables.get_mut("author").unwrap();
        author.columns[1] = column("full_name", "text", 2);
    });
}

#[test]
fn rebuild_sees_the_schema_of_the_action_transaction() {
    let committed = MockSource::new(library_catalog());
    let transaction = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(library_metadata(), &committed, &remote);

    let outcome = DriftChecker::new(&handle, transaction.as_ref())
        .cascade(false)
        .run(&"default".into(), || -> ActionResult {
            rename_author_name(&transaction);
            Ok(())
        })
        .unwrap();

    assert!(outcome.new_inconsistencies.is_empty());
    assert!(outcome.cache.inconsistencies.is_empty());
    let author = outcome.cache.table(&"default".into(), &"author".into()).unwrap();
    assert!(author.columns.contains_key("full_name"));
    let user = &author.permissions["user"];
    assert!(user.select.as_ref().unwrap().columns.contains("full_name"));
    assert_eq!(committed.calls(), 1);
}

#[test]
fn edit_published_during_the_action_is_kept() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(library_metadata(), &sources, &remote);

    let outcome = DriftChecker::new(&handle, sources.as_ref())
        .run(&"default".into(), || -> ActionResult {
            let mut edited = (*handle.metadata()).clone();
            let default = edited.sources.get_mut("default").unwrap();
            default.tables.get_mut("book").unwrap().select_permissions.clear();
            handle.replace_metadata(edited, &CacheInvalidations::default()).unwrap();
            rename_author_name(&sources);
            Ok(())
        })
        .unwrap();

    assert!(outcome.new_inconsistencies.is_empty());
    let document = handle.metadata();
    let tables = &document.sources["default"].tables;
    assert!(tables["book"].select_permissions.is_empty());
    assert_eq!(
        tables["author"].select_permissions["user"].columns,
        PermissionColumns::Only(vec!["id".into(), "full_name".into()])
    );
    let book = outcome.cache.table(&"default".into(), &"book".into()).unwrap();
    assert!(book.permissions.is_empty());
}

#[test]
fn dropped_column_is_forgotten_with_its_readers() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(library_metadata(), &sources, &remote);

    let outcome = DriftChecker::new(&handle, sources.as_ref())
        .cascade(true)
        .run(&"default".into(), || -> ActionResult {
            sources.alter("default", |catalog| {
                catalog.tables.get_mut("author").unwrap().columns.truncate(1);
            });
            Ok(())
        })
        .unwrap();

    let permission = MetadataObjId::Permission {
        source: "default".into(),
        table: "author".into(),
        role: "user".into(),
        kind: PermissionKind::Select,
    };
    assert_eq!(outcome.impact.indirect, [permission].into_iter().collect());
    assert!(outcome.cache.inconsistencies.is_empty());
    assert!(handle.metadata().sources["default"].tables["author"].select_permissions.is_empty());
}

fn retarget_search_books(sources: &MockSource) -> ActionResult {
    sources.alter("default", |catalog| {
        catalog.functions.insert(
            "search_books".into(),
            vec![function("search_books", &["text"], Some("publisher"))],
        );
    });
    Ok(())
}

fn with_search_books() -> strata_metadata::Metadata {
    metadata(serde_json::json!({
        "sources": { "default": {
            "tables": { "book": {} },
            "functions": { "search_books": {} }
        } }
    }))
}

#[test]
fn unexplained_new_inconsistency_is_fatal_by_default() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(with_search_books(), &sources, &remote);
    let before = handle.current();

    let err = DriftChecker::new(&handle, sources.as_ref())
        .run(&"default".into(), || retarget_search_books(&sources))
        .unwrap_err();

    assert!(matches!(err, DriftError::Internal(_)), "{err}");
    assert!(err.to_string().contains("search_books"));
    assert!(Arc::ptr_eq(&before, &handle.current()));
}

#[test]
fn report_policy_publishes_and_returns_new_inconsistencies() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(with_search_books(), &sources, &remote);

    let outcome = DriftChecker::new(&handle, sources.as_ref())
        .new_inconsistencies(NewInconsistencyPolicy::Report)
        .run(&"default".into(), || retarget_search_books(&sources))
        .unwrap();

    let search_books = MetadataObjId::Function {
        source: "default".into(),
        function: "search_books".into(),
    };
    assert!(outcome.diff.altered_functions["search_books"].signature_changed);
    let ids: Vec<&MetadataObjId> = outcome.new_inconsistencies.iter().map(|o| &o.id).collect();
    assert_eq!(ids, vec![&search_books]);
    assert!(handle.cache().inconsistencies.contains(&search_books));
}

#[test]
fn failed_action_changes_nothing() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(library_metadata(), &sources, &remote);
    let before = handle.current();

    let err = DriftChecker::new(&handle, sources.as_ref())
        .run(&"default".into(), || -> ActionResult {
            Err(std::io::Error::other("syntax error at or near \"TABEL\""))
        })
        .unwrap_err();

    assert!(matches!(err, DriftError::Action(_)));
    assert!(Arc::ptr_eq(&before, &handle.current()));
}

#[test]
fn unknown_source_is_a_request_error() {
    let sources = MockSource::new(library_catalog());
    let remote = MockRemote::new();
    let handle = make_handle(library_metadata(), &sources, &remote);

    let err = DriftChecker::new(&handle, sources.as_ref())
        .run(&"analytics".into(), || -> ActionResult { Ok(()) })
        .unwrap_err();
    assert!(matches!(err, DriftError::UnknownSource { .. }));
    assert!(err.is_request_error());
}
