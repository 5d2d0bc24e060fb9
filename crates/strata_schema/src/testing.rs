//! Catalog fixtures shared by the unit tests of this crate.

use serde_json::Value;
use strata_metadata::SourceMetadata;

use crate::introspect::{
    ColumnDescriptor, ForeignKeyDescriptor, FunctionArgument, FunctionDescriptor, SourceCatalog,
    TableDescriptor, Volatility,
};

pub(crate) fn column(name: &str, ty: &str, position: u32) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.into(),
        ty: ty.to_string(),
        nullable: false,
        position,
    }
}

pub(crate) fn function(
    name: &str,
    args: &[&str],
    returns: Option<&str>,
    volatility: Volatility,
) -> FunctionDescriptor {
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
        volatility,
    }
}

/// `author(id, name)`, `book(id, author_id, title)` with `book.author_id`
/// referencing `author.id`, and a few functions.
pub(crate) fn catalog() -> SourceCatalog {
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
            function("search_books", &["text"], Some("book"), Volatility::Stable),
            function("add_book", &["text"], Some("book"), Volatility::Volatile),
            function("author_full_name", &["author"], None, Volatility::Stable),
            function("find", &["text"], Some("book"), Volatility::Stable),
            function("find", &["integer"], Some("book"), Volatility::Stable),
        ],
    )
}

pub(crate) fn source_metadata(value: Value) -> SourceMetadata {
    serde_json::from_value(value).unwrap()
}
