//! Build-fatal errors and helper functions for inconsistency reasons.
//!
//! Reasons are plain sentences without the object path; [`CollectLog::reject`]
//! adds the path.
//!
//! [`CollectLog::reject`]: crate::context::CollectLog::reject

use std::fmt::Display;

use strata_common::InternalError;
use strata_metadata::{MetadataError, SchemaObjId};

/// Errors that abort a build and leave the published cache untouched.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The metadata document could not be fetched or is malformed.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// A broken invariant.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Reason for a reference to a column that does not exist.
pub fn missing_column(column: impl Display, table: impl Display) -> String {
    format!("column \"{column}\" does not exist on table \"{table}\"")
}

/// Reason for a table that is not in the source catalog.
pub fn missing_table(table: impl Display) -> String {
    format!("table \"{table}\" does not exist in the source")
}

/// Reason for a reference to a table that is not tracked.
pub fn untracked_table(table: impl Display) -> String {
    format!("table \"{table}\" is not tracked")
}

/// Reason for a function that is not in the source catalog.
pub fn missing_function(function: impl Display) -> String {
    format!("function \"{function}\" does not exist in the source")
}

/// Reason for a function with several catalog entries.
pub fn overloaded_function(function: impl Display) -> String {
    format!("function \"{function}\" is overloaded; overloaded functions are not supported")
}

/// Reason for a name clash with a column.
pub fn conflicts_with_column(kind: &str, name: impl Display) -> String {
    format!("{kind} name \"{name}\" conflicts with a column of the same name")
}

/// Reason for two objects claiming the same root field.
pub fn conflicting_root_field(field: &str, root: &str, owner: impl Display) -> String {
    format!("conflicting root field \"{field}\" in the {root} root, already provided by {owner}")
}

/// Reason for an object quarantined by the resolver.
pub fn depends_on_missing(target: &SchemaObjId) -> String {
    format!("depends on missing/inconsistent object: {target}")
}

/// Reason for a failed introspection.
pub fn introspection_failed(what: &str, error: impl Display) -> String {
    format!("failed to introspect {what}: {error}")
}

/// Reason for an unknown type in a type reference.
pub fn unknown_type(ty: impl Display) -> String {
    format!("type \"{ty}\" is not defined")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_mentions_both_names() {
        let reason = missing_column("age", "author");
        assert_eq!(reason, "column \"age\" does not exist on table \"author\"");
    }

    #[test]
    fn depends_on_missing_names_target() {
        let target = SchemaObjId::Table {
            source: "default".into(),
            table: "author".into(),
        };
        assert_eq!(
            depends_on_missing(&target),
            "depends on missing/inconsistent object: table \"author\" in source \"default\""
        );
    }

    #[test]
    fn build_error_is_transparent() {
        let err = BuildError::from(InternalError::new("cycle"));
        assert_eq!(err.to_string(), "internal error: cycle");
    }
}
