//! Metadata document loading and structural validation.

use std::collections::BTreeSet;
use std::path::Path;

use strata_common::RoleName;

use crate::document::Metadata;
use crate::error::MetadataError;

/// Loads and validates a metadata document from a JSON file.
pub fn load_metadata(path: &Path) -> Result<Metadata, MetadataError> {
    let content = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_metadata_from_str(&content)
}

/// Parses and validates a metadata document from a JSON string.
pub fn load_metadata_from_str(content: &str) -> Result<Metadata, MetadataError> {
    let metadata: Metadata =
        serde_json::from_str(content).map_err(|e| MetadataError::Parse(e.to_string()))?;
    validate_metadata(&metadata)?;
    Ok(metadata)
}

/// Rejects documents whose structure cannot be keyed: empty names, roles
/// granted twice on one function or action, and duplicate allow-list
/// entries. Everything else is checked per object during the build.
fn validate_metadata(metadata: &Metadata) -> Result<(), MetadataError> {
    for (source, src) in &metadata.sources {
        if source.as_str().is_empty() {
            return Err(MetadataError::Invalid("empty source name".to_string()));
        }
        if src.tables.keys().any(|t| t.as_str().is_empty()) {
            return Err(MetadataError::Invalid(format!(
                "empty table name in source {source:?}"
            )));
        }
        if src.functions.keys().any(|f| f.as_str().is_empty()) {
            return Err(MetadataError::Invalid(format!(
                "empty function name in source {source:?}"
            )));
        }
        for (function, func) in &src.functions {
            unique_roles(func.permissions.iter().map(|p| &p.role), || {
                format!("function {function:?} in source {source:?}")
            })?;
        }
    }
    if metadata.remote_schemas.keys().any(|n| n.as_str().is_empty()) {
        return Err(MetadataError::Invalid("empty remote schema name".to_string()));
    }
    if metadata.actions.keys().any(|n| n.as_str().is_empty()) {
        return Err(MetadataError::Invalid("empty action name".to_string()));
    }
    for (name, action) in &metadata.actions {
        unique_roles(action.permissions.iter().map(|p| &p.role), || {
            format!("action {name:?}")
        })?;
    }
    let mut seen = BTreeSet::new();
    for entry in &metadata.allowlist {
        if !seen.insert(&entry.collection) {
            return Err(MetadataError::Invalid(format!(
                "collection {:?} appears in the allowlist more than once",
                entry.collection
            )));
        }
    }
    Ok(())
}

fn unique_roles<'a>(
    roles: impl Iterator<Item = &'a RoleName>,
    owner: impl Fn() -> String,
) -> Result<(), MetadataError> {
    let mut seen = BTreeSet::new();
    for role in roles {
        if !seen.insert(role) {
            return Err(MetadataError::Invalid(format!(
                "role {role:?} is granted more than once on {}",
                owner()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_minimal_document() {
        let metadata = load_metadata_from_str("{}").unwrap();
        assert!(metadata.sources.is_empty());
    }

    #[test]
    fn parse_tables() {
        let json = r#"{
            "sources": { "default": { "tables": {
                "author": {},
                "book": { "object_relationships": {
                    "author": { "using": { "foreign_key_constraint_on": "author_id" } }
                } }
            } } }
        }"#;
        let metadata = load_metadata_from_str(json).unwrap();
        let source = &metadata.sources["default"];
        assert_eq!(source.tables.len(), 2);
        assert!(source.tables["book"].object_relationships.contains_key("author"));
    }

    #[test]
    fn invalid_json_errors() {
        let err = load_metadata_from_str("{ not json").unwrap_err();
        assert!(matches!(err, MetadataError::Parse(_)));
    }

    #[test]
    fn wrong_shape_errors() {
        let err = load_metadata_from_str(r#"{ "sources": [] }"#).unwrap_err();
        assert!(matches!(err, MetadataError::Parse(_)));
    }

    #[test]
    fn empty_table_name_errors() {
        let err =
            load_metadata_from_str(r#"{ "sources": { "default": { "tables": { "": {} } } } }"#)
                .unwrap_err();
        assert!(matches!(err, MetadataError::Invalid(_)));
    }

    #[test]
    fn duplicate_allowlist_errors() {
        let json = r#"{ "allowlist": [ { "collection": "a" }, { "collection": "a" } ] }"#;
        let err = load_metadata_from_str(json).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn duplicate_function_grant_errors() {
        let json = r#"{ "sources": { "default": { "functions": { "search": {
            "permissions": [ { "role": "user" }, { "role": "user" } ]
        } } } } }"#;
        let err = load_metadata_from_str(json).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid metadata: role \"user\" is granted more than once on function \"search\" in source \"default\""
        );
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "remote_schemas": {{ "countries": {{ "definition": {{ "url": "http://c" }} }} }} }}"#
        )
        .unwrap();
        let metadata = load_metadata(file.path()).unwrap();
        assert!(metadata.remote_schemas.contains_key("countries"));
    }

    #[test]
    fn missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_metadata(&dir.path().join("metadata.json")).unwrap_err();
        assert!(matches!(err, MetadataError::Io { .. }));
    }
}
