//! Custom type definitions used by action signatures.
//!
//! All custom types are validated together as one object: one bad
//! definition makes every custom type unavailable, and actions using them
//! are quarantined by the resolver.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use strata_common::TypeName;
use strata_metadata::{
    CustomTypes, DependencyReason, FieldDefinition, MetadataObjId, SchemaDependency, SchemaObjId,
};

use crate::context::CollectLog;
use crate::errors;
use crate::schema_cache::CustomTypeKind;

/// Scalars every API has.
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// Returns `true` for a builtin scalar name.
pub fn is_builtin_scalar(name: &str) -> bool {
    BUILTIN_SCALARS.contains(&name)
}

/// Extracts the named type of a type reference such as `[String!]!`.
pub fn base_type(reference: &str) -> Result<&str, String> {
    let mut rest = reference.trim();
    let mut depth = 0usize;
    rest = rest.strip_suffix('!').unwrap_or(rest);
    while let Some(inner) = rest.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| format!("malformed type reference \"{reference}\""))?;
        rest = inner.strip_suffix('!').unwrap_or(inner);
        depth += 1;
    }
    let valid = !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !rest.starts_with(|c: char| c.is_ascii_digit());
    if !valid || depth > 8 {
        return Err(format!("malformed type reference \"{reference}\""));
    }
    Ok(rest)
}

/// Kind of every declared custom type, whether or not the definitions are
/// consistent. The first definition of a duplicated name wins.
pub fn declared_type_kinds(types: &CustomTypes) -> BTreeMap<TypeName, CustomTypeKind> {
    let mut kinds = BTreeMap::new();
    let names = types
        .scalars
        .iter()
        .map(|t| (&t.name, CustomTypeKind::Scalar))
        .chain(types.enums.iter().map(|t| (&t.name, CustomTypeKind::Enum)))
        .chain(types.input_objects.iter().map(|t| (&t.name, CustomTypeKind::InputObject)))
        .chain(types.objects.iter().map(|t| (&t.name, CustomTypeKind::Object)));
    for (name, kind) in names {
        kinds.entry(name.clone()).or_insert(kind);
    }
    kinds
}

/// Compiles the custom types. Returns the consistent types (empty if the
/// definitions are rejected).
pub fn compile_custom_types(
    types: &CustomTypes,
    log: &mut CollectLog,
) -> BTreeMap<TypeName, CustomTypeKind> {
    if types.is_empty() {
        return BTreeMap::new();
    }
    let mut dependencies = Vec::new();
    match validate(types, &mut dependencies) {
        Ok(kinds) => {
            let provides = kinds
                .keys()
                .map(|name| SchemaObjId::CustomType { name: name.clone() })
                .collect();
            dependencies.sort();
            dependencies.dedup();
            log.record(MetadataObjId::CustomTypes, provides, dependencies);
            kinds
        }
        Err(reason) => {
            let definition = serde_json::to_value(types).unwrap_or(Value::Null);
            log.reject(MetadataObjId::CustomTypes, definition, reason);
            BTreeMap::new()
        }
    }
}

fn validate(
    types: &CustomTypes,
    dependencies: &mut Vec<SchemaDependency>,
) -> Result<BTreeMap<TypeName, CustomTypeKind>, String> {
    let mut seen = BTreeSet::new();
    let all_names = types
        .scalars
        .iter()
        .map(|t| &t.name)
        .chain(types.enums.iter().map(|t| &t.name))
        .chain(types.input_objects.iter().map(|t| &t.name))
        .chain(types.objects.iter().map(|t| &t.name));
    for name in all_names {
        if is_builtin_scalar(name.as_str()) {
            return Err(format!("type \"{name}\" shadows a builtin scalar"));
        }
        if !seen.insert(name) {
            return Err(format!("type \"{name}\" is defined more than once"));
        }
    }
    let kinds = declared_type_kinds(types);

    for definition in &types.enums {
        if definition.values.is_empty() {
            return Err(format!("enum \"{}\" has no values", definition.name));
        }
        let mut values = BTreeSet::new();
        if let Some(dup) = definition.values.iter().find(|v| !values.insert(&v.value)) {
            return Err(format!(
                "enum \"{}\" lists value \"{}\" more than once",
                definition.name, dup.value
            ));
        }
    }

    for definition in &types.input_objects {
        check_fields(&definition.name, &definition.fields, &kinds, |kind| {
            kind != CustomTypeKind::Object
        })?;
    }

    for definition in &types.objects {
        check_fields(&definition.name, &definition.fields, &kinds, |kind| {
            kind != CustomTypeKind::InputObject
        })?;
        let field_names: BTreeSet<&str> =
            definition.fields.iter().map(|f| f.name.as_str()).collect();
        for relationship in &definition.relationships {
            if field_names.contains(relationship.name.as_str()) {
                return Err(format!(
                    "relationship \"{}\" of object \"{}\" conflicts with a field of the same name",
                    relationship.name, definition.name
                ));
            }
            if relationship.field_mapping.is_empty() {
                return Err(format!(
                    "relationship \"{}\" of object \"{}\" has an empty field mapping",
                    relationship.name, definition.name
                ));
            }
            dependencies.push(SchemaDependency::new(
                SchemaObjId::table_of(&relationship.source, &relationship.remote_table),
                DependencyReason::RemoteTable,
            ));
            for (field, column) in &relationship.field_mapping {
                if !field_names.contains(field.as_str()) {
                    return Err(format!(
                        "field \"{field}\" mapped by relationship \"{}\" does not exist on object \"{}\"",
                        relationship.name, definition.name
                    ));
                }
                dependencies.push(SchemaDependency::new(
                    SchemaObjId::column(&relationship.source, &relationship.remote_table, column),
                    DependencyReason::RightColumn,
                ));
            }
        }
    }
    Ok(kinds)
}

fn check_fields(
    owner: &TypeName,
    fields: &[FieldDefinition],
    kinds: &BTreeMap<TypeName, CustomTypeKind>,
    allowed: impl Fn(CustomTypeKind) -> bool,
) -> Result<(), String> {
    if fields.is_empty() {
        return Err(format!("type \"{owner}\" has no fields"));
    }
    let mut names = BTreeSet::new();
    for field in fields {
        if !names.insert(field.name.as_str()) {
            return Err(format!(
                "type \"{owner}\" declares field \"{}\" more than once",
                field.name
            ));
        }
        let base = base_type(&field.ty)?;
        if is_builtin_scalar(base) {
            continue;
        }
        match kinds.get(base) {
            Some(kind) if allowed(*kind) => {}
            Some(_) => {
                return Err(format!(
                    "field \"{}\" of type \"{owner}\" cannot have type \"{base}\"",
                    field.name
                ))
            }
            None => return Err(errors::unknown_type(base)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn types(value: Value) -> CustomTypes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn base_type_strips_wrappers() {
        assert_eq!(base_type("[String!]!").unwrap(), "String");
        assert_eq!(base_type("LoginInput").unwrap(), "LoginInput");
        assert!(base_type("[String").is_err());
        assert!(base_type("").is_err());
    }

    #[test]
    fn valid_types_provide_each_name() {
        let mut log = CollectLog::new();
        let kinds = compile_custom_types(
            &types(json!({
                "input_objects": [ { "name": "LoginInput", "fields": [ { "name": "user", "type": "String!" } ] } ],
                "objects": [ {
                    "name": "LoginResponse",
                    "fields": [ { "name": "token", "type": "String!" }, { "name": "user_id", "type": "Int!" } ],
                    "relationships": [ {
                        "name": "user", "type": "object", "remote_table": "author",
                        "field_mapping": { "user_id": "id" }
                    } ]
                } ]
            })),
            &mut log,
        );
        assert_eq!(kinds.len(), 2);
        assert_eq!(log.objects[0].provides.len(), 2);
        assert!(log.objects[0]
            .dependencies
            .iter()
            .any(|d| d.reason == DependencyReason::RightColumn));
    }

    #[test]
    fn shadowing_a_builtin_rejects_all_types() {
        let mut log = CollectLog::new();
        let declared = types(json!({ "scalars": [ { "name": "ID" } ] }));
        let kinds = compile_custom_types(&declared, &mut log);
        assert!(kinds.is_empty());
        assert!(log.inconsistencies[0].reasons[0].contains("shadows a builtin scalar"));
    }

    #[test]
    fn input_objects_cannot_use_output_types() {
        let mut log = CollectLog::new();
        compile_custom_types(
            &types(json!({
                "input_objects": [ { "name": "In", "fields": [ { "name": "out", "type": "Out" } ] } ],
                "objects": [ { "name": "Out", "fields": [ { "name": "x", "type": "Int" } ] } ]
            })),
            &mut log,
        );
        assert!(log.inconsistencies[0].reasons[0].contains("cannot have type \"Out\""));
    }

    #[test]
    fn empty_definitions_record_nothing() {
        let mut log = CollectLog::new();
        assert!(compile_custom_types(&CustomTypes::default(), &mut log).is_empty());
        assert!(log.objects.is_empty() && log.inconsistencies.is_empty());
    }
}
