//! Actions: custom queries and mutations served by an external handler.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use strata_common::{ActionName, TypeName};
use strata_metadata::{
    ActionKind, ActionMetadata, ActionType, DependencyReason, MetadataObjId, SchemaDependency,
    SchemaObjId,
};

use crate::context::CollectLog;
use crate::custom_types::{base_type, is_builtin_scalar};
use crate::errors;
use crate::schema_cache::{ActionInfo, CustomTypeKind};

/// Compiles an action and its permissions.
///
/// `types` holds every declared custom type. Whether those definitions are
/// consistent is settled by the resolver through the custom type edges.
pub fn compile_action(
    name: &ActionName,
    declared: &ActionMetadata,
    types: &BTreeMap<TypeName, CustomTypeKind>,
    log: &mut CollectLog,
) -> Option<ActionInfo> {
    let id = MetadataObjId::Action { name: name.clone() };
    let mut dependencies = Vec::new();
    let info = match check_signature(declared, types, &mut dependencies) {
        Ok(()) => {
            dependencies.sort();
            dependencies.dedup();
            log.record(
                id,
                vec![SchemaObjId::Action { name: name.clone() }],
                dependencies,
            );
            let definition = &declared.definition;
            Some(ActionInfo {
                name: name.clone(),
                ty: definition.ty,
                kind: definition.kind,
                arguments: definition.arguments.clone(),
                output_type: definition.output_type.clone(),
                handler: definition.handler.clone(),
                permissions: BTreeSet::new(),
            })
        }
        Err(reason) => {
            let definition = serde_json::to_value(declared).unwrap_or(Value::Null);
            log.reject(id, definition, reason);
            None
        }
    };

    let parent = SchemaDependency::new(
        SchemaObjId::Action { name: name.clone() },
        DependencyReason::Parent,
    );
    let mut granted = BTreeSet::new();
    for permission in &declared.permissions {
        let perm_id = MetadataObjId::ActionPermission {
            action: name.clone(),
            role: permission.role.clone(),
        };
        if permission.role.is_admin() {
            let definition = serde_json::to_value(permission).unwrap_or(Value::Null);
            log.reject(perm_id, definition, "the admin role can always call every action");
            continue;
        }
        granted.insert(permission.role.clone());
        log.record(perm_id, Vec::new(), vec![parent.clone()]);
    }
    info.map(|info| ActionInfo {
        permissions: granted,
        ..info
    })
}

fn check_signature(
    declared: &ActionMetadata,
    types: &BTreeMap<TypeName, CustomTypeKind>,
    dependencies: &mut Vec<SchemaDependency>,
) -> Result<(), String> {
    let definition = &declared.definition;
    if definition.handler.trim().is_empty() {
        return Err("handler must not be empty".to_string());
    }
    if definition.kind == ActionKind::Asynchronous && definition.ty != ActionType::Mutation {
        return Err("asynchronous actions must be mutations".to_string());
    }

    let mut use_type = |name: &str| -> Result<Option<CustomTypeKind>, String> {
        if is_builtin_scalar(name) {
            return Ok(None);
        }
        let (type_name, kind) = types
            .get_key_value(name)
            .ok_or_else(|| errors::unknown_type(name))?;
        dependencies.push(SchemaDependency::new(
            SchemaObjId::CustomType {
                name: type_name.clone(),
            },
            DependencyReason::CustomType,
        ));
        Ok(Some(*kind))
    };

    let mut arguments = BTreeSet::new();
    for argument in &definition.arguments {
        if !arguments.insert(argument.name.as_str()) {
            return Err(format!("argument \"{}\" is declared more than once", argument.name));
        }
        let base = base_type(&argument.ty)?;
        if use_type(base)? == Some(CustomTypeKind::Object) {
            return Err(format!(
                "argument \"{}\" must have an input type, found object type \"{base}\"",
                argument.name
            ));
        }
    }

    let output = base_type(&definition.output_type)?;
    match use_type(output)? {
        Some(CustomTypeKind::Object) => Ok(()),
        Some(CustomTypeKind::InputObject) => Err(format!(
            "output type \"{output}\" is an input object"
        )),
        _ if definition.kind == ActionKind::Asynchronous => Err(format!(
            "output type of an asynchronous action must be an object type, found \"{output}\""
        )),
        _ => Ok(()),
    }
}
