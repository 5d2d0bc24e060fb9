//! Removal of objects whose dependencies are missing.

use std::collections::{BTreeMap, BTreeSet};

use strata_diagnostics::InconsistentObject;
use strata_metadata::{Metadata, MetadataObjId, SchemaObjId};

use crate::context::CollectedObject;
use crate::errors;

/// Outcome of resolving the collected objects.
#[derive(Debug)]
pub struct Resolved {
    /// Objects whose every dependency is provided by another surviving
    /// object.
    pub objects: Vec<CollectedObject>,
    /// Objects removed by resolution.
    pub removed: Vec<InconsistentObject>,
}

/// Drops every object with an edge to a target that no surviving object
/// provides, repeating until nothing else is dropped.
///
/// Each pass removes the objects with dangling edges and withdraws what they
/// provided, which can leave new edges dangling. The loop ends because every
/// pass that continues removes at least one object.
pub fn resolve_dependencies(metadata: &Metadata, objects: Vec<CollectedObject>) -> Resolved {
    let mut alive: BTreeMap<MetadataObjId, CollectedObject> = BTreeMap::new();
    for object in objects {
        match alive.get_mut(&object.id) {
            Some(existing) => {
                existing.provides.extend(object.provides);
                existing.dependencies.extend(object.dependencies);
            }
            None => {
                alive.insert(object.id.clone(), object);
            }
        }
    }

    let mut removed = Vec::new();
    loop {
        let provided: BTreeSet<&SchemaObjId> =
            alive.values().flat_map(|o| o.provides.iter()).collect();
        let dropped: Vec<(MetadataObjId, SchemaObjId)> = alive
            .values()
            .filter_map(|o| {
                o.dependencies
                    .iter()
                    .find(|d| !provided.contains(&d.target))
                    .map(|d| (o.id.clone(), d.target.clone()))
            })
            .collect();
        if dropped.is_empty() {
            break;
        }
        for (id, target) in dropped {
            alive.remove(&id);
            tracing::debug!(
                object = %id,
                missing = %target,
                "dropping object with a missing dependency"
            );
            let definition = metadata.object_definition(&id);
            let reason = format!("in {id}: {}", errors::depends_on_missing(&target));
            removed.push(InconsistentObject::new(id, reason, definition));
        }
    }

    Resolved {
        objects: alive.into_values().collect(),
        removed,
    }
}
