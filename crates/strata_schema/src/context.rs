//! State passed into every compilation function.
//!
//! [`BuildContext`] carries the read-only settings and collaborators of one
//! build. [`CollectLog`] is the append-only record one compilation unit
//! produces: the objects it compiled (with what they provide and what they
//! depend on) and the objects it rejected. Logs are stored in memo entries so
//! that a reused result replays exactly what it collected when it was
//! computed.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use strata_config::StrataConfig;
use strata_diagnostics::InconsistentObject;
use strata_metadata::{MetadataObjId, RemoteSchemaDefinition, SchemaDependency, SchemaObjId};

use crate::introspect::RemoteSchemaIntrospector;

/// Read-only inputs shared by every compilation function of one build.
pub struct BuildContext<'a> {
    /// Settings of this build.
    pub config: &'a StrataConfig,
    /// Remote service collaborator, called on memo misses only.
    pub remote: &'a dyn RemoteSchemaIntrospector,
}

impl<'a> BuildContext<'a> {
    /// Creates a build context.
    pub fn new(config: &'a StrataConfig, remote: &'a dyn RemoteSchemaIntrospector) -> Self {
        Self { config, remote }
    }

    /// Timeout for introspecting a remote schema.
    pub fn remote_timeout(&self, definition: &RemoteSchemaDefinition) -> Duration {
        definition
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.remote_schemas.default_timeout())
    }

    /// Whether numeric types are exposed as strings.
    pub fn stringify_numeric_types(&self) -> bool {
        self.config.build.stringify_numeric_types
    }
}

/// One successfully compiled object and its dependency edges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectedObject {
    /// The object.
    pub id: MetadataObjId,
    /// Targets the object makes available to others.
    pub provides: Vec<SchemaObjId>,
    /// Targets the object needs.
    pub dependencies: Vec<SchemaDependency>,
}

/// Objects and inconsistencies collected by one compilation unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectLog {
    /// Compiled objects, in collection order.
    pub objects: Vec<CollectedObject>,
    /// Rejected objects.
    pub inconsistencies: Vec<InconsistentObject>,
}

impl CollectLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a compiled object.
    pub fn record(
        &mut self,
        id: MetadataObjId,
        provides: Vec<SchemaObjId>,
        dependencies: Vec<SchemaDependency>,
    ) {
        self.objects.push(CollectedObject {
            id,
            provides,
            dependencies,
        });
    }

    /// Records a rejected object. The reason is prefixed with the object's
    /// path.
    pub fn reject(&mut self, id: MetadataObjId, definition: Value, reason: impl fmt::Display) {
        let reason = format!("in {id}: {reason}");
        self.inconsistencies
            .push(InconsistentObject::new(id, reason, definition));
    }

    /// Appends another log.
    pub fn append(&mut self, other: CollectLog) {
        self.objects.extend(other.objects);
        self.inconsistencies.extend(other.inconsistencies);
    }
}
