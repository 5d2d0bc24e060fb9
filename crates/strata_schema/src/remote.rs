//! Remote schemas: external services whose root fields are merged into the
//! API.
//!
//! Introspection is a network call. It only runs on a memo miss, that is
//! when the definition, the remote schema's invalidation key or the default
//! timeout changed.

use serde_json::Value;
use strata_common::RemoteSchemaName;
use strata_metadata::{MetadataObjId, RemoteSchemaMetadata, SchemaObjId};

use crate::context::{BuildContext, CollectLog};
use crate::errors;
use crate::schema_cache::RemoteSchemaInfo;

/// Result of introspecting one remote schema, as stored in the remote memo.
pub type RemoteBuild = Result<RemoteSchemaInfo, String>;

/// Validates a remote schema definition and introspects the service.
pub fn introspect_remote_schema(
    ctx: &BuildContext<'_>,
    name: &RemoteSchemaName,
    declared: &RemoteSchemaMetadata,
) -> RemoteBuild {
    let definition = &declared.definition;
    let url = definition.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!("invalid url \"{}\": expected an http(s) url", definition.url));
    }
    if definition.timeout_seconds == Some(0) {
        return Err("timeout_seconds must be greater than zero".to_string());
    }

    let timeout = ctx.remote_timeout(definition);
    tracing::debug!(
        remote_schema = %name,
        url,
        timeout_secs = timeout.as_secs(),
        "introspecting remote schema"
    );
    let descriptor = ctx
        .remote
        .introspect(name, definition, timeout)
        .map_err(|e| errors::introspection_failed("remote schema", e))?;
    if descriptor.query_fields.is_empty() {
        return Err("remote schema exposes no query root fields".to_string());
    }
    Ok(RemoteSchemaInfo {
        name: name.clone(),
        url: url.to_string(),
        query_fields: descriptor.query_fields,
        mutation_fields: descriptor.mutation_fields,
    })
}

/// Records the outcome of a remote schema introspection.
pub fn collect_remote_schema(
    name: &RemoteSchemaName,
    declared: &RemoteSchemaMetadata,
    build: &RemoteBuild,
) -> CollectLog {
    let mut log = CollectLog::new();
    let id = MetadataObjId::RemoteSchema { name: name.clone() };
    match build {
        Ok(_) => log.record(id, vec![SchemaObjId::RemoteSchema { name: name.clone() }], Vec::new()),
        Err(reason) => {
            let definition = serde_json::to_value(declared).unwrap_or(Value::Null);
            log.reject(id, definition, reason);
        }
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{IntrospectionError, RemoteSchemaDescriptor, RemoteSchemaIntrospector};
    use serde_json::json;
    use std::time::Duration;
    use strata_config::StrataConfig;
    use strata_metadata::RemoteSchemaDefinition;

    struct Fixed(Result<RemoteSchemaDescriptor, IntrospectionError>);

    impl RemoteSchemaIntrospector for Fixed {
        fn introspect(
            &self,
            _: &RemoteSchemaName,
            _: &RemoteSchemaDefinition,
            timeout: Duration,
        ) -> Result<RemoteSchemaDescriptor, IntrospectionError> {
            assert_eq!(timeout, Duration::from_secs(5));
            self.0.clone()
        }
    }

    fn declared(url: &str) -> RemoteSchemaMetadata {
        serde_json::from_value(json!({ "definition": { "url": url, "timeout_seconds": 5 } }))
            .unwrap()
    }

    #[test]
    fn successful_introspection_is_recorded() {
        let config = StrataConfig::default();
        let remote = Fixed(Ok(RemoteSchemaDescriptor {
            query_fields: vec!["countries".to_string()],
            mutation_fields: Vec::new(),
            types: Vec::new(),
        }));
        let ctx = BuildContext::new(&config, &remote);
        let name = RemoteSchemaName::new("countries");
        let build = introspect_remote_schema(&ctx, &name, &declared("https://countries"));
        assert_eq!(build.as_ref().unwrap().query_fields, vec!["countries".to_string()]);
        let log = collect_remote_schema(&name, &declared("https://countries"), &build);
        assert_eq!(log.objects[0].provides, vec![SchemaObjId::RemoteSchema { name }]);
    }

    #[test]
    fn timeout_quarantines_the_remote_schema() {
        let config = StrataConfig::default();
        let remote = Fixed(Err(IntrospectionError::Timeout {
            after: Duration::from_secs(5),
        }));
        let ctx = BuildContext::new(&config, &remote);
        let name = RemoteSchemaName::new("slow");
        let build = introspect_remote_schema(&ctx, &name, &declared("http://slow"));
        let log = collect_remote_schema(&name, &declared("http://slow"), &build);
        assert_eq!(
            log.inconsistencies[0].reasons[0],
            "in remote schema \"slow\": failed to introspect remote schema: timed out after 5s"
        );
    }

    #[test]
    fn bad_url_skips_introspection() {
        let config = StrataConfig::default();
        let remote = Fixed(Err(IntrospectionError::Invalid {
            message: "unused".to_string(),
        }));
        let ctx = BuildContext::new(&config, &remote);
        let build = introspect_remote_schema(&ctx, &"x".into(), &declared("ftp://x"));
        assert!(build.unwrap_err().starts_with("invalid url"));
    }
}
