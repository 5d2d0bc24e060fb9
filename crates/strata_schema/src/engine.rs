//! The memoized build pipeline.
//!
//! A build runs in fixed phases:
//!
//! 1. introspect each source (memoized per source and invalidation key),
//! 2. compile tables and functions against their source view (memoized per
//!    object, fanned out with rayon on misses),
//! 3. introspect remote schemas (memoized per remote schema and key),
//! 4. compile the global objects (custom types, actions, cron triggers,
//!    query collections, allow-list),
//! 5. resolve dependencies to a fixed point,
//! 6. reject surviving objects whose root fields clash and resolve again,
//! 7. assemble the cache and project the API of every serving mode.
//!
//! Phases only read keyed outputs of earlier phases, so the order objects
//! appear in the document never matters.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strata_cache::{ChangeSet, InvalidationKeys, Memo};
use strata_common::{
    ActionName, ContentHash, FunctionName, RemoteSchemaName, SourceName, TableName,
};
use strata_config::StrataConfig;
use strata_diagnostics::{InconsistencySink, InconsistentObject};
use strata_metadata::{
    DependencyReason, Metadata, MetadataObjId, PermissionKind, SchemaDependency, SchemaObjId,
    SourceMetadata,
};

use crate::action::compile_action;
use crate::api::{
    action_root_field, function_root_field, project_api, remote_root_fields, root_field_conflicts,
    table_root_fields, Root,
};
use crate::collection::{compile_allowlist_entry, compile_query_collection};
use crate::context::{BuildContext, CollectLog};
use crate::cron::compile_cron_trigger;
use crate::custom_types::{compile_custom_types, declared_type_kinds};
use crate::errors::BuildError;
use crate::function::{compile_function, FunctionBuild};
use crate::graph::DependencyGraph;
use crate::introspect::{RemoteSchemaIntrospector, SourceIntrospector};
use crate::remote::{collect_remote_schema, introspect_remote_schema, RemoteBuild};
use crate::resolve::resolve_dependencies;
use crate::schema_cache::{ActionInfo, FunctionInfo, SchemaCache, SourceInfo, TableInfo};
use crate::source::{compile_source, CatalogResult, SourceView};
use crate::table::{compile_table, TableBuild};

/// Everything one build reads.
pub struct BuildInput<'a> {
    /// The metadata document.
    pub metadata: &'a Metadata,
    /// Current invalidation keys.
    pub keys: &'a InvalidationKeys,
    /// Build settings.
    pub config: &'a StrataConfig,
    /// Data-source collaborator.
    pub sources: &'a dyn SourceIntrospector,
    /// Remote-service collaborator.
    pub remote: &'a dyn RemoteSchemaIntrospector,
}

/// Memo hit and miss counts of the last build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Results reused from the previous build.
    pub reused: usize,
    /// Results computed by this build.
    pub recomputed: usize,
    /// Source introspections performed.
    pub source_introspections: usize,
    /// Remote schema introspections performed.
    pub remote_introspections: usize,
}

impl BuildStats {
    fn count<K>(&mut self, changes: &ChangeSet<K>) {
        self.reused += changes.unchanged.len();
        self.recomputed += changes.dirty_count();
    }
}

/// The memo tables carried from one build to the next.
///
/// Cloning is cheap; a failed build leaves the caller's copy untouched.
#[derive(Clone, Default)]
pub struct BuildState {
    catalogs: Memo<SourceName, CatalogResult>,
    tables: Memo<(SourceName, TableName), TableBuild>,
    functions: Memo<(SourceName, FunctionName), FunctionBuild>,
    remote_schemas: Memo<RemoteSchemaName, RemoteBuild>,
    stats: BuildStats,
}

impl BuildState {
    /// Creates a state with empty memo tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts of the build that produced this state.
    pub fn stats(&self) -> BuildStats {
        self.stats
    }
}

/// Builds a schema cache, reusing every memoized result whose inputs are
/// unchanged since the build that produced `previous`.
///
/// Object-level problems end up in the cache's inconsistencies. An `Err`
/// means the build itself failed and `previous` should be kept.
pub fn build(
    previous: BuildState,
    input: &BuildInput<'_>,
) -> Result<(SchemaCache, BuildState), BuildError> {
    let BuildState {
        mut catalogs,
        mut tables,
        mut functions,
        mut remote_schemas,
        ..
    } = previous;
    let metadata = input.metadata;
    let parallel = input.config.build.parallel;
    let ctx = BuildContext::new(input.config, input.remote);
    let mut stats = BuildStats::default();
    tracing::debug!(
        sources = metadata.sources.len(),
        remote_schemas = metadata.remote_schemas.len(),
        parallel,
        "building schema cache"
    );

    let mut catalog_inputs = BTreeMap::new();
    for (name, source) in &metadata.sources {
        let hash = ContentHash::of(&(name, &source.configuration, input.keys.source(name)))?;
        catalog_inputs.insert(name.clone(), (hash, &source.configuration));
    }
    let (catalog_results, changes) =
        catalogs.compute_all(catalog_inputs, parallel, |name, configuration| {
            tracing::debug!(source = %name, "introspecting source");
            input.sources.catalog(name, configuration)
        });
    stats.count(&changes);
    stats.source_introspections = changes.dirty_count();

    let mut log = CollectLog::new();
    let mut table_inputs = BTreeMap::new();
    let mut function_inputs = BTreeMap::new();
    for (name, source) in &metadata.sources {
        let Some(result) = catalog_results.get(name) else {
            continue;
        };
        log.append(compile_source(name, result, &source.configuration));
        let catalog = match &**result {
            Ok(catalog) => catalog,
            Err(_) => {
                record_unreachable_source(name, source, &mut log);
                continue;
            }
        };
        let view = SourceView::new(name, source, catalog);
        let fingerprint = view.fingerprint(&input.config.build)?;
        for (table, declared) in &source.tables {
            let hash = ContentHash::of(&(fingerprint, table, declared))?;
            table_inputs.insert((name.clone(), table.clone()), (hash, (view, declared)));
        }
        for (function, declared) in &source.functions {
            let hash =
                ContentHash::of(&(name, function, declared, catalog.functions.get(function)))?;
            function_inputs.insert((name.clone(), function.clone()), (hash, (view, declared)));
        }
    }

    let (table_builds, changes) =
        tables.compute_all(table_inputs, parallel, |(_, table), (view, declared)| {
            compile_table(&ctx, &view, table, declared)
        });
    stats.count(&changes);
    let (function_builds, changes) =
        functions.compute_all(function_inputs, parallel, |(_, function), (view, declared)| {
            compile_function(&view, function, declared)
        });
    stats.count(&changes);

    let mut remote_inputs = BTreeMap::new();
    for (name, declared) in &metadata.remote_schemas {
        let hash = ContentHash::of(&(
            name,
            declared,
            input.keys.remote_schema(name),
            input.config.remote_schemas.default_timeout_secs,
        ))?;
        remote_inputs.insert(name.clone(), (hash, declared));
    }
    let (remote_builds, changes) =
        remote_schemas.compute_all(remote_inputs, parallel, |name, declared| {
            introspect_remote_schema(&ctx, name, declared)
        });
    stats.count(&changes);
    stats.remote_introspections = changes.dirty_count();

    for build in table_builds.values() {
        log.append(build.log.clone());
    }
    for build in function_builds.values() {
        log.append(build.log.clone());
    }
    for (name, build) in &remote_builds {
        if let Some(declared) = metadata.remote_schemas.get(name) {
            log.append(collect_remote_schema(name, declared, build));
        }
    }

    let custom_types = compile_custom_types(&metadata.custom_types, &mut log);
    let declared_types = declared_type_kinds(&metadata.custom_types);
    let mut actions = BTreeMap::new();
    for (name, declared) in &metadata.actions {
        if let Some(info) = compile_action(name, declared, &declared_types, &mut log) {
            actions.insert(name.clone(), info);
        }
    }
    let mut cron_triggers = BTreeMap::new();
    for (name, declared) in &metadata.cron_triggers {
        if let Some(info) = compile_cron_trigger(name, declared, &mut log) {
            cron_triggers.insert(name.clone(), info);
        }
    }
    let mut collections = BTreeMap::new();
    for (name, declared) in &metadata.query_collections {
        if let Some(info) = compile_query_collection(name, declared, &mut log) {
            collections.insert(name.clone(), info);
        }
    }
    for entry in &metadata.allowlist {
        compile_allowlist_entry(entry, &mut log);
    }

    let sink = InconsistencySink::new();
    let CollectLog {
        objects,
        inconsistencies,
    } = log;
    for object in inconsistencies {
        sink.emit(object);
    }

    let mut resolved = resolve_dependencies(metadata, objects);
    loop {
        for object in std::mem::take(&mut resolved.removed) {
            sink.emit(object);
        }
        let alive: BTreeSet<&MetadataObjId> = resolved.objects.iter().map(|o| &o.id).collect();
        let claims = root_field_claims(
            &table_builds,
            &function_builds,
            &remote_builds,
            &actions,
            &alive,
        );
        let conflicts = root_field_conflicts(claims);
        if conflicts.is_empty() {
            break;
        }
        let mut clashing = BTreeSet::new();
        for (id, reason) in conflicts {
            let definition = metadata.object_definition(&id);
            let reason = format!("in {id}: {reason}");
            sink.emit(InconsistentObject::new(id.clone(), reason, definition));
            clashing.insert(id);
        }
        let objects = resolved
            .objects
            .into_iter()
            .filter(|o| !clashing.contains(&o.id))
            .collect();
        resolved = resolve_dependencies(metadata, objects);
    }
    let alive: BTreeSet<MetadataObjId> = resolved.objects.iter().map(|o| o.id.clone()).collect();

    let mut cache = SchemaCache {
        sources: assemble_sources(metadata, &alive, &table_builds, &function_builds),
        remote_schemas: remote_builds
            .iter()
            .filter_map(|(name, build)| match &**build {
                Ok(info) if alive.contains(&MetadataObjId::RemoteSchema { name: name.clone() }) => {
                    Some((name.clone(), info.clone()))
                }
                _ => None,
            })
            .collect(),
        custom_types: if alive.contains(&MetadataObjId::CustomTypes) {
            custom_types
        } else {
            BTreeMap::new()
        },
        actions: assemble_actions(actions, &alive),
        cron_triggers: retain_alive(cron_triggers, &alive, |name| {
            MetadataObjId::CronTrigger { name }
        }),
        query_collections: retain_alive(collections, &alive, |name| {
            MetadataObjId::QueryCollection { name }
        }),
        allowlist: metadata
            .allowlist
            .iter()
            .map(|e| e.collection.clone())
            .filter(|collection| {
                alive.contains(&MetadataObjId::AllowlistEntry {
                    collection: collection.clone(),
                })
            })
            .collect(),
        api: BTreeMap::new(),
        dependencies: DependencyGraph::new(&resolved.objects),
        inconsistencies: sink.take_all(),
    };
    for mode in &input.config.build.serving_modes {
        let api = project_api(&cache, *mode);
        cache.api.insert(*mode, api);
    }

    for object in cache.inconsistencies.iter() {
        tracing::warn!(object = %object.id, reason = %object.reason(), "inconsistent object");
    }
    tracing::info!(
        reused = stats.reused,
        recomputed = stats.recomputed,
        source_introspections = stats.source_introspections,
        remote_introspections = stats.remote_introspections,
        objects = cache.dependencies.len(),
        inconsistent = cache.inconsistencies.len(),
        "schema cache built"
    );

    let state = BuildState {
        catalogs,
        tables,
        functions,
        remote_schemas,
        stats,
    };
    Ok((cache, state))
}

/// Records every table and function of a source that could not be
/// introspected, so that the resolver quarantines them with the source.
fn record_unreachable_source(name: &SourceName, source: &SourceMetadata, log: &mut CollectLog) {
    let on_source = SchemaDependency::new(
        SchemaObjId::Source {
            source: name.clone(),
        },
        DependencyReason::Parent,
    );
    for (table, declared) in &source.tables {
        let id = MetadataObjId::Table {
            source: name.clone(),
            table: table.clone(),
        };
        log.record(id, Vec::new(), vec![on_source.clone()]);
        let on_table =
            SchemaDependency::new(SchemaObjId::table_of(name, table), DependencyReason::Parent);
        for child in declared.child_ids(name, table) {
            log.record(child, Vec::new(), vec![on_table.clone()]);
        }
    }
    for (function, declared) in &source.functions {
        let id = MetadataObjId::Function {
            source: name.clone(),
            function: function.clone(),
        };
        log.record(id, Vec::new(), vec![on_source.clone()]);
        let on_function = SchemaDependency::new(
            SchemaObjId::Function {
                source: name.clone(),
                function: function.clone(),
            },
            DependencyReason::Parent,
        );
        for permission in &declared.permissions {
            let id = MetadataObjId::FunctionPermission {
                source: name.clone(),
                function: function.clone(),
                role: permission.role.clone(),
            };
            log.record(id, Vec::new(), vec![on_function.clone()]);
        }
    }
}

fn root_field_claims(
    tables: &BTreeMap<(SourceName, TableName), Arc<TableBuild>>,
    functions: &BTreeMap<(SourceName, FunctionName), Arc<FunctionBuild>>,
    remote_schemas: &BTreeMap<RemoteSchemaName, Arc<RemoteBuild>>,
    actions: &BTreeMap<ActionName, ActionInfo>,
    alive: &BTreeSet<&MetadataObjId>,
) -> BTreeMap<MetadataObjId, Vec<(Root, String)>> {
    let mut claims = BTreeMap::new();
    for ((source, table), build) in tables {
        if let Some(info) = &build.info {
            let id = MetadataObjId::Table {
                source: source.clone(),
                table: table.clone(),
            };
            claims.insert(id, table_root_fields(info));
        }
    }
    for ((source, function), build) in functions {
        if let Some(info) = &build.info {
            let id = MetadataObjId::Function {
                source: source.clone(),
                function: function.clone(),
            };
            claims.insert(id, vec![function_root_field(info)]);
        }
    }
    for (name, build) in remote_schemas {
        if let Ok(info) = &**build {
            claims.insert(
                MetadataObjId::RemoteSchema { name: name.clone() },
                remote_root_fields(info),
            );
        }
    }
    for (name, info) in actions {
        claims.insert(MetadataObjId::Action { name: name.clone() }, vec![action_root_field(info)]);
    }
    claims.retain(|id, _| alive.contains(id));
    claims
}

fn assemble_sources(
    metadata: &Metadata,
    alive: &BTreeSet<MetadataObjId>,
    tables: &BTreeMap<(SourceName, TableName), Arc<TableBuild>>,
    functions: &BTreeMap<(SourceName, FunctionName), Arc<FunctionBuild>>,
) -> BTreeMap<SourceName, SourceInfo> {
    let mut sources = BTreeMap::new();
    for name in metadata.sources.keys() {
        if !alive.contains(&MetadataObjId::Source { source: name.clone() }) {
            continue;
        }
        let mut info = SourceInfo::default();
        for ((source, table), build) in tables {
            let kept = build.info.as_ref().filter(|_| source == name);
            if let Some(table_info) = kept.and_then(|t| assemble_table(name, t, alive)) {
                info.tables.insert(table.clone(), table_info);
            }
        }
        for ((source, function), build) in functions {
            let kept = build.info.as_ref().filter(|_| source == name);
            if let Some(function_info) = kept.and_then(|f| assemble_function(name, f, alive)) {
                info.functions.insert(function.clone(), function_info);
            }
        }
        sources.insert(name.clone(), info);
    }
    sources
}

/// Keeps a table and the children that survived resolution.
fn assemble_table(
    source: &SourceName,
    table: &TableInfo,
    alive: &BTreeSet<MetadataObjId>,
) -> Option<TableInfo> {
    let table_id = MetadataObjId::Table {
        source: source.clone(),
        table: table.name.clone(),
    };
    if !alive.contains(&table_id) {
        return None;
    }
    let mut table = table.clone();
    let name = table.name.clone();
    table.relationships.retain(|rel, info| {
        alive.contains(&MetadataObjId::Relationship {
            source: source.clone(),
            table: name.clone(),
            name: rel.clone(),
            kind: info.kind,
        })
    });
    table.computed_fields.retain(|field, _| {
        alive.contains(&MetadataObjId::ComputedField {
            source: source.clone(),
            table: name.clone(),
            name: field.clone(),
        })
    });
    table.event_triggers.retain(|trigger, _| {
        alive.contains(&MetadataObjId::EventTrigger {
            source: source.clone(),
            table: name.clone(),
            name: trigger.clone(),
        })
    });
    for (role, permissions) in table.permissions.iter_mut() {
        let kept = |kind| {
            alive.contains(&MetadataObjId::Permission {
                source: source.clone(),
                table: name.clone(),
                role: role.clone(),
                kind,
            })
        };
        if !kept(PermissionKind::Select) {
            permissions.select = None;
        }
        if !kept(PermissionKind::Insert) {
            permissions.insert = None;
        }
        if !kept(PermissionKind::Update) {
            permissions.update = None;
        }
        if !kept(PermissionKind::Delete) {
            permissions.delete = None;
        }
    }
    table.permissions.retain(|_, permissions| !permissions.is_empty());
    Some(table)
}

fn assemble_function(
    source: &SourceName,
    function: &FunctionInfo,
    alive: &BTreeSet<MetadataObjId>,
) -> Option<FunctionInfo> {
    let id = MetadataObjId::Function {
        source: source.clone(),
        function: function.name.clone(),
    };
    if !alive.contains(&id) {
        return None;
    }
    let mut function = function.clone();
    let name = function.name.clone();
    function.permissions.retain(|role| {
        alive.contains(&MetadataObjId::FunctionPermission {
            source: source.clone(),
            function: name.clone(),
            role: role.clone(),
        })
    });
    Some(function)
}

fn assemble_actions(
    actions: BTreeMap<ActionName, ActionInfo>,
    alive: &BTreeSet<MetadataObjId>,
) -> BTreeMap<ActionName, ActionInfo> {
    actions
        .into_iter()
        .filter(|(name, _)| alive.contains(&MetadataObjId::Action { name: name.clone() }))
        .map(|(name, mut info)| {
            info.permissions.retain(|role| {
                alive.contains(&MetadataObjId::ActionPermission {
                    action: name.clone(),
                    role: role.clone(),
                })
            });
            (name, info)
        })
        .collect()
}

fn retain_alive<K: Ord + Clone, V>(
    map: BTreeMap<K, V>,
    alive: &BTreeSet<MetadataObjId>,
    id: impl Fn(K) -> MetadataObjId,
) -> BTreeMap<K, V> {
    map.into_iter()
        .filter(|(key, _)| alive.contains(&id(key.clone())))
        .collect()
}
