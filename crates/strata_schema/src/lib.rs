//! Incremental compilation of the metadata document into a schema cache.
//!
//! A build introspects every data source and remote schema, compiles each
//! declared object against what was found, removes objects whose dependencies
//! are missing, and projects the per-role API of each serving mode. Results
//! are memoized per object so a rebuild only recomputes what changed.
//! Problems with individual objects never fail a build; they are reported as
//! inconsistencies on the resulting [`SchemaCache`].
//!
//! # Usage
//!
//! ```ignore
//! let handle = SchemaCacheHandle::new(metadata, config, sources, remote)?;
//! let snapshot = handle.rebuild(&CacheInvalidations::default().reload_source("default"))?;
//! ```

#![warn(missing_docs)]

pub mod action;
pub mod api;
pub mod bool_exp;
pub mod collection;
pub mod computed_field;
pub mod context;
pub mod cron;
pub mod custom_types;
pub mod engine;
pub mod errors;
pub mod event_trigger;
pub mod function;
pub mod graph;
pub mod handle;
pub mod introspect;
pub mod permission;
pub mod relationship;
pub mod remote;
pub mod resolve;
pub mod schema_cache;
pub mod source;
pub mod table;

#[cfg(test)]
mod testing;

pub use api::{project_api, ApiSchema, Root, RootFields};
pub use engine::{build, BuildInput, BuildState, BuildStats};
pub use errors::BuildError;
pub use graph::DependencyGraph;
pub use handle::{FileMetadataStore, MetadataStore, SchemaCacheHandle, Snapshot, SourceOverlay};
pub use introspect::{
    ColumnDescriptor, ForeignKeyDescriptor, FunctionArgument, FunctionDescriptor,
    IntrospectionError, RemoteSchemaDescriptor, RemoteSchemaIntrospector, SourceCatalog,
    SourceIntrospector, TableDescriptor, Volatility,
};
pub use schema_cache::*;
