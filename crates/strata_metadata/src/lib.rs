//! The declarative metadata document and the identifiers derived from it.
//!
//! A [`Metadata`] document is the full configuration the schema cache is
//! compiled from. It is immutable for the duration of a build and is replaced
//! wholesale on reload. Edits produced by the drift checker are expressed as a
//! [`MetadataUpdater`] so that the persistence layer can apply them atomically.

#![warn(missing_docs)]

pub mod document;
pub mod error;
pub mod ids;
pub mod loader;
pub mod updater;

pub use document::*;
pub use error::MetadataError;
pub use ids::{
    DependencyReason, MetadataObjId, PermissionKind, RelationshipKind, SchemaDependency,
    SchemaObjId,
};
pub use loader::{load_metadata, load_metadata_from_str};
pub use updater::{ColumnRename, MetadataUpdate, MetadataUpdater, RelationshipTarget};
