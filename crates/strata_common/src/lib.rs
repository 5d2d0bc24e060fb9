//! Shared foundational types used across the strata schema-cache compiler.
//!
//! This crate provides content hashing for memoization, the typed name
//! newtypes that make up metadata identifiers, and the internal error type
//! used for invariant violations.

#![warn(missing_docs)]

pub mod hash;
pub mod names;
pub mod result;

pub use hash::{ContentHash, ContentHasher};
pub use names::{
    ActionName, CollectionName, ColumnName, ComputedFieldName, ConstraintName, FunctionName,
    RelationshipName, RemoteSchemaName, RoleName, SourceName, TableName, TriggerName, TypeName,
};
pub use result::{InternalError, StrataResult};
