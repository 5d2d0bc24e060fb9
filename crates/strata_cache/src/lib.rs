//! Selective recomputation for the schema cache build.
//!
//! This crate provides the invalidation key store, which versions external
//! state the metadata document cannot see, and the content-hash memo table
//! that lets a rebuild reuse every per-object result whose declared inputs are
//! unchanged.

#![warn(missing_docs)]

pub mod invalidation;
pub mod memo;

pub use invalidation::{CacheInvalidations, InvalidationKey, InvalidationKeys};
pub use memo::{ChangeSet, Memo};
