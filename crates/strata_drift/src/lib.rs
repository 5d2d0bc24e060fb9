//! Migration-drift checking for administrative schema changes.
//!
//! A [`DriftChecker`] wraps an action that changes the live schema of a
//! source behind the metadata's back (raw DDL, for instance). It compares the
//! tracked tables and functions before and after the action, works out which
//! cached objects the changes reach, and either rejects the action or brings
//! the metadata in line and rebuilds the cache.
//!
//! # Usage
//!
//! ```ignore
//! let outcome = DriftChecker::new(&handle, &transaction)
//!     .cascade(true)
//!     .run(&"default".into(), || transaction.execute("DROP TABLE author CASCADE"))?;
//! persist(&outcome.updater);
//! ```

#![warn(missing_docs)]

pub mod checker;
pub mod diff;
pub mod error;
pub mod impact;
pub mod snapshot;

#[cfg(test)]
mod testing;

pub use checker::{reconcile, DriftChecker, DriftOutcome};
pub use diff::{diff, FunctionDiff, RenamedColumn, SchemaDiff, TableDiff, TypeChange};
pub use error::DriftError;
pub use impact::{analyze, Impact};
pub use snapshot::{capture, SchemaSnapshot};
