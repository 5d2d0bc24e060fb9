//! Inconsistent objects: their representation, thread-safe collection during
//! a build, and rendering for the export API and startup logs.
//!
//! An inconsistency is never an error. The [`InconsistencySink`] accumulates
//! them while objects are compiled in parallel, and the resulting
//! [`Inconsistencies`] set travels with the schema cache.

#![warn(missing_docs)]

pub mod inconsistency;
pub mod report;
pub mod sink;

pub use inconsistency::{Inconsistencies, InconsistentObject};
pub use report::{
    InconsistencyRenderer, InconsistencyReport, JsonRenderer, ReportEntry, TextRenderer,
};
pub use sink::InconsistencySink;
