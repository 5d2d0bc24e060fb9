//! Errors reported by a drift check.

use strata_common::{FunctionName, InternalError, SourceName};
use strata_metadata::MetadataObjId;
use strata_schema::{BuildError, IntrospectionError};

/// Why a drift check did not publish a new cache.
///
/// Every variant leaves the published cache and the metadata document as they
/// were. [`DriftError::OverloadedFunction`] and
/// [`DriftError::IndirectDependencies`] are request errors the caller can
/// retry with different input; the rest are fatal for the enclosing
/// transaction.
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    /// The requested source is not declared in the metadata.
    #[error("source {name:?} is not tracked")]
    UnknownSource {
        /// The requested source.
        name: SourceName,
    },

    /// The live schema of the source could not be listed.
    #[error("failed to capture the schema of source {name:?}: {error}")]
    Snapshot {
        /// The source being captured.
        name: SourceName,
        /// The introspection failure.
        #[source]
        error: IntrospectionError,
    },

    /// The administrative action itself failed.
    #[error("administrative action failed: {0}")]
    Action(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A tracked function now has more than one live signature.
    #[error("the following tracked function(s) cannot be overloaded: {}", join(functions))]
    OverloadedFunction {
        /// The overloaded functions, in name order.
        functions: Vec<FunctionName>,
    },

    /// Objects outside the dropped elements depend on them and cascading was
    /// not requested.
    #[error("cannot proceed due to the following dependent objects: {}", join(dependents))]
    IndirectDependencies {
        /// Every indirect dependent, in identifier order.
        dependents: Vec<MetadataObjId>,
    },

    /// The rebuild after the action failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// A broken invariant, including unexplained new inconsistencies.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl DriftError {
    /// Returns `true` for errors caused by the request rather than by the
    /// system, which the caller may retry with different input.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            DriftError::UnknownSource { .. }
                | DriftError::OverloadedFunction { .. }
                | DriftError::IndirectDependencies { .. }
        )
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_overloaded() {
        let err = DriftError::OverloadedFunction {
            functions: vec!["find".into(), "search".into()],
        };
        assert_eq!(
            err.to_string(),
            "the following tracked function(s) cannot be overloaded: find, search"
        );
        assert!(err.is_request_error());
    }

    #[test]
    fn display_dependents() {
        let err = DriftError::IndirectDependencies {
            dependents: vec![MetadataObjId::Table {
                source: "default".into(),
                table: "book".into(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "cannot proceed due to the following dependent objects: table \"book\" in source \"default\""
        );
    }

    #[test]
    fn internal_is_not_a_request_error() {
        let err = DriftError::from(InternalError::new("new inconsistencies"));
        assert!(!err.is_request_error());
        assert_eq!(err.to_string(), "internal error: new inconsistencies");
    }
}
