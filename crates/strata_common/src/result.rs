//! Common result and error types for the strata compiler.

/// The standard result type for fallible internal operations.
///
/// `Ok` contains the result value (which may exclude quarantined objects).
/// `Err` indicates a broken invariant inside strata, not a problem with the
/// user's metadata. Metadata problems are reported as inconsistent objects
/// and the operation still returns `Ok`.
pub type StrataResult<T> = Result<T, InternalError>;

/// An internal error indicating a bug or broken invariant, not a user input problem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("internal error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
