//! Error types for loading a metadata document.

use std::path::PathBuf;

/// Errors that make a metadata document unusable as a whole.
///
/// These are build-fatal: a malformed document aborts the operation and the
/// previously published schema cache stays in place. Problems with individual
/// objects are never reported through this type.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The document could not be read from disk.
    #[error("failed to read metadata from {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The document is not valid JSON or does not match the metadata shape.
    #[error("failed to parse metadata: {0}")]
    Parse(String),

    /// The document parsed but is structurally invalid.
    #[error("invalid metadata: {0}")]
    Invalid(String),
}
