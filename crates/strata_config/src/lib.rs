//! Parsing and validation of `strata.toml` settings.
//!
//! Every section is optional. An absent file is not an error for callers that
//! use [`StrataConfig::default`], but [`load_config`] expects the file to exist.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str};
pub use types::*;
