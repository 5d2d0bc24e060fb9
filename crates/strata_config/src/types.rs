//! Configuration types deserialized from `strata.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// The top-level configuration parsed from `strata.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StrataConfig {
    /// Schema cache build settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Remote schema introspection settings.
    #[serde(default)]
    pub remote_schemas: RemoteSchemaConfig,
    /// Migration-drift checker settings.
    #[serde(default)]
    pub drift: DriftConfig,
}

/// Schema cache build settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Compile memo misses on the rayon thread pool.
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Render numeric column types as strings in generated SQL.
    #[serde(default)]
    pub stringify_numeric_types: bool,
    /// API projections to compile. Accepts a single mode or a list.
    #[serde(
        default = "default_serving_modes",
        deserialize_with = "deserialize_mode_or_modes"
    )]
    pub serving_modes: Vec<ServingMode>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            stringify_numeric_types: false,
            serving_modes: default_serving_modes(),
        }
    }
}

/// An API projection of the schema cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingMode {
    /// Every consistent object, for every role.
    Standard,
    /// Node-based projection over tables with a primary key.
    Relay,
}

impl fmt::Display for ServingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServingMode::Standard => write!(f, "standard"),
            ServingMode::Relay => write!(f, "relay"),
        }
    }
}

/// Remote schema introspection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteSchemaConfig {
    /// Timeout applied when a remote schema does not declare its own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl RemoteSchemaConfig {
    /// The default timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl Default for RemoteSchemaConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Migration-drift checker settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DriftConfig {
    /// Cascade removal of indirect dependents when the caller does not say.
    #[serde(default)]
    pub cascade_by_default: bool,
    /// What to do when a drift-triggered rebuild surfaces inconsistencies the
    /// checker did not purge.
    #[serde(default)]
    pub new_inconsistencies: NewInconsistencyPolicy,
}

/// Handling of unexplained inconsistencies after a drift-triggered rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewInconsistencyPolicy {
    /// Abort with an internal error; nothing is published.
    #[default]
    Fatal,
    /// Publish the rebuilt cache and return the new inconsistencies.
    Report,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_serving_modes() -> Vec<ServingMode> {
    vec![ServingMode::Standard, ServingMode::Relay]
}

/// Deserializes a field that can be either a single serving mode or a list.
///
/// Allows both `serving_modes = "standard"` and
/// `serving_modes = ["standard", "relay"]`.
fn deserialize_mode_or_modes<'de, D>(deserializer: D) -> Result<Vec<ServingMode>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ModeOrModes;

    impl<'de> Visitor<'de> for ModeOrModes {
        type Value = Vec<ServingMode>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a serving mode or a list of serving modes")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            let mode = ServingMode::deserialize(de::value::StrDeserializer::<E>::new(value))?;
            Ok(vec![mode])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut modes = Vec::new();
            while let Some(mode) = seq.next_element::<ServingMode>()? {
                if !modes.contains(&mode) {
                    modes.push(mode);
                }
            }
            Ok(modes)
        }
    }

    deserializer.deserialize_any(ModeOrModes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StrataConfig::default();
        assert!(config.build.parallel);
        assert!(!config.build.stringify_numeric_types);
        assert_eq!(config.build.serving_modes.len(), 2);
        assert_eq!(config.remote_schemas.default_timeout(), Duration::from_secs(60));
        assert_eq!(config.drift.new_inconsistencies, NewInconsistencyPolicy::Fatal);
        assert!(!config.drift.cascade_by_default);
    }

    #[test]
    fn single_serving_mode() {
        let config: StrataConfig = toml::from_str("[build]\nserving_modes = \"relay\"\n").unwrap();
        assert_eq!(config.build.serving_modes, vec![ServingMode::Relay]);
    }

    #[test]
    fn duplicate_modes_collapse() {
        let config: StrataConfig =
            toml::from_str("[build]\nserving_modes = [\"standard\", \"standard\"]\n").unwrap();
        assert_eq!(config.build.serving_modes, vec![ServingMode::Standard]);
    }

    #[test]
    fn unknown_mode_rejected() {
        assert!(toml::from_str::<StrataConfig>("[build]\nserving_modes = \"graphql\"\n").is_err());
    }

    #[test]
    fn serving_mode_display() {
        assert_eq!(ServingMode::Relay.to_string(), "relay");
    }
}
