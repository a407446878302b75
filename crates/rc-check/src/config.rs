//! Harness configuration.
//!
//! Defaults match routine CI runs: ten rounds, explain mode off, noisy
//! entries silenced at the descriptor level. A JSON file can override any
//! field, and `REFCHECK_MAX_ROUNDS` / `REFCHECK_EXPLAIN` override the file.

use std::num::NonZeroUsize;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MAX_ROUNDS: NonZeroUsize = NonZeroUsize::new(10).unwrap();

pub const ENV_MAX_ROUNDS: &str = "REFCHECK_MAX_ROUNDS";
pub const ENV_EXPLAIN: &str = "REFCHECK_EXPLAIN";

/// How output of noisy entries is kept off the error stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suppression {
    /// Point the error stream descriptor at the null device.
    #[default]
    Descriptor,
    /// Never redirect; noisy entries run unsuppressed.
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Rounds a unit of work gets to stabilize before it is declared leaking.
    pub max_rounds: usize,
    /// Capture live-object snapshots on the final round and list suspects.
    pub explain: bool,
    pub suppression: Suppression,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS.get(),
            explain: false,
            suppression: Suppression::default(),
        }
    }
}

impl HarnessConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_vars(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_MAX_ROUNDS) {
            self.max_rounds = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_MAX_ROUNDS,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_EXPLAIN) {
            self.explain = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: ENV_EXPLAIN,
                        value,
                    });
                }
            };
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rounds().map(|_| ())
    }

    pub fn rounds(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.max_rounds).ok_or(ConfigError::InvalidMaxRounds)
    }
}
