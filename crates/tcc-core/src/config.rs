//! Coordinator runtime configuration.

use crate::errors::{Result, TccError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `TCC_END_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "TCC_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Deadline for one End fan-out, in milliseconds
    pub end_timeout_ms: u64,
    /// Report each branch's Confirm/Cancel result to the transaction manager
    pub report_branch_results: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            end_timeout_ms: 30_000,
            report_branch_results: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn end_timeout(&self) -> Duration {
        Duration::from_millis(self.end_timeout_ms)
    }

    pub fn with_end_timeout(mut self, timeout: Duration) -> Self {
        self.end_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TccError::invalid_config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TccError::invalid_config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `TCC_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `TCC_*` overrides from an explicit variable list
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "END_TIMEOUT_MS" => {
                    self.end_timeout_ms = value.parse().map_err(|e| {
                        TccError::invalid_config(format!("{ENV_PREFIX}{name}={value}: {e}"))
                    })?;
                }
                "REPORT_BRANCH_RESULTS" => {
                    self.report_branch_results = value.parse().map_err(|e| {
                        TccError::invalid_config(format!("{ENV_PREFIX}{name}={value}: {e}"))
                    })?;
                }
                _ => tracing::debug!(key = %key.as_ref(), "Ignoring unknown TCC override"),
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.end_timeout_ms == 0 {
            return Err(TccError::invalid_config("end_timeout_ms must be positive"));
        }
        Ok(())
    }
}
