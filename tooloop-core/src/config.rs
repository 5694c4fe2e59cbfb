use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Loop engine configuration, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub disclosure: DisclosureConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            parallel: ParallelConfig::default(),
            disclosure: DisclosureConfig::default(),
        }
    }
}

fn default_max_iterations() -> u32 {
    20
}

impl LoopConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_parallel(mut self, per_call_timeout: Duration, batch_timeout: Duration) -> Self {
        self.parallel = ParallelConfig {
            enabled: true,
            per_call_timeout_ms: duration_ms(per_call_timeout),
            batch_timeout_ms: duration_ms(batch_timeout),
        };
        self
    }

    pub fn without_context_capability(mut self) -> Self {
        self.disclosure.context_capability = false;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be at least 1".into(),
            ));
        }
        self.parallel.validate()
    }
}

/// Concurrent execution of the calls in one model turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            per_call_timeout_ms: default_per_call_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

fn default_per_call_timeout_ms() -> u64 {
    30_000
}

fn default_batch_timeout_ms() -> u64 {
    120_000
}

impl ParallelConfig {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.per_call_timeout_ms == 0 || self.batch_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "parallel timeouts must be greater than zero".into(),
            ));
        }
        if self.batch_timeout_ms < self.per_call_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "batch_timeout_ms ({}) is shorter than per_call_timeout_ms ({})",
                self.batch_timeout_ms, self.per_call_timeout_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisclosureConfig {
    /// Create a `<node>_context` capability on every non-empty unfold.
    #[serde(default = "default_true")]
    pub context_capability: bool,
}

impl Default for DisclosureConfig {
    fn default() -> Self {
        Self {
            context_capability: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
