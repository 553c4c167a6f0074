//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rewrite closed pipelines with predicate/order pushdown before running.
    pub optimize: bool,

    /// Bound of the hand-off queue between a detached operator and the
    /// cooperatively scheduled rest of the pipeline.
    pub detached_queue_capacity: usize,

    /// Abandon execution after this many executor steps.
    pub max_steps: Option<u64>,

    /// Sleep applied when a step only waited on detached workers.
    pub idle_backoff_us: u64,

    /// `tracing` filter directive used by the binary layer.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            detached_queue_capacity: 16,
            max_steps: None,
            idle_backoff_us: 50,
            log_filter: "info".to_string(),
        }
    }
}

/// Optional overrides, e.g. the `config:` block of a pipeline definition.
/// Unset fields leave the base configuration untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub optimize: Option<bool>,
    pub detached_queue_capacity: Option<usize>,
    pub max_steps: Option<u64>,
    pub idle_backoff_us: Option<u64>,
    pub log_filter: Option<String>,
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SLUICE_OPTIMIZE`: `true`/`false`
    /// - `SLUICE_DETACHED_QUEUE_CAPACITY`: hand-off queue bound
    /// - `SLUICE_MAX_STEPS`: step limit
    /// - `SLUICE_IDLE_BACKOFF_US`: idle sleep in microseconds
    /// - `SLUICE_LOG`: log filter
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("SLUICE_OPTIMIZE") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.optimize = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_DETACHED_QUEUE_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.detached_queue_capacity = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_MAX_STEPS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.max_steps = Some(v);
            }
        }

        if let Ok(s) = std::env::var("SLUICE_IDLE_BACKOFF_US") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.idle_backoff_us = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_LOG") {
            cfg.log_filter = s;
        }

        cfg
    }

    /// Apply overrides on top of this configuration.
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.optimize {
            self.optimize = v;
        }
        if let Some(v) = overrides.detached_queue_capacity {
            self.detached_queue_capacity = v;
        }
        if let Some(v) = overrides.max_steps {
            self.max_steps = Some(v);
        }
        if let Some(v) = overrides.idle_backoff_us {
            self.idle_backoff_us = v;
        }
        if let Some(v) = &overrides.log_filter {
            self.log_filter = v.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.detached_queue_capacity == 0 {
            return Err(Error::Config(
                "detached_queue_capacity must be at least 1".into(),
            ));
        }
        if self.max_steps == Some(0) {
            return Err(Error::Config("max_steps must be positive".into()));
        }
        Ok(())
    }
}
