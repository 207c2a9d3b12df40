//! Pipeline and session configuration

use crate::core::Role;
use crate::core::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for the offline classify/decode pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of clusters: noise plus four polarizations
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    /// Seed for k-means++ initialization
    #[serde(default)]
    pub seed: u64,
    /// Lloyd iteration bound
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Centroid shift (normalized units) treated as converged
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Voltage above which a channel counts as signal
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: f64,
    /// Quantization step used when estimating the noise floor
    #[serde(default = "default_noise_quantum")]
    pub noise_quantum: f64,
}

fn default_num_classes() -> usize {
    5
}

fn default_max_iterations() -> usize {
    300
}

fn default_tolerance() -> f64 {
    1e-9
}

fn default_noise_threshold() -> f64 {
    0.0025
}

fn default_noise_quantum() -> f64 {
    1e-4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_classes: default_num_classes(),
            seed: 0,
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            noise_threshold: default_noise_threshold(),
            noise_quantum: default_noise_quantum(),
        }
    }
}

impl PipelineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.noise_quantum.is_finite() && self.noise_quantum > 0.0) {
            return Err(invalid("noise_quantum", "a positive number", self.noise_quantum));
        }
        if !(self.noise_threshold.is_finite() && self.noise_threshold >= 0.0) {
            return Err(invalid("noise_threshold", "a non-negative number", self.noise_threshold));
        }
        if self.num_classes == 0 {
            return Err(invalid("num_classes", "at least 1", self.num_classes));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        save_json(self, path)
    }
}

fn invalid(field: &'static str, expected: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field,
        expected,
        value: value.to_string(),
    }
}

/// Settings for a live key exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub role: Role,
    /// Final key length in bits
    #[serde(default = "default_target_length")]
    pub target_length: usize,
    /// Bound on every blocking receive
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// How often a blocked receive re-checks for cancellation
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Receiver only: readings above this are a 0 bit
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: i64,
    /// Rounds allowed before giving up on reaching `target_length`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_target_length() -> usize {
    32
}

fn default_receive_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_detection_threshold() -> i64 {
    512
}

fn default_max_attempts() -> usize {
    64
}

impl SessionConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            target_length: default_target_length(),
            receive_timeout_ms: default_receive_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            detection_threshold: default_detection_threshold(),
            max_attempts: default_max_attempts(),
        }
    }

    pub fn with_target_length(mut self, bits: usize) -> Self {
        self.target_length = bits;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        save_json(self, path)
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&content)?)
}

fn save_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path.as_ref(), content)?;
    Ok(())
}
