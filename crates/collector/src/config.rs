//! Collector Configuration
//!
//! Configuration for the artifact collection worker. Loaded from a mounted
//! YAML file with sensible defaults for every field so an empty file is a
//! valid configuration.

use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main collector configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CollectorConfig {
    /// Worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Extraction worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Capacity of the bounded extraction queue
    #[serde(default = "default_queue_depth", rename = "queueDepth")]
    pub queue_depth: usize,

    /// How long to wait for the artifacts container to start before giving
    /// up on a pod, in seconds
    #[serde(
        default = "default_readiness_timeout",
        rename = "readinessTimeoutSeconds"
    )]
    pub readiness_timeout_seconds: u64,

    /// Interval between readiness polls, in seconds
    #[serde(default = "default_readiness_poll", rename = "readinessPollSeconds")]
    pub readiness_poll_seconds: u64,
}

fn default_queue_depth() -> usize {
    4
}

fn default_readiness_timeout() -> u64 {
    300
}

fn default_readiness_poll() -> u64 {
    1
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            readiness_timeout_seconds: default_readiness_timeout(),
            readiness_poll_seconds: default_readiness_poll(),
        }
    }
}

impl CollectorConfig {
    /// Load configuration from a mounted YAML file
    pub fn from_mounted_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Validate that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.worker.queue_depth == 0 {
            return Err(Error::ConfigError(
                "worker.queueDepth must be at least 1".to_string(),
            ));
        }
        if self.worker.readiness_poll_seconds == 0 {
            return Err(Error::ConfigError(
                "worker.readinessPollSeconds must be at least 1".to_string(),
            ));
        }
        if self.worker.readiness_timeout_seconds < self.worker.readiness_poll_seconds {
            return Err(Error::ConfigError(
                "worker.readinessTimeoutSeconds must not be smaller than the poll interval"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
