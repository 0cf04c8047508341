use crate::config::CollectorConfig;
use crate::platform::PlatformClient;
use std::sync::Arc;

// Error type for the collector
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Configuration parse error: {0}")]
    SerializationError(#[from] serde_yaml::Error),

    #[error("exec in container {container} of pod {pod} failed: {reason}")]
    ExecFailed {
        pod: String,
        container: String,
        reason: String,
    },

    #[error("timed out waiting for container {container} of pod {pod} to start")]
    ReadinessTimeout { pod: String, container: String },

    #[error("failed to gather container logs: {0}")]
    LogGather(String),

    #[error("General error: {0}")]
    GenericError(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// Context shared across collector operations
#[derive(Clone)]
pub struct Context {
    pub platform: Arc<dyn PlatformClient>,
    pub config: Arc<CollectorConfig>,
}
