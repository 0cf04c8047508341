//! Container notifier contract
//!
//! The scheduler drives artifact collection through this four-operation
//! capability set. Implementations: [`crate::worker::ArtifactWorker`] (the
//! real thing), [`NoOpNotifier`] (collection disabled), and
//! [`crate::junit::JunitNotifier`] (decorator that adds JUnit accounting).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::watch;

/// Observer of per-container terminal state transitions
#[async_trait]
pub trait ContainerNotifier: Send + Sync {
    /// Report that a container of a pod has reached a terminal state
    async fn notify(&self, pod: &Pod, container_name: &str);

    /// Report that a pod is terminal regardless of outstanding containers
    async fn complete(&self, pod_name: &str);

    /// Obtain the completion signal for a pod; the receiver reads `true`
    /// once extraction has finished. Unknown pods read `true` immediately.
    fn done(&self, pod_name: &str) -> watch::Receiver<bool>;

    /// Abort collection, releasing remote resources best-effort
    fn cancel(&self);
}

/// Notifier that ignores every event, used when collection is disabled
pub struct NoOpNotifier;

#[async_trait]
impl ContainerNotifier for NoOpNotifier {
    async fn notify(&self, _pod: &Pod, _container_name: &str) {}

    async fn complete(&self, _pod_name: &str) {}

    fn done(&self, _pod_name: &str) -> watch::Receiver<bool> {
        completed_signal()
    }

    fn cancel(&self) {}
}

/// A completion signal that already reads done
pub(crate) fn completed_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(true);
    drop(tx);
    rx
}
