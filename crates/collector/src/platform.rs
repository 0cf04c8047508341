//! Container platform client
//!
//! The collector consumes the container platform through the
//! [`PlatformClient`] capability set so the worker and its helpers can be
//! exercised against a fake in tests. [`KubePlatform`] is the production
//! implementation backed by a namespaced `kube` client.

use crate::types::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, LogParams};
use kube::Client;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::compat::FuturesAsyncReadCompatExt;

/// Byte stream handed back from log and exec endpoints
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// An in-flight remote exec session
pub struct ExecSession {
    /// Stdout of the remote command
    pub stdout: ByteStream,
    /// Resolves once the remote command finishes; errors if it failed
    pub status: BoxFuture<'static, Result<()>>,
}

/// Capability set the collector needs from the container platform
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch a pod by name
    async fn get_pod(&self, name: &str) -> Result<Pod>;

    /// List pods matching a field selector
    async fn list_pods(&self, field_selector: &str) -> Result<Vec<Pod>>;

    /// Open a log stream for one container of a pod
    async fn log_stream(&self, pod: &str, container: &str) -> Result<ByteStream>;

    /// Start a command in a running container and stream its stdout
    async fn exec_stream(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecSession>;

    /// Run a command in a running container to completion
    async fn exec_run(&self, pod: &str, container: &str, command: Vec<String>) -> Result<()>;

    /// Delete a pod
    async fn delete_pod(&self, name: &str) -> Result<()>;
}

/// Production implementation backed by the Kubernetes API
pub struct KubePlatform {
    pods: Api<Pod>,
}

impl KubePlatform {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl PlatformClient for KubePlatform {
    async fn get_pod(&self, name: &str) -> Result<Pod> {
        Ok(self.pods.get(name).await?)
    }

    async fn list_pods(&self, field_selector: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().fields(field_selector);
        Ok(self.pods.list(&params).await?.items)
    }

    async fn log_stream(&self, pod: &str, container: &str) -> Result<ByteStream> {
        let params = LogParams {
            container: Some(container.to_string()),
            ..LogParams::default()
        };
        let stream = self.pods.log_stream(pod, &params).await?;
        Ok(Box::pin(stream.compat()))
    }

    async fn exec_stream(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecSession> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(false);
        let mut attached = self.pods.exec(pod, command, &params).await?;
        let stdout = attached.stdout().ok_or_else(|| Error::ExecFailed {
            pod: pod.to_string(),
            container: container.to_string(),
            reason: "exec session has no stdout stream".to_string(),
        })?;

        let pod = pod.to_string();
        let container = container.to_string();
        let status = async move {
            if let Some(status) = attached.take_status() {
                if let Some(status) = status.await {
                    if status.status.as_deref() == Some("Failure") {
                        return Err(Error::ExecFailed {
                            pod,
                            container,
                            reason: status
                                .message
                                .unwrap_or_else(|| "remote command failed".to_string()),
                        });
                    }
                }
            }
            attached.join().await.map_err(anyhow::Error::from).map_err(Error::from)
        };

        Ok(ExecSession {
            stdout: Box::pin(stdout),
            status: Box::pin(status),
        })
    }

    async fn exec_run(&self, pod: &str, container: &str, command: Vec<String>) -> Result<()> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(false)
            .stderr(true);
        let mut attached = self.pods.exec(pod, command, &params).await?;

        let mut stderr_output = String::new();
        if let Some(mut stderr) = attached.stderr() {
            // Drain stderr so the remote side is never blocked on a full pipe
            let _ = stderr.read_to_string(&mut stderr_output).await;
        }
        let failure = match attached.take_status() {
            Some(status) => status
                .await
                .filter(|status| status.status.as_deref() == Some("Failure")),
            None => None,
        };
        attached.join().await.map_err(anyhow::Error::from)?;

        if let Some(status) = failure {
            let reason = match status.message {
                Some(message) if !message.is_empty() => message,
                _ if !stderr_output.is_empty() => stderr_output,
                _ => "remote command failed".to_string(),
            };
            return Err(Error::ExecFailed {
                pod: pod.to_string(),
                container: container.to_string(),
                reason,
            });
        }
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.pods.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// True when the error means the target container has already gone away,
/// which the rendezvous protocol treats as a clean exit.
pub(crate) fn is_container_not_found(err: &Error) -> bool {
    match err {
        Error::KubeError(kube::Error::Api(response)) => response
            .message
            .to_ascii_lowercase()
            .contains("container not found"),
        Error::ExecFailed { reason, .. } => {
            reason.to_ascii_lowercase().contains("container not found")
        }
        _ => false,
    }
}
