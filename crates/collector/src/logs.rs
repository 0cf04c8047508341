//! Container log gathering
//!
//! Pods opt into log archival with the save-container-logs annotation. For
//! every terminated container (init and main) the gatherer streams the
//! platform log endpoint into a gzip-compressed file under the artifact
//! directory. Per-container failures are collected and reported together
//! after every container has been attempted.

use crate::inspect::{annotation, ANNOTATION_SAVE_CONTAINER_LOGS};
use crate::platform::PlatformClient;
use crate::types::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use std::path::{Path, PathBuf};
use tokio_util::io::SyncIoBridge;
use tracing::debug;

/// Subdirectory of the artifact directory that receives log files
pub const CONTAINER_LOGS_DIR: &str = "container-logs";

/// Gather compressed logs for all terminated containers of a pod.
///
/// No-op unless the pod carries the save-container-logs annotation set to
/// `"true"`. Failures on individual containers do not stop the loop; they
/// are folded into a single aggregate error.
pub async fn gather_container_logs(
    platform: &dyn PlatformClient,
    pod_name: &str,
    dir: &Path,
) -> Result<()> {
    let pods = platform
        .list_pods(&format!("metadata.name={pod_name}"))
        .await?;
    let Some(pod) = pods.into_iter().next() else {
        return Err(Error::LogGather(format!("pod {pod_name} not found")));
    };

    if annotation(&pod, ANNOTATION_SAVE_CONTAINER_LOGS) != Some("true") {
        debug!("pod {pod_name} did not opt into container log archival");
        return Ok(());
    }

    tokio::fs::create_dir_all(dir).await?;

    let mut failures = Vec::new();
    for name in terminated_containers(&pod) {
        if let Err(err) = archive_container_log(platform, pod_name, &name, dir).await {
            failures.push(format!("{name}: {err}"));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::LogGather(failures.join(", ")))
    }
}

fn terminated_containers(pod: &Pod) -> Vec<String> {
    let status = pod.status.as_ref();
    let statuses = status
        .and_then(|status| status.init_container_statuses.as_ref())
        .into_iter()
        .flatten()
        .chain(
            status
                .and_then(|status| status.container_statuses.as_ref())
                .into_iter()
                .flatten(),
        );
    statuses
        .filter(|status| is_terminated(status))
        .map(|status| status.name.clone())
        .collect()
}

fn is_terminated(status: &ContainerStatus) -> bool {
    status
        .state
        .as_ref()
        .is_some_and(|state| state.terminated.is_some())
}

async fn archive_container_log(
    platform: &dyn PlatformClient,
    pod_name: &str,
    container: &str,
    dir: &Path,
) -> Result<()> {
    let stream = platform.log_stream(pod_name, container).await?;
    let path: PathBuf = dir.join(format!("{container}.log.gz"));

    let mut reader = SyncIoBridge::new(stream);
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::create(&path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        std::io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    })
    .await
    .map_err(|err| Error::GenericError(anyhow::anyhow!("log archival task panicked: {err}")))?
}
