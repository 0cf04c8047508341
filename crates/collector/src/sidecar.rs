//! Artifacts sidecar rendezvous
//!
//! A test pod that publishes artifacts carries a sidecar container named
//! `artifacts`. The sidecar runs [`ARTIFACTS_SIDECAR_SCRIPT`]: it creates the
//! sentinel file `/tmp/done` on startup and stays alive while that file
//! exists. Once extraction has finished, the orchestrator removes the
//! sentinel over exec and the sidecar exits cleanly, letting the platform
//! reap the pod.

use crate::platform::{is_container_not_found, PlatformClient};
use crate::types::{Error, Result};
use k8s_openapi::api::core::v1::Pod;
use std::time::Duration;
use tracing::{debug, warn};

/// Name of the sidecar container that keeps the pod alive for extraction
pub const SIDECAR_CONTAINER_NAME: &str = "artifacts";
/// Name of the shared volume artifact-publishing containers mount
pub const ARTIFACTS_VOLUME_NAME: &str = "artifacts";
/// Mount path of the shared artifacts volume inside every container
pub const ARTIFACTS_MOUNT_PATH: &str = "/tmp/artifacts";
/// Sentinel file whose removal tells the sidecar to exit
pub const DONE_SENTINEL_PATH: &str = "/tmp/done";

/// Startup command of the sidecar container. A single atomic blob; the
/// rendezvous behavior of both sides depends on its exact contents.
pub const ARTIFACTS_SIDECAR_SCRIPT: &str = r#"#!/bin/sh
trap 'kill $(jobs -p) 2>/dev/null; exit 0' TERM

touch /tmp/done
while true; do
	if [ ! -f /tmp/done ]; then
		sleep 30
		exit 0
	fi
	sleep 5 &
	wait $!
done
"#;

/// Wait until the sidecar container has entered Running or Terminated.
///
/// The exec endpoint refuses containers that have not started, so the
/// extraction path has to hold off until the sidecar is up. Transient pod
/// fetch errors are retried until the deadline.
pub async fn wait_for_sidecar(
    platform: &dyn PlatformClient,
    pod_name: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match platform.get_pod(pod_name).await {
            Ok(pod) => {
                if sidecar_started(&pod) {
                    return Ok(());
                }
            }
            Err(err) => {
                warn!("failed to fetch pod {pod_name} while waiting for its artifacts container: {err}");
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::ReadinessTimeout {
                pod: pod_name.to_string(),
                container: SIDECAR_CONTAINER_NAME.to_string(),
            });
        }
        tokio::time::sleep(poll).await;
    }
}

fn sidecar_started(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .filter(|status| status.name == SIDECAR_CONTAINER_NAME)
        .any(|status| {
            status
                .state
                .as_ref()
                .is_some_and(|state| state.running.is_some() || state.terminated.is_some())
        })
}

/// Remove the rendezvous sentinel inside the sidecar.
///
/// A missing container means the sidecar already exited on its own, which is
/// the desired terminal state.
pub async fn remove_done_sentinel(platform: &dyn PlatformClient, pod_name: &str) -> Result<()> {
    let command = vec![
        "rm".to_string(),
        "-f".to_string(),
        DONE_SENTINEL_PATH.to_string(),
    ];
    match platform
        .exec_run(pod_name, SIDECAR_CONTAINER_NAME, command)
        .await
    {
        Ok(()) => Ok(()),
        Err(err) if is_container_not_found(&err) => {
            debug!("artifacts container in pod {pod_name} already exited");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// The orchestrator half of the rendezvous, run on every extraction exit
/// path. When the sentinel cannot be removed, fall back to deleting the pod
/// so the platform can reap its resources.
pub async fn signal_done(platform: &dyn PlatformClient, pod_name: &str) {
    if let Err(err) = remove_done_sentinel(platform, pod_name).await {
        warn!("failed to signal the artifacts container in pod {pod_name}: {err}, deleting the pod instead");
        if let Err(err) = platform.delete_pod(pod_name).await {
            warn!("failed to delete pod {pod_name} after a failed sidecar signal: {err}");
        }
    }
}
