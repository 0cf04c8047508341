//! Pod inspection glue
//!
//! Registration is driven entirely from the pod object: a container opts
//! into artifact publication by mounting the shared `artifacts` volume, and
//! annotations refine which containers gate extraction. This module is the
//! only path by which a pod becomes known to the worker.

use crate::sidecar::ARTIFACTS_VOLUME_NAME;
use crate::worker::ArtifactWorker;
use k8s_openapi::api::core::v1::{Container, Pod};
use kube::ResourceExt;

/// Annotation listing containers that must terminate before extraction
pub const ANNOTATION_WAIT_FOR_CONTAINERS: &str = "artifacts.ci.dev/wait-for-container-artifacts";
/// Annotation listing containers reported as individual JUnit sub-tests
pub const ANNOTATION_CONTAINER_SUB_TESTS: &str = "artifacts.ci.dev/container-sub-tests";
/// Annotation gating per-container log archival ("true" to enable)
pub const ANNOTATION_SAVE_CONTAINER_LOGS: &str = "artifacts.ci.dev/save-container-logs";

/// Look up an annotation on a pod
pub(crate) fn annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

/// Parse a comma-delimited container list annotation
pub(crate) fn annotation_list(pod: &Pod, key: &str) -> Vec<String> {
    annotation(pod, key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn all_containers(pod: &Pod) -> impl Iterator<Item = &Container> {
    let spec = pod.spec.as_ref();
    spec.and_then(|spec| spec.init_containers.as_ref())
        .into_iter()
        .flatten()
        .chain(spec.map(|spec| spec.containers.iter()).into_iter().flatten())
}

/// Names of all containers (init and main) that mount the shared artifacts
/// volume.
pub fn containers_with_artifacts(pod: &Pod) -> Vec<String> {
    all_containers(pod)
        .filter(|container| {
            container
                .volume_mounts
                .as_ref()
                .is_some_and(|mounts| mounts.iter().any(|m| m.name == ARTIFACTS_VOLUME_NAME))
        })
        .map(|container| container.name.clone())
        .collect()
}

/// Containers named by the wait-for annotation
pub fn wait_for_containers(pod: &Pod) -> Vec<String> {
    annotation_list(pod, ANNOTATION_WAIT_FOR_CONTAINERS)
}

/// Register a pod with the worker based on its volume mounts and
/// annotations.
pub fn collect_pod_artifacts(worker: &ArtifactWorker, pod: &Pod) {
    worker.collect_from_pod(
        &pod.name_any(),
        &containers_with_artifacts(pod),
        &wait_for_containers(pod),
    );
}
