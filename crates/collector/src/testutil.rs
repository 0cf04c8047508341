//! Test fixtures: a recording fake platform client and pod builders.

use crate::platform::{ByteStream, ExecSession, PlatformClient};
use crate::types::{Error, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStatus,
    Pod, PodSpec, PodStatus, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Recording fake for [`PlatformClient`].
///
/// Serves canned pods, log bytes, and one gzipped tar archive; records every
/// exec and delete call so tests can assert on the remote traffic.
#[derive(Default)]
pub(crate) struct FakePlatform {
    pub pods: Mutex<HashMap<String, Pod>>,
    pub logs: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub failing_logs: Mutex<HashSet<(String, String)>>,
    pub archive: Mutex<Option<Vec<u8>>>,
    pub exec_run_errors: Mutex<Vec<Error>>,
    pub delete_errors: Mutex<Vec<Error>>,
    pub exec_calls: Mutex<Vec<(String, String, Vec<String>)>>,
    pub deleted_pods: Mutex<Vec<String>>,
    pub list_calls: Mutex<Vec<String>>,
}

impl FakePlatform {
    pub fn with_pod(pod: Pod) -> Self {
        let fake = Self::default();
        fake.put_pod(pod);
        fake
    }

    pub fn put_pod(&self, pod: Pod) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.pods.lock().unwrap().insert(name, pod);
    }

    pub fn exec_calls_for(&self, pod: &str) -> Vec<Vec<String>> {
        self.exec_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _, _)| p == pod)
            .map(|(_, _, cmd)| cmd.clone())
            .collect()
    }
}

fn not_found(name: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("pods \"{name}\" not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_pod(&self, name: &str) -> Result<Pod> {
        self.pods
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn list_pods(&self, field_selector: &str) -> Result<Vec<Pod>> {
        self.list_calls
            .lock()
            .unwrap()
            .push(field_selector.to_string());
        let name = field_selector
            .strip_prefix("metadata.name=")
            .unwrap_or(field_selector);
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .into_iter()
            .collect())
    }

    async fn log_stream(&self, pod: &str, container: &str) -> Result<ByteStream> {
        let key = (pod.to_string(), container.to_string());
        if self.failing_logs.lock().unwrap().contains(&key) {
            return Err(not_found(pod));
        }
        let bytes = self
            .logs
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default();
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    async fn exec_stream(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecSession> {
        self.exec_calls
            .lock()
            .unwrap()
            .push((pod.to_string(), container.to_string(), command));
        let bytes = self
            .archive
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(empty_archive);
        Ok(ExecSession {
            stdout: Box::pin(std::io::Cursor::new(bytes)),
            status: Box::pin(async { Ok(()) }),
        })
    }

    async fn exec_run(&self, pod: &str, container: &str, command: Vec<String>) -> Result<()> {
        self.exec_calls
            .lock()
            .unwrap()
            .push((pod.to_string(), container.to_string(), command));
        let mut errors = self.exec_run_errors.lock().unwrap();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.remove(0))
        }
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.deleted_pods.lock().unwrap().push(name.to_string());
        let mut errors = self.delete_errors.lock().unwrap();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.remove(0))
        }
    }
}

/// A valid gzipped tar archive with no entries.
pub(crate) fn empty_archive() -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.finish().unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

pub(crate) fn pod(name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        ..Pod::default()
    }
}

pub(crate) fn with_annotation(mut pod: Pod, key: &str, value: &str) -> Pod {
    pod.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    pod
}

pub(crate) fn with_container_statuses(mut pod: Pod, statuses: Vec<ContainerStatus>) -> Pod {
    pod.status
        .get_or_insert_with(PodStatus::default)
        .container_statuses = Some(statuses);
    pod
}

pub(crate) fn with_init_container_statuses(mut pod: Pod, statuses: Vec<ContainerStatus>) -> Pod {
    pod.status
        .get_or_insert_with(PodStatus::default)
        .init_container_statuses = Some(statuses);
    pod
}

pub(crate) fn with_containers(mut pod: Pod, containers: Vec<Container>) -> Pod {
    pod.spec.get_or_insert_with(PodSpec::default).containers = containers;
    pod
}

pub(crate) fn running_status(name: &str) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        state: Some(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..ContainerState::default()
        }),
        ..ContainerStatus::default()
    }
}

/// Terminated container status with start/finish as offsets (in seconds)
/// from a fixed epoch, so tests read like timelines.
pub(crate) fn terminated_status(
    name: &str,
    exit_code: i32,
    started_offset: i64,
    finished_offset: i64,
    message: Option<&str>,
) -> ContainerStatus {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    ContainerStatus {
        name: name.to_string(),
        state: Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code,
                started_at: Some(Time(base + chrono::Duration::seconds(started_offset))),
                finished_at: Some(Time(base + chrono::Duration::seconds(finished_offset))),
                message: message.map(String::from),
                ..ContainerStateTerminated::default()
            }),
            ..ContainerState::default()
        }),
        ..ContainerStatus::default()
    }
}

pub(crate) fn container_with_mount(name: &str, volume: &str) -> Container {
    Container {
        name: name.to_string(),
        volume_mounts: Some(vec![VolumeMount {
            name: volume.to_string(),
            mount_path: format!("/tmp/{volume}"),
            ..VolumeMount::default()
        }]),
        ..Container::default()
    }
}

pub(crate) fn plain_container(name: &str) -> Container {
    Container {
        name: name.to_string(),
        ..Container::default()
    }
}
