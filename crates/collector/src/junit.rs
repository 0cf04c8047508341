//! JUnit sub-test accounting
//!
//! Pods can ask for individual containers to be reported as JUnit sub-tests
//! via the container-sub-tests annotation. [`JunitNotifier`] decorates
//! another notifier, remembers the most recent pod it saw, and converts that
//! pod's terminated-container states into deterministic test-case records.

use crate::inspect::{annotation_list, ANNOTATION_CONTAINER_SUB_TESTS};
use crate::notifier::ContainerNotifier;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStateTerminated, ContainerStatus, Pod};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// One reported sub-test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    /// Wall-clock seconds attributed to this container, disjoint from the
    /// containers that finished before it
    pub duration_seconds: f64,
    /// Termination message of the container, present iff it exited non-zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_output: Option<String>,
}

/// Decorator that adds JUnit sub-test accounting to another notifier.
///
/// `notify` retains the pod object it was last called with; `sub_tests`
/// consumes it. Drive both from a single thread.
pub struct JunitNotifier {
    inner: Arc<dyn ContainerNotifier>,
    last_pod: Mutex<Option<Pod>>,
}

impl JunitNotifier {
    pub fn new(inner: Arc<dyn ContainerNotifier>) -> Self {
        Self {
            inner,
            last_pod: Mutex::new(None),
        }
    }

    /// Convert the remembered pod's terminated sub-test containers into
    /// test cases, resetting the remembered pod.
    pub fn sub_tests(&self, prefix: &str) -> Vec<TestCase> {
        let Some(pod) = self.last_pod.lock().unwrap().take() else {
            return Vec::new();
        };
        sub_tests_for_pod(&pod, prefix)
    }
}

#[async_trait]
impl ContainerNotifier for JunitNotifier {
    async fn notify(&self, pod: &Pod, container_name: &str) {
        *self.last_pod.lock().unwrap() = Some(pod.clone());
        self.inner.notify(pod, container_name).await;
    }

    async fn complete(&self, pod_name: &str) {
        self.inner.complete(pod_name).await;
    }

    fn done(&self, pod_name: &str) -> watch::Receiver<bool> {
        self.inner.done(pod_name)
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

fn sub_tests_for_pod(pod: &Pod, prefix: &str) -> Vec<TestCase> {
    let names: HashSet<String> = annotation_list(pod, ANNOTATION_CONTAINER_SUB_TESTS)
        .into_iter()
        .collect();
    if names.is_empty() {
        return Vec::new();
    }

    let status = pod.status.as_ref();
    let mut statuses: Vec<&ContainerStatus> = status
        .and_then(|status| status.init_container_statuses.as_ref())
        .into_iter()
        .flatten()
        .chain(
            status
                .and_then(|status| status.container_statuses.as_ref())
                .into_iter()
                .flatten(),
        )
        .collect();
    // Terminated containers first, ordered by finish time; the platform's
    // iteration order must not leak into the report.
    statuses.sort_by(|a, b| match (finished_at(a), finished_at(b)) {
        (Some(a_finish), Some(b_finish)) => {
            a_finish.cmp(&b_finish).then_with(|| a.name.cmp(&b.name))
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });

    let mut tests = Vec::new();
    let mut last_finished: Option<DateTime<Utc>> = None;
    for status in statuses {
        let Some(terminated) = terminated(status) else {
            continue;
        };
        let Some(finish) = terminated.finished_at.as_ref().map(|t| t.0) else {
            continue;
        };
        if names.contains(&status.name) {
            let mut start = terminated.started_at.as_ref().map_or(finish, |t| t.0);
            if let Some(last) = last_finished {
                if last > start {
                    start = last;
                }
            }
            let duration = (finish - start).num_milliseconds() as f64 / 1000.0;
            tests.push(TestCase {
                name: format!("{prefix}container {}", status.name),
                duration_seconds: duration,
                failure_output: (terminated.exit_code != 0)
                    .then(|| terminated.message.clone().unwrap_or_default()),
            });
        }
        last_finished = Some(finish);
    }

    tests.sort_by(|a, b| a.name.cmp(&b.name));
    tests
}

fn terminated(status: &ContainerStatus) -> Option<&ContainerStateTerminated> {
    status.state.as_ref()?.terminated.as_ref()
}

fn finished_at(status: &ContainerStatus) -> Option<DateTime<Utc>> {
    terminated(status)?.finished_at.as_ref().map(|t| t.0)
}
