//! Artifact worker
//!
//! The worker owns all per-pod bookkeeping: which containers are still
//! running, which of them gate extraction, and which pods carry an artifacts
//! sidecar. Every mutation happens under one mutex held only for the map
//! updates themselves; extraction runs on a single background task fed from
//! a bounded queue so a runaway producer backpressures instead of piling up
//! work.

use crate::logs::{self, CONTAINER_LOGS_DIR};
use crate::notifier::{completed_signal, ContainerNotifier};
use crate::remote;
use crate::sidecar;
use crate::types::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

struct WorkerState {
    /// Containers that still have to terminate, per pod. An entry is
    /// removed the moment its pod is handed to the extraction queue.
    remaining: HashMap<String, HashSet<String>>,
    /// Subset of `remaining` that gates extraction, per pod.
    required: HashMap<String, HashSet<String>>,
    /// Pods carrying an artifacts sidecar, i.e. eligible for tar extraction
    /// rather than log gathering alone.
    has_artifacts: HashSet<String>,
    /// Completion signals, kept until the extractor finishes with the pod.
    done: HashMap<String, watch::Sender<bool>>,
    /// Pods the extractor has already finished with. Late registrations for
    /// these must not resurrect bookkeeping and trigger a second extraction.
    completed: HashSet<String>,
    /// Sending half of the extraction queue; `None` once closed.
    queue: Option<mpsc::Sender<String>>,
}

/// Tracks test pods in flight and extracts their artifacts and logs as
/// their containers terminate.
pub struct ArtifactWorker {
    state: Mutex<WorkerState>,
    ctx: Context,
    artifact_dir: PathBuf,
}

impl ArtifactWorker {
    /// Create a worker and spawn its extractor task. Must be called from
    /// within a tokio runtime.
    pub fn new(ctx: Context, artifact_dir: impl Into<PathBuf>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(ctx.config.worker.queue_depth);
        let worker = Arc::new(Self {
            state: Mutex::new(WorkerState {
                remaining: HashMap::new(),
                required: HashMap::new(),
                has_artifacts: HashSet::new(),
                done: HashMap::new(),
                completed: HashSet::new(),
                queue: Some(queue_tx),
            }),
            ctx,
            artifact_dir: artifact_dir.into(),
        });
        tokio::spawn(Arc::clone(&worker).run_extractor(queue_rx));
        worker
    }

    /// Register a pod for collection. `containers_with_artifacts` are the
    /// containers that mount the shared artifacts volume;
    /// `wait_for_containers` are the names from the wait-for annotation.
    /// Idempotent across repeated calls for the same pod, including
    /// re-registrations observed after its extraction already finished.
    pub fn collect_from_pod(
        &self,
        pod_name: &str,
        containers_with_artifacts: &[String],
        wait_for_containers: &[String],
    ) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        if state.completed.contains(pod_name) {
            // a level-triggered driver may re-sync pods we already finished
            debug!("pod {pod_name} was already extracted, ignoring re-registration");
            return;
        }

        state
            .done
            .entry(pod_name.to_string())
            .or_insert_with(|| watch::channel(false).0);

        let remaining = state.remaining.entry(pod_name.to_string()).or_default();
        for name in containers_with_artifacts {
            if name != sidecar::SIDECAR_CONTAINER_NAME {
                remaining.insert(name.clone());
            }
        }

        // wait-for names are tracked even when they publish nothing
        let required = state.required.entry(pod_name.to_string()).or_default();
        for name in wait_for_containers {
            if name != sidecar::SIDECAR_CONTAINER_NAME {
                remaining.insert(name.clone());
                required.insert(name.clone());
            }
        }

        if !containers_with_artifacts.is_empty() {
            state.has_artifacts.insert(pod_name.to_string());
        }
    }

    /// Record that a container of a pod has terminated. When the last
    /// tracked container of the pod is gone, the pod is queued for
    /// extraction.
    pub async fn notify(&self, pod: &Pod, container_name: &str) {
        let pod_name = pod.name_any();
        let (enqueue, close) = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            let Some(remaining) = state.remaining.get_mut(&pod_name) else {
                return;
            };
            if !remaining.remove(container_name) {
                // a container we never tracked for this pod
                return;
            }
            if let Some(required) = state.required.get_mut(&pod_name) {
                required.remove(container_name);
            }

            let required_empty = state
                .required
                .get(&pod_name)
                .map_or(true, HashSet::is_empty);
            if required_empty && !remaining.is_empty() && pod_has_failed_container(pod) {
                // a required container failed; containers that may never
                // exit on their own must not hold up extraction
                debug!(
                    "pod {pod_name} has a failed container, abandoning its remaining optional containers"
                );
                remaining.clear();
            }

            let mut enqueue = None;
            if remaining.is_empty() {
                state.remaining.remove(&pod_name);
                state.required.remove(&pod_name);
                match &state.queue {
                    Some(queue) => enqueue = Some(queue.clone()),
                    None => warn!("extraction queue already closed, dropping pod {pod_name}"),
                }
            }
            (enqueue, state.remaining.is_empty())
        };

        // the queue send happens outside the lock: a full queue must stall
        // this producer, not everyone touching the bookkeeping
        if let Some(queue) = enqueue {
            if queue.send(pod_name.clone()).await.is_err() {
                warn!("extraction queue closed before pod {pod_name} could be enqueued");
            }
        }
        if close {
            self.close_queue();
        }
    }

    /// Force a pod through extraction when the driver judges it terminal,
    /// whether or not all of its containers were observed terminating.
    pub async fn complete(&self, pod_name: &str) {
        let (enqueue, close) = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            let Some(remaining) = state.remaining.remove(pod_name) else {
                return;
            };
            state.required.remove(pod_name);

            let mut enqueue = None;
            if !remaining.is_empty() {
                let mut stranded: Vec<&String> = remaining.iter().collect();
                stranded.sort();
                // notifications for these containers were lost upstream
                warn!(
                    "pod {pod_name} completed while still waiting for containers {stranded:?}, forcing extraction"
                );
                match &state.queue {
                    Some(queue) => enqueue = Some(queue.clone()),
                    None => warn!("extraction queue already closed, dropping pod {pod_name}"),
                }
            }
            (enqueue, state.remaining.is_empty())
        };

        if let Some(queue) = enqueue {
            if queue.send(pod_name.to_string()).await.is_err() {
                warn!("extraction queue closed before pod {pod_name} could be enqueued");
            }
        }
        if close {
            self.close_queue();
        }
    }

    /// Best-effort abort: ask every registered sidecar to exit. Returns
    /// immediately; removals run as fire-and-forget tasks.
    pub fn cancel(&self) {
        let pods: Vec<String> = {
            let state = self.state.lock().unwrap();
            state.has_artifacts.iter().cloned().collect()
        };
        for pod_name in pods {
            let platform = Arc::clone(&self.ctx.platform);
            tokio::spawn(async move {
                if let Err(err) =
                    sidecar::remove_done_sentinel(platform.as_ref(), &pod_name).await
                {
                    warn!("failed to remove the rendezvous sentinel in pod {pod_name}: {err}");
                }
            });
        }
    }

    /// Completion signal for a pod. Reads `true` once extraction has
    /// finished; unknown pods read `true` immediately.
    pub fn done(&self, pod_name: &str) -> watch::Receiver<bool> {
        self.state
            .lock()
            .unwrap()
            .done
            .get(pod_name)
            .map_or_else(completed_signal, watch::Sender::subscribe)
    }

    fn close_queue(&self) {
        // dropping the sender closes the queue; take() makes this once-only
        let sender = self.state.lock().unwrap().queue.take();
        drop(sender);
    }

    async fn run_extractor(self: Arc<Self>, mut queue: mpsc::Receiver<String>) {
        while let Some(pod_name) = queue.recv().await {
            let has_artifacts = self
                .state
                .lock()
                .unwrap()
                .has_artifacts
                .contains(&pod_name);
            if let Err(err) = self.download_artifacts(&pod_name, has_artifacts).await {
                error!("failed to extract artifacts from pod {pod_name}: {err}");
            }
            // local filesystem writes are flushed before anyone waiting on
            // the pod is released
            let mut guard = self.state.lock().unwrap();
            guard.has_artifacts.remove(&pod_name);
            guard.completed.insert(pod_name.clone());
            if let Some(done) = guard.done.remove(&pod_name) {
                done.send_replace(true);
            }
        }
        debug!("extraction queue closed, extractor exiting");
    }

    async fn download_artifacts(&self, pod_name: &str, has_artifacts: bool) -> Result<()> {
        let platform = self.ctx.platform.as_ref();

        let logs_dir = self.artifact_dir.join(CONTAINER_LOGS_DIR);
        tokio::fs::create_dir_all(&logs_dir).await?;
        if let Err(err) = logs::gather_container_logs(platform, pod_name, &logs_dir).await {
            warn!("failed to gather container logs for pod {pod_name}: {err}");
        }

        if !has_artifacts {
            // this pod contributed logs only
            return Ok(());
        }

        let worker_config = &self.ctx.config.worker;
        let extraction: Result<()> = async {
            sidecar::wait_for_sidecar(
                platform,
                pod_name,
                Duration::from_secs(worker_config.readiness_timeout_seconds),
                Duration::from_secs(worker_config.readiness_poll_seconds),
            )
            .await?;
            remote::copy_from_container(
                platform,
                pod_name,
                sidecar::SIDECAR_CONTAINER_NAME,
                &[sidecar::ARTIFACTS_MOUNT_PATH],
                &self.artifact_dir,
            )
            .await?;
            Ok(())
        }
        .await;

        // the rendezvous runs on every exit path so the sidecar never
        // outlives a failed extraction
        sidecar::signal_done(platform, pod_name).await;
        extraction
    }

    #[cfg(test)]
    fn remaining_containers(&self, pod_name: &str) -> Option<Vec<String>> {
        self.state.lock().unwrap().remaining.get(pod_name).map(|set| {
            let mut names: Vec<String> = set.iter().cloned().collect();
            names.sort();
            names
        })
    }

    #[cfg(test)]
    fn required_containers(&self, pod_name: &str) -> Option<Vec<String>> {
        self.state.lock().unwrap().required.get(pod_name).map(|set| {
            let mut names: Vec<String> = set.iter().cloned().collect();
            names.sort();
            names
        })
    }
}

#[async_trait]
impl ContainerNotifier for ArtifactWorker {
    async fn notify(&self, pod: &Pod, container_name: &str) {
        ArtifactWorker::notify(self, pod, container_name).await;
    }

    async fn complete(&self, pod_name: &str) {
        ArtifactWorker::complete(self, pod_name).await;
    }

    fn done(&self, pod_name: &str) -> watch::Receiver<bool> {
        ArtifactWorker::done(self, pod_name)
    }

    fn cancel(&self) {
        ArtifactWorker::cancel(self);
    }
}

fn pod_has_failed_container(pod: &Pod) -> bool {
    let status = pod.status.as_ref();
    status
        .and_then(|status| status.init_container_statuses.as_ref())
        .into_iter()
        .flatten()
        .chain(
            status
                .and_then(|status| status.container_statuses.as_ref())
                .into_iter()
                .flatten(),
        )
        .any(|container| {
            container
                .state
                .as_ref()
                .and_then(|state| state.terminated.as_ref())
                .is_some_and(|terminated| terminated.exit_code != 0)
        })
}
