#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Test-pod artifact and log collection
//!
//! This crate watches a population of test pods on the container platform,
//! detects when their workload containers have terminated, pulls the files
//! they published onto the orchestrator's filesystem, archives their logs,
//! and retires the per-pod artifacts sidecar through a file-presence
//! rendezvous.
//!
//! The scheduler registers pods through [`inspect::collect_pod_artifacts`]
//! and reports container terminations through the [`ContainerNotifier`]
//! contract; [`ArtifactWorker`] does the bookkeeping and runs extraction on
//! a single background task.

pub mod config;
pub mod inspect;
pub mod junit;
pub mod logs;
pub mod notifier;
pub mod platform;
pub mod remote;
pub mod sidecar;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use config::CollectorConfig;
pub use junit::{JunitNotifier, TestCase};
pub use notifier::{ContainerNotifier, NoOpNotifier};
pub use platform::{KubePlatform, PlatformClient};
pub use types::{Context, Error, Result};
pub use worker::ArtifactWorker;
