//! Workload runtime port.
//!
//! The isolation primitive behind a workload (container, process,
//! co-routine) is the adapter's choice; controllers only rely on this
//! surface.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::errors::ControlResult;
use crate::domain::models::workload::{WorkloadSpec, WorkloadState};

/// Runs and observes workloads.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    /// Create a workload. Creating a workload that already exists is a
    /// success (reconcilers must be retry-safe).
    async fn create(&self, spec: &WorkloadSpec) -> ControlResult<()>;

    async fn get(&self, namespace: &str, name: &str) -> ControlResult<Option<WorkloadState>>;

    /// Delete a workload; deleting a missing workload is a success.
    async fn delete(&self, namespace: &str, name: &str) -> ControlResult<()>;

    /// Workloads in a namespace whose labels match the selector.
    async fn list(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> ControlResult<Vec<WorkloadState>>;
}
