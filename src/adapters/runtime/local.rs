//! In-process workload runtime.
//!
//! Tracks workload state in memory; the cell agent loop itself is an
//! external collaborator, so this runtime only models lifecycle, cost and
//! token accounting the way the controllers observe it. Tests drive phase
//! transitions explicitly.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::errors::ControlResult;
use crate::domain::models::workload::{WorkloadPhase, WorkloadSpec, WorkloadState};
use crate::domain::ports::workload_runtime::WorkloadRuntime;

#[derive(Default)]
pub struct LocalWorkloadRuntime {
    workloads: RwLock<HashMap<(String, String), WorkloadState>>,
}

impl LocalWorkloadRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive a workload to a phase; used by tests and the local agent shim.
    pub async fn set_phase(&self, namespace: &str, name: &str, phase: WorkloadPhase) -> bool {
        let mut workloads = self.workloads.write().await;
        match workloads.get_mut(&(namespace.to_string(), name.to_string())) {
            Some(state) => {
                state.phase = phase;
                if phase == WorkloadPhase::Running && state.started_at.is_none() {
                    state.started_at = Some(Utc::now());
                }
                true
            }
            None => false,
        }
    }

    /// Accumulate cost/token counters on a running workload.
    pub async fn add_usage(&self, namespace: &str, name: &str, cost: f64, tokens: u64) -> bool {
        let mut workloads = self.workloads.write().await;
        match workloads.get_mut(&(namespace.to_string(), name.to_string())) {
            Some(state) => {
                state.total_cost += cost;
                state.total_tokens += tokens;
                true
            }
            None => false,
        }
    }

    pub async fn count(&self) -> usize {
        self.workloads.read().await.len()
    }
}

#[async_trait]
impl WorkloadRuntime for LocalWorkloadRuntime {
    async fn create(&self, spec: &WorkloadSpec) -> ControlResult<()> {
        let key = (spec.namespace.clone(), spec.name.clone());
        let mut workloads = self.workloads.write().await;
        // Duplicate create is a success by contract.
        workloads.entry(key).or_insert_with(|| WorkloadState {
            spec: spec.clone(),
            phase: WorkloadPhase::Pending,
            total_cost: 0.0,
            total_tokens: 0,
            started_at: None,
        });
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> ControlResult<Option<WorkloadState>> {
        let workloads = self.workloads.read().await;
        Ok(workloads.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn delete(&self, namespace: &str, name: &str) -> ControlResult<()> {
        let mut workloads = self.workloads.write().await;
        workloads.remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> ControlResult<Vec<WorkloadState>> {
        let workloads = self.workloads.read().await;
        Ok(workloads
            .values()
            .filter(|state| state.spec.namespace == namespace)
            .filter(|state| {
                selector
                    .iter()
                    .all(|(k, v)| state.spec.labels.get(k).is_some_and(|lv| lv == v))
            })
            .cloned()
            .collect())
    }
}
