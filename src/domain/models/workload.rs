//! Workload specification and observed state.
//!
//! A workload is the running process backing one Cell. The concrete
//! isolation primitive is the runtime adapter's concern; this model only
//! fixes the deterministic shape the builder produces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::meta::OwnerReference;

/// Environment variable name carrying the embedded cell spec JSON, used by
/// the spec-change detector.
pub const CELL_SPEC_ENV: &str = "CELL_SPEC_JSON";

/// Fixed mount path of the shared formation workspace.
pub const SHARED_WORKSPACE_PATH: &str = "/workspace/shared";

/// Mount path prefix of a cell's private workspace slice.
pub const PRIVATE_WORKSPACE_PREFIX: &str = "/workspace/private";

/// Fixed read-only path of the materialised topology route table.
pub const ROUTE_TABLE_PATH: &str = "/etc/cellplane/routes.json";

/// A volume mounted into the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// Requested and maximum compute for the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub request_memory: String,
    pub request_cpu: String,
    pub limit_memory: String,
    pub limit_cpu: String,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            request_memory: "128Mi".to_string(),
            request_cpu: "100m".to_string(),
            limit_memory: "256Mi".to_string(),
            limit_cpu: "500m".to_string(),
        }
    }
}

/// Restart behaviour. The controller, not the runtime, is the authority for
/// restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    Never,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::Never
    }
}

/// Deterministic workload specification produced by the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// `cell-<cellName>`.
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub owner: OwnerReference,
    /// Sorted map so serialisation is byte-stable.
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

impl WorkloadSpec {
    /// The embedded cell spec JSON, when present.
    pub fn embedded_spec(&self) -> Option<&str> {
        self.env.get(CELL_SPEC_ENV).map(String::as_str)
    }
}

/// Observed workload phase reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Completed,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }

    /// Phases that require the controller to tear the workload down.
    pub fn needs_replacement(&self) -> bool {
        matches!(self, Self::Failed | Self::Unknown)
    }
}

/// Runtime-observed state of one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadState {
    pub spec: WorkloadSpec,
    pub phase: WorkloadPhase,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}
