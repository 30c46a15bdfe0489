//! Cell domain model.
//!
//! A Cell is the unit of agent execution: a declarative resource backed by a
//! workload that consumes its inbox subject on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::custom_resource;
use super::meta::{is_valid_label, validate_label, ObjectMeta, ResourceKind};

/// Provider + model + prompt configuration for a cell's mind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindSpec {
    /// Provider tag, e.g. `anthropic`, `openai`, `local`.
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_window: Option<MemoryWindow>,
}

/// Working-memory window sizes for the cell runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryWindow {
    pub short_term: u32,
    pub long_term: u32,
}

/// A tool grant with optional provider-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// Per-cell resource caps and scheduling hints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CellResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_turn: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_hour: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Who may spawn through this cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnPolicy {
    /// Spawns allowed within the numeric limits.
    Open,
    /// Every spawn queues a SpawnRequest for human consent.
    ApprovalRequired,
    /// Only spawns instantiated from a Blueprint are allowed.
    BlueprintOnly,
    /// No spawning at all.
    Disabled,
}

impl Default for SpawnPolicy {
    fn default() -> Self {
        Self::Open
    }
}

impl SpawnPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::ApprovalRequired => "approval_required",
            Self::BlueprintOnly => "blueprint_only",
            Self::Disabled => "disabled",
        }
    }
}

/// Recursion limits evaluated on every spawn request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecursionSpec {
    pub max_depth: u32,
    pub max_descendants: u32,
    #[serde(default)]
    pub spawn_policy: SpawnPolicy,
}

impl Default for RecursionSpec {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_descendants: 10,
            spawn_policy: SpawnPolicy::default(),
        }
    }
}

/// Desired state of a Cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSpec {
    pub mind: MindSpec,
    #[serde(default)]
    pub tools: Vec<ToolRef>,
    #[serde(default)]
    pub resources: CellResources,
    /// Name of the parent cell, for topology and ownership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<String>,
    /// Name of the owning formation, when part of one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formation_ref: Option<String>,
    #[serde(default)]
    pub recursion: RecursionSpec,
}

impl CellSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.mind.provider.trim().is_empty() {
            return Err("mind.provider must not be empty".to_string());
        }
        if self.mind.model.trim().is_empty() {
            return Err("mind.model must not be empty".to_string());
        }
        if let Some(t) = self.mind.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(format!("mind.temperature {} out of range [0, 2]", t));
            }
        }
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err("tool name must not be empty".to_string());
            }
        }
        if let Some(parent) = &self.parent_ref {
            validate_label(parent)?;
        }
        if let Some(formation) = &self.formation_ref {
            validate_label(formation)?;
        }
        if self.recursion.max_depth == 0 {
            return Err("recursion.max_depth must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Observed lifecycle phase of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellPhase {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl Default for CellPhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl CellPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Paused => "Paused",
        }
    }

    /// Terminal phases are sticky for a given attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Observed state of a Cell, written only by the cell reconciler.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CellStatus {
    pub phase: CellPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The Cell resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub meta: ObjectMeta,
    pub spec: CellSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CellStatus>,
}

custom_resource!(Cell, CellSpec, CellStatus, ResourceKind::Cell);

impl Cell {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: CellSpec) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec,
            status: None,
        }
    }

    /// The subject this cell consumes.
    pub fn inbox_subject(&self) -> String {
        format!("cell.{}.{}.inbox", self.meta.namespace, self.meta.name)
    }

    /// The subject this cell publishes replies to.
    pub fn outbox_subject(&self) -> String {
        format!("cell.{}.{}.outbox", self.meta.namespace, self.meta.name)
    }

    /// Lifecycle and cost events for this cell.
    pub fn events_subject(&self) -> String {
        format!("cell.events.{}.{}", self.meta.namespace, self.meta.name)
    }
}

impl CellStatus {
    pub fn with_phase(phase: CellPhase) -> Self {
        Self { phase, ..Default::default() }
    }
}

/// Whether a cell name is usable in subjects and filesystem paths.
pub fn validate_cell_name(name: &str) -> Result<(), String> {
    if !is_valid_label(name) {
        return Err(format!("'{}' is not a valid cell name (RFC 1123 label)", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> CellSpec {
        CellSpec {
            mind: MindSpec {
                provider: "anthropic".to_string(),
                model: "claude-sonnet".to_string(),
                system_prompt: "reply ok".to_string(),
                temperature: Some(0.7),
                max_tokens: Some(4096),
                memory_window: None,
            },
            tools: vec![ToolRef { name: "shell".to_string(), config: None }],
            resources: CellResources::default(),
            parent_ref: None,
            formation_ref: None,
            recursion: RecursionSpec::default(),
        }
    }

    #[test]
    fn test_valid_spec_passes_admission() {
        assert!(sample_spec().validate().is_ok());
    }

    #[test]
    fn test_empty_model_rejected() {
        let mut spec = sample_spec();
        spec.mind.model = String::new();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_temperature_out_of_range_rejected() {
        let mut spec = sample_spec();
        spec.mind.temperature = Some(3.5);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_bad_formation_ref_rejected() {
        let mut spec = sample_spec();
        spec.formation_ref = Some("Not-Valid".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_subjects() {
        let cell = Cell::new("default", "worker-0", sample_spec());
        assert_eq!(cell.inbox_subject(), "cell.default.worker-0.inbox");
        assert_eq!(cell.outbox_subject(), "cell.default.worker-0.outbox");
        assert_eq!(cell.events_subject(), "cell.events.default.worker-0");
    }

    #[test]
    fn test_terminal_phases() {
        assert!(CellPhase::Completed.is_terminal());
        assert!(CellPhase::Failed.is_terminal());
        assert!(!CellPhase::Running.is_terminal());
        assert!(!CellPhase::Paused.is_terminal());
    }

    #[test]
    fn test_spec_json_round_trip() {
        let spec = sample_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back: CellSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
