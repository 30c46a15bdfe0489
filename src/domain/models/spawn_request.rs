//! SpawnRequest domain model.
//!
//! Queued approval record produced by the recursion validator when a cell's
//! spawn policy requires human consent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cell::CellSpec;
use super::custom_resource;
use super::meta::{validate_label, ObjectMeta, ResourceKind};

/// Desired state: the spawn the requestor wants approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequestSpec {
    /// Name the child cell would get.
    pub name: String,
    pub namespace: String,
    pub requestor_cell_id: String,
    pub requested_spec: CellSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SpawnRequestSpec {
    pub fn validate(&self) -> Result<(), String> {
        validate_label(&self.name)?;
        validate_label(&self.namespace)?;
        validate_label(&self.requestor_cell_id)?;
        self.requested_spec.validate()
    }
}

/// Approval workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpawnDecision {
    Pending,
    Approved,
    Rejected,
}

impl Default for SpawnDecision {
    fn default() -> Self {
        Self::Pending
    }
}

impl SpawnDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Observed state: the decision, once made.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpawnRequestStatus {
    pub decision: SpawnDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// The SpawnRequest resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub meta: ObjectMeta,
    pub spec: SpawnRequestSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpawnRequestStatus>,
}

custom_resource!(SpawnRequest, SpawnRequestSpec, SpawnRequestStatus, ResourceKind::SpawnRequest);

impl SpawnRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: SpawnRequestSpec) -> Self {
        Self { meta: ObjectMeta::new(namespace, name), spec, status: None }
    }

    pub fn decision(&self) -> SpawnDecision {
        self.status.as_ref().map_or(SpawnDecision::Pending, |s| s.decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::cell::{CellResources, MindSpec, RecursionSpec};

    fn sample_spec() -> SpawnRequestSpec {
        SpawnRequestSpec {
            name: "child-1".to_string(),
            namespace: "default".to_string(),
            requestor_cell_id: "parent".to_string(),
            requested_spec: CellSpec {
                mind: MindSpec {
                    provider: "anthropic".to_string(),
                    model: "claude-haiku".to_string(),
                    system_prompt: String::new(),
                    temperature: None,
                    max_tokens: None,
                    memory_window: None,
                },
                tools: vec![],
                resources: CellResources::default(),
                parent_ref: Some("parent".to_string()),
                formation_ref: None,
                recursion: RecursionSpec::default(),
            },
            reason: Some("needs a researcher".to_string()),
        }
    }

    #[test]
    fn test_defaults_to_pending() {
        let request = SpawnRequest::new("default", "req-1", sample_spec());
        assert_eq!(request.decision(), SpawnDecision::Pending);
        assert!(!request.decision().is_decided());
    }

    #[test]
    fn test_validation() {
        assert!(sample_spec().validate().is_ok());
        let mut spec = sample_spec();
        spec.name = "Bad.Name".to_string();
        assert!(spec.validate().is_err());
    }
}
