//! Formation domain model.
//!
//! A Formation is a named group of Cells with a declared topology and a
//! shared workspace. The materialised route table is a pure function of the
//! spec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::cell::CellSpec;
use super::custom_resource;
use super::meta::{validate_label, ObjectMeta, ResourceKind};

/// Template expanded into `name-0 .. name-(replicas-1)` concrete cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellTemplate {
    pub name: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    pub spec: CellSpec,
}

fn default_replicas() -> u32 {
    1
}

impl CellTemplate {
    /// Concrete cell names this template expands to.
    pub fn expanded_names(&self) -> Vec<String> {
        (0..self.replicas).map(|i| format!("{}-{}", self.name, i)).collect()
    }
}

/// Topology kinds a formation may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    FullMesh,
    Hierarchy,
    Star,
    Ring,
    Custom,
    Stigmergy,
}

impl TopologyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullMesh => "full_mesh",
            Self::Hierarchy => "hierarchy",
            Self::Star => "star",
            Self::Ring => "ring",
            Self::Custom => "custom",
            Self::Stigmergy => "stigmergy",
        }
    }
}

/// An explicit route between template (or concrete cell) names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub from: String,
    pub to: String,
}

/// Declared communication topology, constrained by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    pub kind: TopologyKind,
    /// Root template name; required for `hierarchy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Hub template name; required for `star`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,
    /// Explicit routes; required for `custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<Route>>,
    /// Whether broadcast to all peers is allowed in addition to routes.
    #[serde(default)]
    pub broadcast: bool,
    /// Shared blackboard name; required for `stigmergy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blackboard: Option<String>,
}

impl TopologySpec {
    /// Admission validation of kind/discriminator pairing.
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            TopologyKind::Hierarchy if self.root.is_none() => {
                Err("hierarchy topology requires 'root'".to_string())
            }
            TopologyKind::Star if self.hub.is_none() => {
                Err("star topology requires 'hub'".to_string())
            }
            TopologyKind::Custom if self.routes.as_ref().is_none_or(|r| r.is_empty()) => {
                Err("custom topology requires at least one route".to_string())
            }
            TopologyKind::Stigmergy if self.blackboard.is_none() => {
                Err("stigmergy topology requires 'blackboard'".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Aggregate budget caps and per-template allocation hints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormationBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_cost: Option<f64>,
    /// Allocation hints keyed by template name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocations: BTreeMap<String, f64>,
}

/// Desired state of a Formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationSpec {
    pub cells: Vec<CellTemplate>,
    pub topology: TopologySpec,
    #[serde(default)]
    pub budget: FormationBudget,
}

impl FormationSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.cells.is_empty() {
            return Err("formation must declare at least one cell template".to_string());
        }
        let mut seen = std::collections::BTreeSet::new();
        for template in &self.cells {
            validate_label(&template.name)?;
            if template.replicas == 0 {
                return Err(format!("template '{}' must have at least one replica", template.name));
            }
            if !seen.insert(&template.name) {
                return Err(format!("duplicate cell template name '{}'", template.name));
            }
            template.spec.validate()?;
        }
        self.topology.validate()?;
        if let Some(root) = &self.topology.root {
            if !seen.contains(root) {
                return Err(format!("topology root '{}' is not a declared template", root));
            }
        }
        if let Some(hub) = &self.topology.hub {
            if !seen.contains(hub) {
                return Err(format!("topology hub '{}' is not a declared template", hub));
            }
        }
        if let Some(cap) = self.budget.max_total_cost {
            if cap <= 0.0 {
                return Err("budget.max_total_cost must be positive".to_string());
            }
        }
        Ok(())
    }

    /// All concrete cell names the formation expands to, in template order.
    pub fn expanded_cell_names(&self) -> Vec<String> {
        self.cells.iter().flat_map(CellTemplate::expanded_names).collect()
    }
}

/// Observed lifecycle phase of a formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormationPhase {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl Default for FormationPhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl FormationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

/// Projection of a single member cell into formation status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub name: String,
    pub phase: String,
    #[serde(default)]
    pub cost: f64,
}

/// Observed state of a Formation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormationStatus {
    pub phase: FormationPhase,
    #[serde(default)]
    pub members: Vec<MemberStatus>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The Formation resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formation {
    pub meta: ObjectMeta,
    pub spec: FormationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FormationStatus>,
}

custom_resource!(Formation, FormationSpec, FormationStatus, ResourceKind::Formation);

impl Formation {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: FormationSpec) -> Self {
        Self { meta: ObjectMeta::new(namespace, name), spec, status: None }
    }
}
