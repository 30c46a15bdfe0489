//! Secondary collective resources: Channel, Swarm, Federation,
//! KnowledgeGraph, plus the RBAC and Blueprint kinds.
//!
//! These share one simple lifecycle (validate, then Running) and exist so
//! the watch/reconcile machinery covers every declared kind.

use serde::{Deserialize, Serialize};

use super::custom_resource;
use super::meta::{validate_label, ObjectMeta, ResourceKind};

/// Shared phase for the simple lifecycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimplePhase {
    Pending,
    Running,
    Failed,
}

impl Default for SimplePhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl SimplePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Failed => "Failed",
        }
    }
}

/// Shared status for the simple lifecycles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimpleStatus {
    pub phase: SimplePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A broadcast channel cells may join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChannelSpec {
    pub fn validate(&self) -> Result<(), String> {
        for member in &self.members {
            validate_label(member)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub meta: ObjectMeta,
    pub spec: ChannelSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SimpleStatus>,
}

custom_resource!(Channel, ChannelSpec, SimpleStatus, ResourceKind::Channel);

/// A loose collection of formations working one problem space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmSpec {
    #[serde(default)]
    pub formations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_cells: Option<u32>,
}

impl SwarmSpec {
    pub fn validate(&self) -> Result<(), String> {
        for formation in &self.formations {
            validate_label(formation)?;
        }
        if let Some(0) = self.max_total_cells {
            return Err("maxTotalCells must be positive when set".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swarm {
    pub meta: ObjectMeta,
    pub spec: SwarmSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SimpleStatus>,
}

custom_resource!(Swarm, SwarmSpec, SimpleStatus, ResourceKind::Swarm);

/// A trust link to a remote swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationSpec {
    pub peer_url: String,
    #[serde(default)]
    pub shared_channels: Vec<String>,
}

impl FederationSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.peer_url.trim().is_empty() {
            return Err("peerUrl must not be empty".to_string());
        }
        for channel in &self.shared_channels {
            validate_label(channel)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Federation {
    pub meta: ObjectMeta,
    pub spec: FederationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SimpleStatus>,
}

custom_resource!(Federation, FederationSpec, SimpleStatus, ResourceKind::Federation);

/// A shared knowledge graph store declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraphSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub writers: Vec<String>,
    #[serde(default)]
    pub readers: Vec<String>,
}

impl KnowledgeGraphSpec {
    pub fn validate(&self) -> Result<(), String> {
        for cell in self.writers.iter().chain(self.readers.iter()) {
            validate_label(cell)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub meta: ObjectMeta,
    pub spec: KnowledgeGraphSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SimpleStatus>,
}

custom_resource!(KnowledgeGraph, KnowledgeGraphSpec, SimpleStatus, ResourceKind::KnowledgeGraph);

/// A named permission set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub rules: Vec<RoleRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRule {
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
}

impl RoleSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.rules.is_empty() {
            return Err("role must declare at least one rule".to_string());
        }
        for rule in &self.rules {
            if rule.resources.is_empty() || rule.verbs.is_empty() {
                return Err("role rules need resources and verbs".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub meta: ObjectMeta,
    pub spec: RoleSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SimpleStatus>,
}

custom_resource!(Role, RoleSpec, SimpleStatus, ResourceKind::Role);

/// Binds subjects to a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleBindingSpec {
    pub role: String,
    pub subjects: Vec<String>,
}

impl RoleBindingSpec {
    pub fn validate(&self) -> Result<(), String> {
        validate_label(&self.role)?;
        if self.subjects.is_empty() {
            return Err("role binding needs at least one subject".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub meta: ObjectMeta,
    pub spec: RoleBindingSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SimpleStatus>,
}

custom_resource!(RoleBinding, RoleBindingSpec, SimpleStatus, ResourceKind::RoleBinding);

/// A reusable cell template for blueprint-only spawning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintSpec {
    pub cell: super::cell::CellSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BlueprintSpec {
    pub fn validate(&self) -> Result<(), String> {
        self.cell.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub meta: ObjectMeta,
    pub spec: BlueprintSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SimpleStatus>,
}

custom_resource!(Blueprint, BlueprintSpec, SimpleStatus, ResourceKind::Blueprint);
