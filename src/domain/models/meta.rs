//! Resource metadata shared by every declarative kind.
//!
//! All entities carry an [`ObjectMeta`] with a stable uid and a
//! monotonically-increasing resource_version; status updates are conditional
//! on the version to prevent lost updates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The custom kinds the control plane reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Cell,
    Formation,
    Mission,
    Experiment,
    SpawnRequest,
    Channel,
    Swarm,
    Federation,
    KnowledgeGraph,
    Role,
    RoleBinding,
    Blueprint,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cell => "Cell",
            Self::Formation => "Formation",
            Self::Mission => "Mission",
            Self::Experiment => "Experiment",
            Self::SpawnRequest => "SpawnRequest",
            Self::Channel => "Channel",
            Self::Swarm => "Swarm",
            Self::Federation => "Federation",
            Self::KnowledgeGraph => "KnowledgeGraph",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::Blueprint => "Blueprint",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Cell" | "cell" | "cells" => Some(Self::Cell),
            "Formation" | "formation" | "formations" => Some(Self::Formation),
            "Mission" | "mission" | "missions" => Some(Self::Mission),
            "Experiment" | "experiment" | "experiments" => Some(Self::Experiment),
            "SpawnRequest" | "spawnrequest" | "spawnrequests" => Some(Self::SpawnRequest),
            "Channel" | "channel" | "channels" => Some(Self::Channel),
            "Swarm" | "swarm" | "swarms" => Some(Self::Swarm),
            "Federation" | "federation" | "federations" => Some(Self::Federation),
            "KnowledgeGraph" | "knowledgegraph" | "knowledgegraphs" => Some(Self::KnowledgeGraph),
            "Role" | "role" | "roles" => Some(Self::Role),
            "RoleBinding" | "rolebinding" | "rolebindings" => Some(Self::RoleBinding),
            "Blueprint" | "blueprint" | "blueprints" => Some(Self::Blueprint),
            _ => None,
        }
    }

    pub fn all() -> &'static [ResourceKind] {
        &[
            Self::Cell,
            Self::Formation,
            Self::Mission,
            Self::Experiment,
            Self::SpawnRequest,
            Self::Channel,
            Self::Swarm,
            Self::Federation,
            Self::KnowledgeGraph,
            Self::Role,
            Self::RoleBinding,
            Self::Blueprint,
        ]
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single owner pointing at a resource's logical parent. Deletion cascades
/// are driven by the store through these references; cycles are rejected at
/// admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: ResourceKind,
    pub name: String,
    pub uid: Uuid,
}

/// Metadata carried by every resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: Uuid,
    /// Monotonically increasing per object; conditional updates compare it.
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_ref: Option<OwnerReference>,
    pub created_at: DateTime<Utc>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: Uuid::new_v4(),
            resource_version: 1,
            labels: BTreeMap::new(),
            owner_ref: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_ref = Some(owner);
        self
    }

    /// Whether every selector pair is present in this object's labels.
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|lv| lv == v))
    }
}

/// Maximum length of an RFC 1123 label.
pub const MAX_LABEL_LEN: usize = 63;

/// Validate a name against the RFC 1123 label grammar:
/// `^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$`.
///
/// Applied to every identifier derived from external input before it enters
/// a bus subject or a filesystem path.
pub fn validate_label(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.len() > MAX_LABEL_LEN {
        return Err(format!(
            "name '{}' exceeds {} characters",
            name, MAX_LABEL_LEN
        ));
    }
    let bytes = name.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return Err(format!(
            "name '{}' must start and end with a lowercase letter or digit",
            name
        ));
    }
    if let Some(bad) = bytes.iter().find(|&&b| !is_alnum(b) && b != b'-') {
        return Err(format!(
            "name '{}' contains invalid character '{}'",
            name, *bad as char
        ));
    }
    Ok(())
}

/// `true` when `name` is a valid RFC 1123 label.
pub fn is_valid_label(name: &str) -> bool {
    validate_label(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_valid_labels() {
        for name in ["a", "a-0", "a-b-c-9", "cell-12", "x0"] {
            assert!(is_valid_label(name), "{name} should be accepted");
        }
        // 63 characters is the boundary.
        let max = "a".repeat(63);
        assert!(is_valid_label(&max));
    }

    #[test]
    fn test_rejects_invalid_labels() {
        for name in ["", "-a", "a-", "Upper", "has.dot", "has/slash", "a_b", "é"] {
            assert!(!is_valid_label(name), "{name} should be rejected");
        }
        let too_long = "a".repeat(64);
        assert!(!is_valid_label(&too_long));
    }

    #[test]
    fn test_label_selector_matching() {
        let mut labels = BTreeMap::new();
        labels.insert("role".to_string(), "cell".to_string());
        labels.insert("formation".to_string(), "f1".to_string());
        let meta = ObjectMeta::new("default", "c1").with_labels(labels);

        let mut selector = BTreeMap::new();
        assert!(meta.matches_labels(&selector));
        selector.insert("role".to_string(), "cell".to_string());
        assert!(meta.matches_labels(&selector));
        selector.insert("formation".to_string(), "other".to_string());
        assert!(!meta.matches_labels(&selector));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in ResourceKind::all() {
            assert_eq!(ResourceKind::from_str(kind.as_str()), Some(*kind));
        }
        assert_eq!(ResourceKind::from_str("cells"), Some(ResourceKind::Cell));
        assert_eq!(ResourceKind::from_str("bogus"), None);
    }
}
