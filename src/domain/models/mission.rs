//! Mission domain model.
//!
//! A Mission is an objective evaluated by completion checks against a
//! Formation or a single Cell, driven to a terminal outcome by the mission
//! reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::custom_resource;
use super::duration::parse_duration;
use super::meta::{validate_label, ObjectMeta, ResourceKind};

/// Numeric comparison operator for coverage checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }

    pub fn compare(&self, left: f64, right: f64) -> bool {
        match self {
            Self::Gte => left >= right,
            Self::Lte => left <= right,
            Self::Eq => (left - right).abs() < f64::EPSILON,
            Self::Gt => left > right,
            Self::Lt => left < right,
        }
    }
}

/// A single completion check, dispatched by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CheckSpec {
    /// All paths (relative to the workspace) must exist.
    #[serde(rename = "fileExists")]
    FileExists { name: String, paths: Vec<String> },

    /// Run a shell command in the workspace; exit code and output patterns
    /// decide the outcome.
    #[serde(rename = "command")]
    Command {
        name: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success_pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fail_pattern: Option<String>,
    },

    /// Run a command expected to emit JSON; extract a value by dotted path
    /// and compare numerically.
    #[serde(rename = "coverage")]
    Coverage {
        name: String,
        command: String,
        json_path: String,
        op: CompareOp,
        value: f64,
    },

    /// Wait for a bus message on a subject and pattern-match its content.
    #[serde(rename = "busResponse", alias = "natsResponse")]
    BusResponse {
        name: String,
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success_pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fail_pattern: Option<String>,
        #[serde(default = "default_bus_timeout")]
        timeout_seconds: u64,
    },
}

fn default_bus_timeout() -> u64 {
    30
}

impl CheckSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::FileExists { name, .. }
            | Self::Command { name, .. }
            | Self::Coverage { name, .. }
            | Self::BusResponse { name, .. } => name,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name().trim().is_empty() {
            return Err("check name must not be empty".to_string());
        }
        match self {
            Self::FileExists { paths, .. } if paths.is_empty() => {
                Err(format!("check '{}' lists no paths", self.name()))
            }
            Self::Command { command, .. } | Self::Coverage { command, .. }
                if command.trim().is_empty() =>
            {
                Err(format!("check '{}' has an empty command", self.name()))
            }
            Self::Coverage { json_path, .. } if json_path.trim().is_empty() => {
                Err(format!("check '{}' has an empty json path", self.name()))
            }
            Self::BusResponse { subject, timeout_seconds, .. } => {
                if subject.trim().is_empty() {
                    return Err(format!("check '{}' has an empty subject", self.name()));
                }
                if *timeout_seconds == 0 {
                    return Err(format!("check '{}' timeout must be positive", self.name()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Outcome of one check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Passed,
    Failed,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::Error => "Error",
        }
    }
}

/// Result of one check run, persisted for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Optional human review gate applied after all checks pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReviewSpec {
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewers: Option<Vec<String>>,
}

/// Completion criteria for a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSpec {
    pub checks: Vec<CheckSpec>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Duration string: `30m`, `1h30m`, `90s`.
    pub timeout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewSpec>,
}

fn default_max_attempts() -> u32 {
    1
}

/// The first message enqueued when a mission starts an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrypoint {
    pub cell: String,
    pub message: String,
}

/// Desired state of a Mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formation_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_ref: Option<String>,
    pub objective: String,
    pub completion: CompletionSpec,
    pub entrypoint: Entrypoint,
    /// Absolute cost cap for this mission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
}

impl MissionSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.formation_ref.is_none() && self.cell_ref.is_none() {
            return Err("mission requires at least one of formationRef or cellRef".to_string());
        }
        if let Some(f) = &self.formation_ref {
            validate_label(f)?;
        }
        if let Some(c) = &self.cell_ref {
            validate_label(c)?;
        }
        if self.objective.trim().is_empty() {
            return Err("mission objective must not be empty".to_string());
        }
        if self.completion.max_attempts == 0 {
            return Err("completion.maxAttempts must be at least 1".to_string());
        }
        parse_duration(&self.completion.timeout)?;
        for check in &self.completion.checks {
            check.validate()?;
        }
        validate_label(&self.entrypoint.cell)?;
        if let Some(budget) = self.budget {
            if budget <= 0.0 {
                return Err("mission budget must be positive".to_string());
            }
        }
        Ok(())
    }

    /// Parsed attempt timeout. Validation guarantees this succeeds for
    /// admitted specs.
    pub fn attempt_timeout(&self) -> Result<std::time::Duration, String> {
        parse_duration(&self.completion.timeout)
    }

    pub fn review_required(&self) -> bool {
        self.completion.review.as_ref().is_some_and(|r| r.required)
    }
}

/// Mission lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissionPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl Default for MissionPhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl MissionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Valid transitions, table-driven.
    pub fn valid_transitions(&self) -> &'static [MissionPhase] {
        match self {
            Self::Pending => &[Self::Running],
            Self::Running => &[Self::Pending, Self::Succeeded, Self::Failed],
            Self::Succeeded | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: MissionPhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Human review decision state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewDecision {
    Pending,
    Approved,
    Rejected,
}

/// Review record attached to a running mission once checks pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub decision: ReviewDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

/// History entry for a finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub reason: String,
}

/// Observed state of a Mission.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MissionStatus {
    pub phase: MissionPhase,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub checks: Vec<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewRecord>,
    #[serde(default)]
    pub history: Vec<AttemptRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The Mission resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub meta: ObjectMeta,
    pub spec: MissionSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MissionStatus>,
}

custom_resource!(Mission, MissionSpec, MissionStatus, ResourceKind::Mission);

impl Mission {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: MissionSpec) -> Self {
        Self { meta: ObjectMeta::new(namespace, name), spec, status: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> MissionSpec {
        MissionSpec {
            formation_ref: None,
            cell_ref: Some("worker-0".to_string()),
            objective: "produce a result".to_string(),
            completion: CompletionSpec {
                checks: vec![CheckSpec::Command {
                    name: "echo".to_string(),
                    command: "echo ok".to_string(),
                    success_pattern: Some("ok".to_string()),
                    fail_pattern: None,
                }],
                max_attempts: 2,
                timeout: "30m".to_string(),
                review: None,
            },
            entrypoint: Entrypoint {
                cell: "worker-0".to_string(),
                message: "go".to_string(),
            },
            budget: Some(5.0),
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(sample_spec().validate().is_ok());
    }

    #[test]
    fn test_requires_target_ref() {
        let mut spec = sample_spec();
        spec.cell_ref = None;
        spec.formation_ref = None;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_timeout() {
        let mut spec = sample_spec();
        spec.completion.timeout = "10d".to_string();
        assert!(spec.validate().is_err());
        spec.completion.timeout = "0h".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut spec = sample_spec();
        spec.completion.max_attempts = 0;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_phase_machine() {
        assert!(MissionPhase::Pending.can_transition_to(MissionPhase::Running));
        assert!(MissionPhase::Running.can_transition_to(MissionPhase::Pending));
        assert!(MissionPhase::Running.can_transition_to(MissionPhase::Succeeded));
        assert!(MissionPhase::Running.can_transition_to(MissionPhase::Failed));
        assert!(!MissionPhase::Pending.can_transition_to(MissionPhase::Succeeded));
        assert!(!MissionPhase::Succeeded.can_transition_to(MissionPhase::Running));
        assert!(!MissionPhase::Failed.can_transition_to(MissionPhase::Pending));
    }

    #[test]
    fn test_check_spec_tag_names() {
        let json = serde_json::to_value(CheckSpec::FileExists {
            name: "files".to_string(),
            paths: vec!["out.txt".to_string()],
        })
        .unwrap();
        assert_eq!(json["type"], "fileExists");

        // natsResponse is accepted as an alias for busResponse.
        let parsed: CheckSpec = serde_json::from_value(serde_json::json!({
            "type": "natsResponse",
            "name": "reply",
            "subject": "cell.default.a.outbox",
            "timeout_seconds": 5
        }))
        .unwrap();
        assert!(matches!(parsed, CheckSpec::BusResponse { .. }));
    }

    #[test]
    fn test_compare_ops() {
        assert!(CompareOp::Gte.compare(80.0, 80.0));
        assert!(CompareOp::Gt.compare(81.0, 80.0));
        assert!(!CompareOp::Gt.compare(80.0, 80.0));
        assert!(CompareOp::Lte.compare(79.5, 80.0));
        assert!(CompareOp::Eq.compare(80.0, 80.0));
        assert!(CompareOp::Lt.compare(1.0, 2.0));
    }
}
