//! Experiment domain model.
//!
//! An Experiment expands a variable matrix × repeats into a queue of
//! Formation+Mission runs, enforces an aggregate budget, and ends with a
//! statistical analysis of the collected metrics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::custom_resource;
use super::formation::FormationSpec;
use super::meta::{ObjectMeta, ResourceKind};
use super::mission::MissionSpec;

/// One experiment variable and the values it sweeps over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub values: Vec<serde_json::Value>,
}

/// How a metric is aggregated across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Sum,
    Duration,
    Count,
    Mean,
    Max,
    Min,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Duration => "duration",
            Self::Count => "count",
            Self::Mean => "mean",
            Self::Max => "max",
            Self::Min => "min",
        }
    }
}

/// A metric harvested from each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Whether lower values are better, used by the Pareto front.
    #[serde(default)]
    pub minimize: bool,
}

/// Aggregate budget controls for the whole experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentBudget {
    pub max_total_cost: f64,
    #[serde(default)]
    pub abort_on_over_budget: bool,
    /// Cost estimate per run used for the admission-time projection.
    #[serde(default = "default_est_cost_per_run")]
    pub est_cost_per_run: f64,
}

fn default_est_cost_per_run() -> f64 {
    1.0
}

/// Desired state of an Experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub variables: Vec<Variable>,
    #[serde(default = "default_repeats")]
    pub repeats: u32,
    /// Formation template applied per variant.
    pub template: FormationSpec,
    /// Mission template applied per run.
    pub mission: MissionSpec,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    pub budget: ExperimentBudget,
    #[serde(default = "default_parallel")]
    pub parallel: u32,
}

fn default_repeats() -> u32 {
    1
}

fn default_parallel() -> u32 {
    1
}

impl ExperimentSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.repeats == 0 {
            return Err("repeats must be at least 1".to_string());
        }
        if self.parallel == 0 {
            return Err("parallel must be at least 1".to_string());
        }
        let mut seen = std::collections::BTreeSet::new();
        for variable in &self.variables {
            if variable.name.trim().is_empty() {
                return Err("variable name must not be empty".to_string());
            }
            if variable.values.is_empty() {
                return Err(format!("variable '{}' has no values", variable.name));
            }
            if !seen.insert(&variable.name) {
                return Err(format!("duplicate variable '{}'", variable.name));
            }
        }
        if self.budget.max_total_cost <= 0.0 {
            return Err("budget.maxTotalCost must be positive".to_string());
        }
        if self.budget.est_cost_per_run <= 0.0 {
            return Err("budget.estCostPerRun must be positive".to_string());
        }
        self.template.validate()?;
        self.mission.validate()?;
        Ok(())
    }

    /// Cartesian product of variable values × repeats, in declaration order.
    pub fn expand_runs(&self) -> Vec<RunSpec> {
        let mut variants: Vec<BTreeMap<String, serde_json::Value>> = vec![BTreeMap::new()];
        for variable in &self.variables {
            let mut next = Vec::with_capacity(variants.len() * variable.values.len());
            for assignment in &variants {
                for value in &variable.values {
                    let mut extended = assignment.clone();
                    extended.insert(variable.name.clone(), value.clone());
                    next.push(extended);
                }
            }
            variants = next;
        }

        let mut runs = Vec::with_capacity(variants.len() * self.repeats as usize);
        let mut index = 0u32;
        for assignment in variants {
            let variant_key = variant_key(&assignment);
            for repeat in 0..self.repeats {
                runs.push(RunSpec {
                    index,
                    variant_key: variant_key.clone(),
                    assignments: assignment.clone(),
                    repeat,
                });
                index += 1;
            }
        }
        runs
    }

    /// Projected total cost before any run starts.
    pub fn estimated_cost(&self) -> f64 {
        self.expand_runs().len() as f64 * self.budget.est_cost_per_run
    }
}

/// Stable key identifying a variant, e.g. `temp=0.2,model="a"`.
pub fn variant_key(assignment: &BTreeMap<String, serde_json::Value>) -> String {
    assignment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// One planned run of the experiment matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub index: u32,
    pub variant_key: String,
    pub assignments: BTreeMap<String, serde_json::Value>,
    pub repeat: u32,
}

/// Lifecycle of a single run, projected into experiment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Queued,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Aborted => "Aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

/// Status projection of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub index: u32,
    pub variant_key: String,
    pub repeat: u32,
    pub phase: RunPhase,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    /// Name of the Mission resource driving this run, once launched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission: Option<String>,
    /// Name of the Formation resource backing this run, once launched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formation: Option<String>,
}

/// Experiment lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentPhase {
    Pending,
    Running,
    Analyzing,
    Completed,
    Failed,
    Aborted,
}

impl Default for ExperimentPhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl ExperimentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Analyzing => "Analyzing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Aborted => "Aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

/// Per-metric summary over one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric: String,
    pub variant_key: String,
    pub samples: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

/// Final analysis attached when the experiment completes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Analysis {
    pub summaries: Vec<MetricSummary>,
    /// Variant keys on the Pareto front over the selected metrics.
    pub pareto_front: Vec<String>,
}

/// Observed state of an Experiment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperimentStatus {
    pub phase: ExperimentPhase,
    #[serde(default)]
    pub total_runs: u32,
    #[serde(default)]
    pub completed_runs: u32,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub runs: Vec<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The Experiment resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub meta: ObjectMeta,
    pub spec: ExperimentSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExperimentStatus>,
}

custom_resource!(Experiment, ExperimentSpec, ExperimentStatus, ResourceKind::Experiment);

impl Experiment {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ExperimentSpec) -> Self {
        Self { meta: ObjectMeta::new(namespace, name), spec, status: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_with(variables: Vec<Variable>, repeats: u32) -> ExperimentSpec {
        use crate::domain::models::cell::{CellSpec, MindSpec, RecursionSpec};
        use crate::domain::models::formation::{
            CellTemplate, FormationBudget, TopologyKind, TopologySpec,
        };
        use crate::domain::models::mission::{CompletionSpec, Entrypoint};

        let cell_spec = CellSpec {
            mind: MindSpec {
                provider: "anthropic".to_string(),
                model: "claude-sonnet".to_string(),
                system_prompt: String::new(),
                temperature: None,
                max_tokens: None,
                memory_window: None,
            },
            tools: vec![],
            resources: Default::default(),
            parent_ref: None,
            formation_ref: None,
            recursion: RecursionSpec::default(),
        };
        ExperimentSpec {
            variables,
            repeats,
            template: FormationSpec {
                cells: vec![CellTemplate { name: "w".to_string(), replicas: 1, spec: cell_spec }],
                topology: TopologySpec {
                    kind: TopologyKind::FullMesh,
                    root: None,
                    hub: None,
                    routes: None,
                    broadcast: false,
                    blackboard: None,
                },
                budget: FormationBudget::default(),
            },
            mission: MissionSpec {
                formation_ref: Some("placeholder".to_string()),
                cell_ref: None,
                objective: "solve".to_string(),
                completion: CompletionSpec {
                    checks: vec![],
                    max_attempts: 1,
                    timeout: "10m".to_string(),
                    review: None,
                },
                entrypoint: Entrypoint { cell: "w-0".to_string(), message: "go".to_string() },
                budget: None,
            },
            metrics: vec![MetricSpec {
                name: "cost".to_string(),
                metric_type: MetricType::Sum,
                minimize: true,
            }],
            budget: ExperimentBudget {
                max_total_cost: 100.0,
                abort_on_over_budget: true,
                est_cost_per_run: 1.0,
            },
            parallel: 2,
        }
    }

    #[test]
    fn test_matrix_expansion() {
        let spec = spec_with(
            vec![
                Variable { name: "temp".to_string(), values: vec![json!(0.2), json!(0.8)] },
                Variable { name: "model".to_string(), values: vec![json!("a"), json!("b"), json!("c")] },
            ],
            2,
        );
        let runs = spec.expand_runs();
        // 2 * 3 variants, 2 repeats each.
        assert_eq!(runs.len(), 12);
        // Indices are dense and unique.
        let mut indices: Vec<u32> = runs.iter().map(|r| r.index).collect();
        indices.dedup();
        assert_eq!(indices.len(), 12);
        // Variant key is stable and sorted by variable name.
        assert!(runs[0].variant_key.starts_with("model="));
    }

    #[test]
    fn test_no_variables_single_variant() {
        let spec = spec_with(vec![], 3);
        let runs = spec.expand_runs();
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r.variant_key.is_empty()));
    }

    #[test]
    fn test_estimated_cost() {
        let spec = spec_with(
            vec![Variable { name: "x".to_string(), values: vec![json!(1), json!(2)] }],
            5,
        );
        assert!((spec.estimated_cost() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validation() {
        let mut spec = spec_with(vec![], 1);
        assert!(spec.validate().is_ok());
        spec.repeats = 0;
        assert!(spec.validate().is_err());

        let mut spec = spec_with(
            vec![Variable { name: "x".to_string(), values: vec![] }],
            1,
        );
        assert!(spec.validate().is_err());
        spec.variables = vec![
            Variable { name: "x".to_string(), values: vec![json!(1)] },
            Variable { name: "x".to_string(), values: vec![json!(2)] },
        ];
        assert!(spec.validate().is_err());
    }
}
