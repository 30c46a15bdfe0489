//! Experiment reconciler.
//!
//! Expands the variable matrix into a run queue, launches runs as
//! Formation+Mission pairs under a parallelism cap, enforces the aggregate
//! budget, and finishes with a statistical analysis over the harvested
//! metrics. Run queues live in process memory keyed by experiment uid; a
//! queue lost to a restart degrades gracefully into analysis of whatever
//! was persisted.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::experiment::{
    Experiment, ExperimentPhase, ExperimentStatus, MetricSpec, RunPhase, RunSpec, RunStatus,
};
use crate::domain::models::formation::{Formation, FormationSpec};
use crate::domain::models::meta::{ObjectMeta, OwnerReference, ResourceKind};
use crate::domain::models::mission::{Mission, MissionPhase, MissionSpec, MissionStatus};
use crate::domain::models::CustomResource;
use crate::domain::ports::event_recorder::{EventKind, ObjectRef};
use crate::domain::ports::resource_store::{
    create_typed, get_typed, update_status_typed,
};

use super::worker::Reconciler;
use super::ControllerContext;

pub struct ExperimentReconciler {
    ctx: Arc<ControllerContext>,
    queues: std::sync::Mutex<HashMap<Uuid, VecDeque<RunSpec>>>,
}

impl ExperimentReconciler {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self {
            ctx,
            queues: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn object_ref(experiment: &Experiment) -> ObjectRef {
        ObjectRef::new(ResourceKind::Experiment, &experiment.meta)
    }

    async fn emit(
        &self,
        experiment: &Experiment,
        kind: EventKind,
        reason: &str,
        message: &str,
    ) -> ControlResult<()> {
        self.ctx
            .events
            .emit(Self::object_ref(experiment), kind, reason, message)
            .await
    }

    async fn write_status_if_changed(
        &self,
        experiment: &Experiment,
        status: ExperimentStatus,
    ) -> ControlResult<()> {
        if experiment.status.as_ref() == Some(&status) {
            return Ok(());
        }
        update_status_typed(self.ctx.store.as_ref(), experiment, &status).await?;
        Ok(())
    }

    fn take_queue(&self, uid: Uuid) -> Option<VecDeque<RunSpec>> {
        self.queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&uid)
    }

    fn store_queue(&self, uid: Uuid, queue: VecDeque<RunSpec>) {
        self.queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(uid, queue);
    }

    /// Pending: expand the matrix, project the cost, queue or refuse.
    async fn plan(&self, experiment: &Experiment) -> ControlResult<()> {
        let runs = experiment.spec.expand_runs();
        let estimate = experiment.spec.estimated_cost();
        let budget = &experiment.spec.budget;

        if estimate > budget.max_total_cost && budget.abort_on_over_budget {
            let suggestions = vec![
                format!(
                    "reduce repeats to {} or fewer",
                    ((budget.max_total_cost / budget.est_cost_per_run) as u32
                        / (runs.len() as u32 / experiment.spec.repeats).max(1))
                    .max(1)
                ),
                "drop a variable or trim its values".to_string(),
                format!(
                    "raise budget.maxTotalCost above {:.2}",
                    estimate
                ),
            ];
            let message = format!(
                "estimated cost {:.2} exceeds budget {:.2}",
                estimate, budget.max_total_cost
            );
            let status = ExperimentStatus {
                phase: ExperimentPhase::Failed,
                total_runs: runs.len() as u32,
                completed_runs: 0,
                total_cost: 0.0,
                runs: Vec::new(),
                analysis: None,
                suggestions,
                message: Some(message.clone()),
            };
            self.write_status_if_changed(experiment, status).await?;
            return self
                .emit(experiment, EventKind::Warning, "ExperimentOverBudget", &message)
                .await;
        }

        let projected: Vec<RunStatus> = runs
            .iter()
            .map(|run| RunStatus {
                index: run.index,
                variant_key: run.variant_key.clone(),
                repeat: run.repeat,
                phase: RunPhase::Queued,
                cost: 0.0,
                metrics: BTreeMap::new(),
                mission: None,
                formation: None,
            })
            .collect();

        let total = runs.len() as u32;
        self.store_queue(experiment.meta.uid, runs.into());

        let status = ExperimentStatus {
            phase: ExperimentPhase::Running,
            total_runs: total,
            completed_runs: 0,
            total_cost: 0.0,
            runs: projected,
            analysis: None,
            suggestions: Vec::new(),
            message: None,
        };
        self.write_status_if_changed(experiment, status).await?;
        self.emit(
            experiment,
            EventKind::Normal,
            "ExperimentStarted",
            &format!("{} runs queued (estimated cost {:.2})", total, estimate),
        )
        .await
    }

    /// Launch one queued run as a Formation+Mission pair.
    async fn launch_run(&self, experiment: &Experiment, run: &RunSpec) -> ControlResult<(String, String)> {
        let formation_name = format!("{}-run-{}", experiment.meta.name, run.index);
        let mission_name = format!("{}-run-{}-mission", experiment.meta.name, run.index);
        let namespace = &experiment.meta.namespace;
        let owner = OwnerReference {
            kind: ResourceKind::Experiment,
            name: experiment.meta.name.clone(),
            uid: experiment.meta.uid,
        };

        let formation_spec: FormationSpec =
            apply_variables(&experiment.spec.template, &run.assignments)?;
        if get_typed::<Formation>(self.ctx.store.as_ref(), namespace, &formation_name)
            .await?
            .is_none()
        {
            let formation = Formation {
                meta: ObjectMeta::new(namespace.clone(), formation_name.clone()).with_owner(owner.clone()),
                spec: formation_spec,
                status: None,
            };
            create_typed(self.ctx.store.as_ref(), &formation).await?;
        }

        let mut mission_spec: MissionSpec =
            apply_variables(&experiment.spec.mission, &run.assignments)?;
        mission_spec.formation_ref = Some(formation_name.clone());
        mission_spec.cell_ref = None;
        if get_typed::<Mission>(self.ctx.store.as_ref(), namespace, &mission_name)
            .await?
            .is_none()
        {
            let mission = Mission {
                meta: ObjectMeta::new(namespace.clone(), mission_name.clone()).with_owner(owner),
                spec: mission_spec,
                status: None,
            };
            create_typed(self.ctx.store.as_ref(), &mission).await?;
        }

        Ok((formation_name, mission_name))
    }

    /// Refresh a launched run from its Mission's status.
    async fn poll_run(&self, namespace: &str, run: &mut RunStatus, metrics: &[MetricSpec]) -> ControlResult<()> {
        let Some(mission_name) = run.mission.clone() else {
            return Ok(());
        };
        let mission: Option<Mission> =
            get_typed(self.ctx.store.as_ref(), namespace, &mission_name).await?;
        let Some(status) = mission.and_then(|m| m.status) else {
            return Ok(());
        };

        run.cost = status.cost;
        match status.phase {
            MissionPhase::Succeeded => {
                run.phase = RunPhase::Completed;
                run.metrics = harvest_metrics(&status, metrics);
            }
            MissionPhase::Failed => {
                run.phase = RunPhase::Failed;
                run.metrics = harvest_metrics(&status, metrics);
            }
            MissionPhase::Pending | MissionPhase::Running => {}
        }
        Ok(())
    }

    /// Running: poll launched runs, enforce the budget, top up parallelism.
    async fn advance_running(
        &self,
        experiment: &Experiment,
        cancel: &CancellationToken,
    ) -> ControlResult<()> {
        let mut status = experiment.status.clone().unwrap_or_default();
        let namespace = &experiment.meta.namespace;

        let mut queue = match self.take_queue(experiment.meta.uid) {
            Some(queue) => queue,
            None => {
                let queued_left = status.runs.iter().any(|r| r.phase == RunPhase::Queued);
                if queued_left {
                    // The in-memory queue did not survive a restart; analyse
                    // whatever finished rather than re-deriving half-run
                    // state.
                    for run in status
                        .runs
                        .iter_mut()
                        .filter(|r| r.phase == RunPhase::Queued)
                    {
                        run.phase = RunPhase::Aborted;
                    }
                    status.phase = ExperimentPhase::Analyzing;
                    status.message =
                        Some("run queue lost; analyzing persisted results".to_string());
                    self.write_status_if_changed(experiment, status).await?;
                    return Ok(());
                }
                VecDeque::new()
            }
        };

        for run in status.runs.iter_mut().filter(|r| r.phase == RunPhase::Running) {
            self.poll_run(namespace, run, &experiment.spec.metrics).await?;
        }

        status.total_cost = status.runs.iter().map(|r| r.cost).sum();
        status.completed_runs = status
            .runs
            .iter()
            .filter(|r| r.phase.is_terminal())
            .count() as u32;

        // Aggregate budget gate: abort everything still queued.
        if status.total_cost >= experiment.spec.budget.max_total_cost {
            for run in status.runs.iter_mut().filter(|r| r.phase == RunPhase::Queued) {
                run.phase = RunPhase::Aborted;
            }
            queue.clear();
            status.phase = ExperimentPhase::Analyzing;
            let message = format!(
                "cumulative cost {:.2} reached budget {:.2}; aborting remaining runs",
                status.total_cost, experiment.spec.budget.max_total_cost
            );
            status.message = Some(message.clone());
            self.write_status_if_changed(experiment, status).await?;
            return self
                .emit(experiment, EventKind::Warning, "ExperimentOverBudget", &message)
                .await;
        }

        if cancel.is_cancelled() {
            self.store_queue(experiment.meta.uid, queue);
            return Err(ControlError::Transient("reconcile cancelled".to_string()));
        }

        // Launch up to the parallel cap.
        let mut running = status
            .runs
            .iter()
            .filter(|r| r.phase == RunPhase::Running)
            .count() as u32;
        while running < experiment.spec.parallel {
            let Some(run) = queue.pop_front() else {
                break;
            };
            let (formation_name, mission_name) = self.launch_run(experiment, &run).await?;
            if let Some(projected) = status.runs.iter_mut().find(|r| r.index == run.index) {
                projected.phase = RunPhase::Running;
                projected.formation = Some(formation_name);
                projected.mission = Some(mission_name);
            }
            running += 1;
        }

        let drained = queue.is_empty();
        self.store_queue(experiment.meta.uid, queue);

        if drained && status.runs.iter().all(|r| r.phase.is_terminal()) {
            status.phase = ExperimentPhase::Analyzing;
        }
        self.write_status_if_changed(experiment, status).await
    }

    /// Analyzing: aggregate metrics, compute the Pareto front, finish.
    async fn analyze(&self, experiment: &Experiment) -> ControlResult<()> {
        let mut status = experiment.status.clone().unwrap_or_default();
        status.analysis = Some(crate::services::analysis::analyze_runs(
            &status.runs,
            &experiment.spec.metrics,
        ));
        let aborted = status.runs.iter().any(|r| r.phase == RunPhase::Aborted);
        status.phase = if aborted { ExperimentPhase::Aborted } else { ExperimentPhase::Completed };
        self.write_status_if_changed(experiment, status.clone()).await?;

        let (reason, message) = if aborted {
            ("ExperimentAborted", "analysis complete over partial results")
        } else {
            ("ExperimentCompleted", "analysis complete")
        };
        self.emit(experiment, EventKind::Normal, reason, message).await
    }

    async fn handle_invalid(&self, experiment: &Experiment, reason: String) -> ControlResult<()> {
        self.emit(experiment, EventKind::Warning, "ValidationFailed", &reason).await?;
        let mut status = experiment.status.clone().unwrap_or_default();
        status.phase = ExperimentPhase::Failed;
        status.message = Some(reason);
        self.write_status_if_changed(experiment, status).await
    }
}

#[async_trait]
impl Reconciler for ExperimentReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Experiment
    }

    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> ControlResult<()> {
        let Some(experiment) =
            get_typed::<Experiment>(self.ctx.store.as_ref(), namespace, name).await?
        else {
            // Child formations and missions cascade via owner references;
            // any orphaned in-memory queue is reaped with the process.
            return Ok(());
        };

        if let Err(reason) = experiment.validate() {
            if experiment
                .status
                .as_ref()
                .is_some_and(|s| s.phase.is_terminal())
            {
                return Ok(());
            }
            return self.handle_invalid(&experiment, reason).await;
        }

        let phase = experiment
            .status
            .as_ref()
            .map_or(ExperimentPhase::Pending, |s| s.phase);
        match phase {
            ExperimentPhase::Pending => self.plan(&experiment).await,
            ExperimentPhase::Running => self.advance_running(&experiment, cancel).await,
            ExperimentPhase::Analyzing => self.analyze(&experiment).await,
            ExperimentPhase::Completed | ExperimentPhase::Failed | ExperimentPhase::Aborted => {
                Ok(())
            }
        }
    }
}

/// Substitute `{{variable}}` placeholders through every string field of a
/// spec. Values render as-is for strings and as JSON otherwise.
fn apply_variables<T>(
    template: &T,
    assignments: &BTreeMap<String, serde_json::Value>,
) -> ControlResult<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut value = serde_json::to_value(template)?;
    substitute(&mut value, assignments);
    Ok(serde_json::from_value(value)?)
}

fn substitute(value: &mut serde_json::Value, assignments: &BTreeMap<String, serde_json::Value>) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("{{") {
                let mut rendered = s.clone();
                for (name, replacement) in assignments {
                    let needle = format!("{{{{{}}}}}", name);
                    if !rendered.contains(&needle) {
                        continue;
                    }
                    let replacement = match replacement {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    rendered = rendered.replace(&needle, &replacement);
                }
                *s = rendered;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                substitute(item, assignments);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                substitute(item, assignments);
            }
        }
        _ => {}
    }
}

/// Pull metric samples out of a finished mission.
///
/// Recognised sources: `cost`, `duration` (seconds of the final attempt),
/// `success` (0/1), `attempts`. Metrics with other names yield no sample.
fn harvest_metrics(status: &MissionStatus, metrics: &[MetricSpec]) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for metric in metrics {
        let value = match metric.name.as_str() {
            "cost" => Some(status.cost),
            "duration" => status.history.last().map(|attempt| {
                (attempt.ended_at - attempt.started_at).num_milliseconds() as f64 / 1000.0
            }),
            "success" => Some(if status.phase == MissionPhase::Succeeded { 1.0 } else { 0.0 }),
            "attempts" => Some(f64::from(status.attempt)),
            _ => None,
        };
        if let Some(value) = value {
            out.insert(metric.name.clone(), value);
        }
    }
    out
}
