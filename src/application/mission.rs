//! Mission reconciler.
//!
//! Drives a Mission through Pending -> Running -> {Succeeded, Failed} with
//! retries, timeout and budget enforcement, completion checks and the
//! optional human review gate. Every prior attempt is recorded in the
//! status history.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::cell::Cell;
use crate::domain::models::envelope::{Envelope, MessageType};
use crate::domain::models::formation::Formation;
use crate::domain::models::meta::ResourceKind;
use crate::domain::models::mission::{
    AttemptRecord, CheckStatus, Mission, MissionPhase, MissionStatus, ReviewDecision,
    ReviewRecord,
};
use crate::domain::models::CustomResource;
use crate::domain::ports::event_recorder::{EventKind, ObjectRef};
use crate::domain::ports::resource_store::{get_typed, update_status_typed};

use super::worker::Reconciler;
use super::ControllerContext;

pub struct MissionReconciler {
    ctx: Arc<ControllerContext>,
}

impl MissionReconciler {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    fn object_ref(mission: &Mission) -> ObjectRef {
        ObjectRef::new(ResourceKind::Mission, &mission.meta)
    }

    async fn emit(
        &self,
        mission: &Mission,
        kind: EventKind,
        reason: &str,
        message: &str,
    ) -> ControlResult<()> {
        self.ctx
            .events
            .emit(Self::object_ref(mission), kind, reason, message)
            .await
    }

    /// Workspace the completion checks run against.
    fn workspace(&self, mission: &Mission) -> PathBuf {
        let root = PathBuf::from(&self.ctx.config.workspace_root).join(&mission.meta.namespace);
        match (&mission.spec.formation_ref, &mission.spec.cell_ref) {
            (Some(formation), _) => root.join(formation),
            (None, Some(cell)) => root.join(cell),
            (None, None) => root.join(&mission.meta.name),
        }
    }

    /// Cost observed on the mission's target.
    async fn observed_cost(&self, mission: &Mission) -> ControlResult<f64> {
        if let Some(formation_name) = &mission.spec.formation_ref {
            let formation: Option<Formation> =
                get_typed(self.ctx.store.as_ref(), &mission.meta.namespace, formation_name)
                    .await?;
            return Ok(formation
                .and_then(|f| f.status.map(|s| s.total_cost))
                .unwrap_or(0.0));
        }
        if let Some(cell_name) = &mission.spec.cell_ref {
            let cell: Option<Cell> =
                get_typed(self.ctx.store.as_ref(), &mission.meta.namespace, cell_name).await?;
            return Ok(cell.and_then(|c| c.status.map(|s| s.total_cost)).unwrap_or(0.0));
        }
        Ok(0.0)
    }

    async fn send_entrypoint(&self, mission: &Mission) -> ControlResult<()> {
        let subject = format!(
            "cell.{}.{}.inbox",
            mission.meta.namespace, mission.spec.entrypoint.cell
        );
        let envelope = Envelope::new(
            format!("mission.{}", mission.meta.name),
            mission.spec.entrypoint.cell.clone(),
            MessageType::Message,
            serde_json::json!({
                "content": mission.spec.entrypoint.message,
                "objective": mission.spec.objective,
            }),
        )
        .with_reply_to(format!(
            "cell.{}.{}.outbox",
            mission.meta.namespace, mission.spec.entrypoint.cell
        ));
        self.ctx.bus.publish(&subject, &envelope).await
    }

    async fn write_status_if_changed(
        &self,
        mission: &Mission,
        status: MissionStatus,
    ) -> ControlResult<()> {
        if mission.status.as_ref() == Some(&status) {
            return Ok(());
        }
        update_status_typed(self.ctx.store.as_ref(), mission, &status).await?;
        Ok(())
    }

    async fn handle_invalid(&self, mission: &Mission, reason: String) -> ControlResult<()> {
        self.emit(mission, EventKind::Warning, "ValidationFailed", &reason).await?;
        let mut status = mission.status.clone().unwrap_or_default();
        status.phase = MissionPhase::Failed;
        status.message = Some(reason);
        self.write_status_if_changed(mission, status).await
    }

    /// Pending: send the entrypoint message and start the next attempt.
    async fn start_attempt(&self, mission: &Mission) -> ControlResult<()> {
        self.send_entrypoint(mission).await?;

        let mut status = mission.status.clone().unwrap_or_default();
        status.attempt += 1;
        status.phase = MissionPhase::Running;
        status.started_at = Some(Utc::now());
        status.checks = Vec::new();
        status.review = None;
        status.message = None;

        let attempt = status.attempt;
        self.write_status_if_changed(mission, status).await?;
        self.emit(
            mission,
            EventKind::Normal,
            "MissionStarted",
            &format!("attempt {} started", attempt),
        )
        .await
    }

    /// Running: enforce budget and timeout, then evaluate checks and the
    /// review gate.
    async fn advance_running(
        &self,
        mission: &Mission,
        cancel: &CancellationToken,
    ) -> ControlResult<()> {
        let mut status = mission.status.clone().unwrap_or_default();
        let started_at = match status.started_at {
            Some(t) => t,
            // Defensive: a Running mission always has a start time; repair
            // rather than wedge.
            None => {
                status.started_at = Some(Utc::now());
                return self.write_status_if_changed(mission, status).await;
            }
        };
        let now = Utc::now();
        let attempt = status.attempt;
        let max_attempts = mission.spec.completion.max_attempts;

        // Budget gate.
        status.cost = self.observed_cost(mission).await?;
        if let Some(budget) = mission.spec.budget {
            if status.cost >= budget {
                let message = format!(
                    "budget exceeded: cost {:.4} >= cap {:.4}",
                    status.cost, budget
                );
                status.phase = MissionPhase::Failed;
                status.message = Some(message.clone());
                status.history.push(AttemptRecord {
                    attempt,
                    started_at,
                    ended_at: now,
                    reason: message.clone(),
                });
                self.write_status_if_changed(mission, status).await?;
                return self.emit(mission, EventKind::Warning, "MissionFailed", &message).await;
            }
        }

        // Timeout gate.
        let timeout = mission
            .spec
            .attempt_timeout()
            .map_err(ControlError::Validation)?;
        let elapsed = now.signed_duration_since(started_at);
        if elapsed.num_milliseconds() >= 0 && elapsed.num_milliseconds() as u128 >= timeout.as_millis()
        {
            status.history.push(AttemptRecord {
                attempt,
                started_at,
                ended_at: now,
                reason: format!("attempt {} timed out", attempt),
            });
            if attempt < max_attempts {
                status.phase = MissionPhase::Pending;
                status.started_at = None;
                status.review = None;
                self.write_status_if_changed(mission, status).await?;
                return self
                    .emit(
                        mission,
                        EventKind::Warning,
                        "MissionTimeout",
                        &format!("attempt {} of {} timed out; retrying", attempt, max_attempts),
                    )
                    .await;
            }
            let message = "timed out after max attempts".to_string();
            status.phase = MissionPhase::Failed;
            status.message = Some(message.clone());
            self.write_status_if_changed(mission, status).await?;
            self.emit(mission, EventKind::Warning, "MissionTimeout", &message).await?;
            return self.emit(mission, EventKind::Warning, "MissionFailed", &message).await;
        }

        if cancel.is_cancelled() {
            return Err(ControlError::Transient("reconcile cancelled".to_string()));
        }

        // Checks, in declared order; all results persist for observability.
        let workspace = self.workspace(mission);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| ControlError::Transient(format!("workspace create failed: {}", e)))?;
        let results = self
            .ctx
            .checks
            .run_all(&workspace, &mission.spec.completion.checks, started_at)
            .await;
        let all_passed = results.iter().all(|r| r.status == CheckStatus::Passed);
        status.checks = results;

        if !all_passed {
            return self.write_status_if_changed(mission, status).await;
        }

        if !mission.spec.review_required() {
            status.phase = MissionPhase::Succeeded;
            status.history.push(AttemptRecord {
                attempt,
                started_at,
                ended_at: now,
                reason: "all checks passed".to_string(),
            });
            self.write_status_if_changed(mission, status).await?;
            return self
                .emit(mission, EventKind::Normal, "MissionCompleted", "all checks passed")
                .await;
        }

        match status.review.as_ref().map(|r| r.decision) {
            None => {
                status.review = Some(ReviewRecord {
                    decision: ReviewDecision::Pending,
                    reviewer: None,
                    comment: None,
                    requested_at: now,
                    decided_at: None,
                });
                self.write_status_if_changed(mission, status).await?;
                self.emit(
                    mission,
                    EventKind::Normal,
                    "MissionReviewRequested",
                    "all checks passed; awaiting review",
                )
                .await
            }
            Some(ReviewDecision::Pending) => {
                // Still waiting on a human.
                self.write_status_if_changed(mission, status).await
            }
            Some(ReviewDecision::Approved) => {
                status.phase = MissionPhase::Succeeded;
                status.history.push(AttemptRecord {
                    attempt,
                    started_at,
                    ended_at: now,
                    reason: "review approved".to_string(),
                });
                self.write_status_if_changed(mission, status).await?;
                self.emit(mission, EventKind::Normal, "MissionCompleted", "review approved")
                    .await
            }
            Some(ReviewDecision::Rejected) => {
                status.history.push(AttemptRecord {
                    attempt,
                    started_at,
                    ended_at: now,
                    reason: "review rejected".to_string(),
                });
                if attempt < max_attempts {
                    // Clears the review only; check history stays in the
                    // attempt record.
                    status.phase = MissionPhase::Pending;
                    status.started_at = None;
                    status.review = None;
                    self.write_status_if_changed(mission, status).await?;
                    self.emit(
                        mission,
                        EventKind::Normal,
                        "MissionRetry",
                        &format!("review rejected; retrying ({}/{})", attempt, max_attempts),
                    )
                    .await
                } else {
                    let message = "review rejected after max attempts".to_string();
                    status.phase = MissionPhase::Failed;
                    status.message = Some(message.clone());
                    self.write_status_if_changed(mission, status).await?;
                    self.emit(mission, EventKind::Warning, "MissionFailed", &message).await
                }
            }
        }
    }
}

#[async_trait]
impl Reconciler for MissionReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Mission
    }

    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> ControlResult<()> {
        let Some(mission) = get_typed::<Mission>(self.ctx.store.as_ref(), namespace, name).await?
        else {
            return Ok(());
        };

        if let Err(reason) = mission.validate() {
            // Terminal phases stay terminal even for late-detected issues.
            if mission
                .status
                .as_ref()
                .is_some_and(|s| s.phase.is_terminal())
            {
                return Ok(());
            }
            return self.handle_invalid(&mission, reason).await;
        }

        let phase = mission.status.as_ref().map_or(MissionPhase::Pending, |s| s.phase);
        match phase {
            MissionPhase::Pending => self.start_attempt(&mission).await,
            MissionPhase::Running => self.advance_running(&mission, cancel).await,
            MissionPhase::Succeeded | MissionPhase::Failed => Ok(()),
        }
    }
}
