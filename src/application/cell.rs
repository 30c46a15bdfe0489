//! Cell reconciler.
//!
//! Ensures each Cell resource has a live workload matching its declaration
//! and projects the observed workload phase back into status. The
//! controller, not the runtime, is the authority for restarts: failed or
//! stale workloads are deleted and recreated on the next pass.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::cell::{Cell, CellPhase, CellStatus};
use crate::domain::models::formation::Formation;
use crate::domain::models::meta::ResourceKind;
use crate::domain::models::workload::{WorkloadPhase, WorkloadState};
use crate::domain::models::CustomResource;
use crate::domain::ports::event_recorder::{EventKind, ObjectRef};
use crate::domain::ports::resource_store::{get_typed, update_status_typed};
use crate::services::topology::{generate_routes, peers_of};
use crate::services::workload_builder::{build_workload, spec_changed, workload_name};

use super::worker::Reconciler;
use super::ControllerContext;

pub struct CellReconciler {
    ctx: Arc<ControllerContext>,
}

impl CellReconciler {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    fn object_ref(cell: &Cell) -> ObjectRef {
        ObjectRef::new(ResourceKind::Cell, &cell.meta)
    }

    /// Cell is gone: tear down the workload and revoke credentials.
    async fn finalize_deleted(&self, namespace: &str, name: &str) -> ControlResult<()> {
        self.ctx.runtime.delete(namespace, &workload_name(name)).await?;
        self.ctx.credentials.revoke(name).await?;
        // Leaf entries leave the tree; interior cells keep their record so
        // descendant placement stays meaningful until children are gone.
        if let Some(entry) = self.ctx.tree.get(name).await? {
            if self.ctx.tree.children(&entry.cell_id).await?.is_empty() {
                self.ctx.tree.remove(name).await?;
            }
        }
        Ok(())
    }

    async fn ensure_tree_entry(&self, cell: &Cell) -> ControlResult<()> {
        if self.ctx.tree.get(&cell.meta.name).await?.is_some() {
            return Ok(());
        }
        let parent = match &cell.spec.parent_ref {
            Some(parent) if self.ctx.tree.get(parent).await?.is_some() => Some(parent.as_str()),
            _ => None,
        };
        self.ctx.tree.insert(&cell.meta.name, parent).await?;
        Ok(())
    }

    async fn ensure_credentials(&self, cell: &Cell) -> ControlResult<()> {
        let peers = match &cell.spec.formation_ref {
            Some(formation_name) => {
                let formation: Option<Formation> = get_typed(
                    self.ctx.store.as_ref(),
                    &cell.meta.namespace,
                    formation_name,
                )
                .await?;
                formation
                    .map(|f| {
                        let routes = generate_routes(&f.spec);
                        peers_of(&routes, &cell.meta.name)
                            .into_iter()
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            }
            None => Vec::new(),
        };
        self.ctx
            .credentials
            .generate(&cell.meta.name, &cell.meta.namespace, &peers)
            .await?;
        Ok(())
    }

    /// Write status only when it differs from what is stored; unchanged
    /// phases produce no write at all.
    async fn write_status_if_changed(&self, cell: &Cell, status: CellStatus) -> ControlResult<()> {
        let unchanged = cell.status.as_ref().is_some_and(|current| {
            current.phase == status.phase
                && (current.total_cost - status.total_cost).abs() < f64::EPSILON
                && current.total_tokens == status.total_tokens
                && current.message == status.message
                && current.pod_name == status.pod_name
        });
        if unchanged {
            return Ok(());
        }
        update_status_typed(self.ctx.store.as_ref(), cell, &status).await?;
        Ok(())
    }

    async fn handle_invalid(&self, cell: &Cell, reason: String) -> ControlResult<()> {
        self.ctx
            .events
            .emit(
                Self::object_ref(cell),
                EventKind::Warning,
                "ValidationFailed",
                &reason,
            )
            .await?;
        let mut status = cell.status.clone().unwrap_or_default();
        status.phase = CellPhase::Failed;
        status.message = Some(reason);
        self.write_status_if_changed(cell, status).await
    }

    async fn sync_observed(&self, cell: &Cell, workload: &WorkloadState) -> ControlResult<()> {
        let phase = match workload.phase {
            WorkloadPhase::Pending => CellPhase::Pending,
            WorkloadPhase::Running => CellPhase::Running,
            WorkloadPhase::Completed => CellPhase::Completed,
            // Failed/Unknown are handled before this point.
            WorkloadPhase::Failed | WorkloadPhase::Unknown => CellPhase::Failed,
        };

        let current = cell.status.clone().unwrap_or_default();
        let counters_changed = (current.total_cost - workload.total_cost).abs() > f64::EPSILON
            || current.total_tokens != workload.total_tokens;

        let status = CellStatus {
            phase,
            pod_name: Some(workload.spec.name.clone()),
            total_cost: workload.total_cost,
            total_tokens: workload.total_tokens,
            last_active: if counters_changed { Some(Utc::now()) } else { current.last_active },
            message: None,
        };
        self.write_status_if_changed(cell, status).await
    }
}

#[async_trait]
impl Reconciler for CellReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Cell
    }

    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> ControlResult<()> {
        let Some(cell) = get_typed::<Cell>(self.ctx.store.as_ref(), namespace, name).await? else {
            return self.finalize_deleted(namespace, name).await;
        };

        if let Err(reason) = cell.validate() {
            return self.handle_invalid(&cell, reason).await;
        }

        self.ensure_tree_entry(&cell).await?;
        if !self.ctx.credentials.has_active(&cell.meta.name).await? {
            self.ensure_credentials(&cell).await?;
        }

        let workload = self
            .ctx
            .runtime
            .get(namespace, &workload_name(name))
            .await?;

        if cancel.is_cancelled() {
            return Err(ControlError::Transient("reconcile cancelled".to_string()));
        }

        match workload {
            None => {
                let spec = build_workload(&cell, &self.ctx.endpoints)?;
                // Already-exists is success inside the runtime adapter.
                self.ctx.runtime.create(&spec).await?;
                let mut status = cell.status.clone().unwrap_or_default();
                status.phase = CellPhase::Pending;
                status.pod_name = Some(spec.name.clone());
                status.message = None;
                self.write_status_if_changed(&cell, status).await?;
                self.ctx
                    .events
                    .emit(
                        Self::object_ref(&cell),
                        EventKind::Normal,
                        "CellCreated",
                        &format!("created workload {}", spec.name),
                    )
                    .await?;
                Ok(())
            }
            Some(state) if state.phase.needs_replacement() => {
                self.ctx.runtime.delete(namespace, &state.spec.name).await?;
                let mut status = cell.status.clone().unwrap_or_default();
                status.phase = CellPhase::Failed;
                status.message = Some(format!("workload phase {}", state.phase.as_str()));
                self.write_status_if_changed(&cell, status).await?;
                self.ctx
                    .events
                    .emit(
                        Self::object_ref(&cell),
                        EventKind::Warning,
                        "CellFailed",
                        &format!("workload {} in phase {}", state.spec.name, state.phase.as_str()),
                    )
                    .await?;
                // Next reconcile recreates.
                Ok(())
            }
            Some(state) if spec_changed(&state.spec, &cell.spec) => {
                self.ctx.runtime.delete(namespace, &state.spec.name).await?;
                self.ctx
                    .events
                    .emit(
                        Self::object_ref(&cell),
                        EventKind::Normal,
                        "SpecChanged",
                        "declaration changed; restarting workload",
                    )
                    .await?;
                Ok(())
            }
            Some(state) => self.sync_observed(&cell, &state).await,
        }
    }
}
