//! Spawn request approval workflow.
//!
//! SpawnRequests queue under `approval_required`; approval materialises the
//! child Cell and places it in the cell tree, rejection just records the
//! decision. Both paths audit.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::cell::Cell;
use crate::domain::models::meta::ObjectMeta;
use crate::domain::models::spawn_request::{
    SpawnDecision, SpawnRequest, SpawnRequestStatus,
};
use crate::domain::ports::audit_log::{AuditEntry, AuditLog, AuditOutcome};
use crate::domain::ports::cell_tree::CellTreeStore;
use crate::domain::ports::resource_store::{
    create_typed, get_typed, list_typed, update_status_typed, ResourceStore,
};

pub struct SpawnRequestService {
    store: Arc<dyn ResourceStore>,
    tree: Arc<dyn CellTreeStore>,
    audit: Arc<dyn AuditLog>,
}

impl SpawnRequestService {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        tree: Arc<dyn CellTreeStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self { store, tree, audit }
    }

    /// All requests still awaiting a decision.
    pub async fn list_pending(&self, namespace: &str) -> ControlResult<Vec<SpawnRequest>> {
        let requests: Vec<SpawnRequest> =
            list_typed(self.store.as_ref(), Some(namespace), &Default::default()).await?;
        Ok(requests
            .into_iter()
            .filter(|r| r.decision() == SpawnDecision::Pending)
            .collect())
    }

    /// Approve a queued request: records the decision, creates the child
    /// Cell and inserts it under the requestor in the cell tree.
    pub async fn approve(
        &self,
        namespace: &str,
        request_name: &str,
        approver: &str,
        comment: Option<String>,
    ) -> ControlResult<Cell> {
        let request = self.fetch_pending(namespace, request_name).await?;

        let decided = update_status_typed(
            self.store.as_ref(),
            &request,
            &SpawnRequestStatus {
                decision: SpawnDecision::Approved,
                decided_by: Some(approver.to_string()),
                decided_at: Some(Utc::now()),
                comment,
            },
        )
        .await?;

        let mut spec = decided.spec.requested_spec.clone();
        spec.parent_ref = Some(decided.spec.requestor_cell_id.clone());
        let cell = Cell {
            meta: ObjectMeta::new(namespace, decided.spec.name.clone()),
            spec,
            status: None,
        };
        let cell = create_typed(self.store.as_ref(), &cell).await?;
        self.tree
            .insert(&cell.meta.name, Some(&decided.spec.requestor_cell_id))
            .await?;

        self.audit
            .record(
                AuditEntry::new(approver, "spawn_approve", "SpawnRequest", namespace, AuditOutcome::Success)
                    .with_resource_id(request_name)
                    .with_detail(format!("created cell '{}'", cell.meta.name)),
            )
            .await?;

        tracing::info!(request = request_name, cell = %cell.meta.name, approver, "spawn approved");
        Ok(cell)
    }

    /// Reject a queued request. No Cell is created.
    pub async fn reject(
        &self,
        namespace: &str,
        request_name: &str,
        approver: &str,
        comment: Option<String>,
    ) -> ControlResult<()> {
        let request = self.fetch_pending(namespace, request_name).await?;

        update_status_typed(
            self.store.as_ref(),
            &request,
            &SpawnRequestStatus {
                decision: SpawnDecision::Rejected,
                decided_by: Some(approver.to_string()),
                decided_at: Some(Utc::now()),
                comment,
            },
        )
        .await?;

        self.audit
            .record(
                AuditEntry::new(approver, "spawn_reject", "SpawnRequest", namespace, AuditOutcome::Success)
                    .with_resource_id(request_name),
            )
            .await?;

        tracing::info!(request = request_name, approver, "spawn rejected");
        Ok(())
    }

    async fn fetch_pending(&self, namespace: &str, name: &str) -> ControlResult<SpawnRequest> {
        let request: SpawnRequest = get_typed(self.store.as_ref(), namespace, name)
            .await?
            .ok_or_else(|| ControlError::not_found("SpawnRequest", name))?;
        if request.decision().is_decided() {
            return Err(ControlError::Validation(format!(
                "spawn request '{}' is already {}",
                name,
                request.decision().as_str()
            )));
        }
        Ok(request)
    }
}
