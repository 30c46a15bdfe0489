//! Application layer: the reconcilers and their worker harness.
//!
//! Reconcilers never call each other; all coupling goes through resources
//! in the store.

pub mod cell;
pub mod collective;
pub mod experiment;
pub mod formation;
pub mod mission;
pub mod worker;

use std::sync::Arc;

use crate::domain::models::config::Config;
use crate::domain::ports::audit_log::AuditLog;
use crate::domain::ports::budget_ledger::BudgetLedger;
use crate::domain::ports::cell_tree::CellTreeStore;
use crate::domain::ports::event_recorder::EventRecorder;
use crate::domain::ports::message_bus::MessageBus;
use crate::domain::ports::resource_store::ResourceStore;
use crate::domain::ports::workload_runtime::WorkloadRuntime;
use crate::services::checks::CheckRunner;
use crate::services::credential_service::CredentialService;
use crate::services::workload_builder::BuilderEndpoints;

pub use cell::CellReconciler;
pub use collective::SimpleReconciler;
pub use experiment::ExperimentReconciler;
pub use formation::FormationReconciler;
pub use mission::MissionReconciler;
pub use worker::{ControllerWorker, ObjectKey, Reconciler, WorkQueue};


/// Shared dependencies handed to every reconciler.
pub struct ControllerContext {
    pub store: Arc<dyn ResourceStore>,
    pub events: Arc<dyn EventRecorder>,
    pub runtime: Arc<dyn WorkloadRuntime>,
    pub bus: Arc<dyn MessageBus>,
    pub ledger: Arc<dyn BudgetLedger>,
    pub tree: Arc<dyn CellTreeStore>,
    pub audit: Arc<dyn AuditLog>,
    pub credentials: Arc<CredentialService>,
    pub checks: Arc<CheckRunner>,
    pub endpoints: BuilderEndpoints,
    pub config: Config,
}
