//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use cellplane::adapters::bus::{GuardedBus, InMemoryBus};
use cellplane::adapters::runtime::LocalWorkloadRuntime;
use cellplane::adapters::sqlite::{
    migrated_test_pool, SqliteAuditLog, SqliteBudgetLedger, SqliteCellTree,
    SqliteCredentialStore, SqliteEventRecorder, SqliteResourceStore,
};
use cellplane::application::ControllerContext;
use cellplane::domain::models::cell::{CellSpec, MindSpec, RecursionSpec};
use cellplane::domain::models::config::Config;
use cellplane::services::checks::CheckRunner;
use cellplane::services::credential_service::CredentialService;
use cellplane::services::protocol::ProtocolEnforcer;
use cellplane::services::workload_builder::BuilderEndpoints;

pub struct Harness {
    pub ctx: Arc<ControllerContext>,
    pub runtime: Arc<LocalWorkloadRuntime>,
    pub raw_bus: Arc<InMemoryBus>,
    pub guarded_bus: Arc<GuardedBus>,
    pub credentials: Arc<CredentialService>,
    pub enforcer: Arc<ProtocolEnforcer>,
}

/// Build a complete control-plane context over an in-memory database, an
/// in-memory bus and the local workload runtime.
pub async fn harness() -> Harness {
    let pool = migrated_test_pool().await.expect("migrated pool");
    let runtime = Arc::new(LocalWorkloadRuntime::new());
    let raw_bus = Arc::new(InMemoryBus::new());
    let credentials = Arc::new(CredentialService::new(Arc::new(SqliteCredentialStore::new(
        pool.clone(),
    ))));
    let enforcer = Arc::new(ProtocolEnforcer::with_builtins());
    let guarded_bus = Arc::new(GuardedBus::new(
        raw_bus.clone(),
        credentials.clone(),
        enforcer.clone(),
    ));

    let mut config = Config::default();
    config.workspace_root = std::env::temp_dir()
        .join(format!("cellplane-it-{}", uuid::Uuid::new_v4()))
        .display()
        .to_string();

    let ctx = Arc::new(ControllerContext {
        store: Arc::new(SqliteResourceStore::new(pool.clone())),
        events: Arc::new(SqliteEventRecorder::new(pool.clone())),
        runtime: runtime.clone(),
        bus: guarded_bus.clone(),
        ledger: Arc::new(SqliteBudgetLedger::new(pool.clone())),
        tree: Arc::new(SqliteCellTree::new(pool.clone())),
        audit: Arc::new(SqliteAuditLog::new(pool)),
        credentials: credentials.clone(),
        checks: Arc::new(CheckRunner::new(guarded_bus.clone())),
        endpoints: BuilderEndpoints::default(),
        config,
    });

    Harness { ctx, runtime, raw_bus, guarded_bus, credentials, enforcer }
}

/// A minimal valid cell spec.
pub fn cell_spec(system_prompt: &str) -> CellSpec {
    CellSpec {
        mind: MindSpec {
            provider: "anthropic".to_string(),
            model: "claude-sonnet".to_string(),
            system_prompt: system_prompt.to_string(),
            temperature: None,
            max_tokens: None,
            memory_window: None,
        },
        tools: vec![],
        resources: Default::default(),
        parent_ref: None,
        formation_ref: None,
        recursion: RecursionSpec::default(),
    }
}
