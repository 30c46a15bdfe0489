//! End-to-end mission scenarios through the public reconciler surface.

mod common;

use cellplane::application::{CellReconciler, MissionReconciler, Reconciler};
use cellplane::domain::models::cell::{Cell, CellPhase};
use cellplane::domain::models::meta::ResourceKind;
use cellplane::domain::models::mission::{
    CheckSpec, CheckStatus, CompletionSpec, Entrypoint, Mission, MissionPhase, MissionSpec,
};
use cellplane::domain::models::workload::WorkloadPhase;
use cellplane::domain::ports::resource_store::{create_typed, get_typed};
use common::{cell_spec, harness};
use tokio_util::sync::CancellationToken;

fn mission_with(checks: Vec<CheckSpec>, max_attempts: u32, timeout: &str) -> Mission {
    Mission::new(
        "default",
        "objective",
        MissionSpec {
            formation_ref: None,
            cell_ref: Some("solo".to_string()),
            objective: "reply ok".to_string(),
            completion: CompletionSpec {
                checks,
                max_attempts,
                timeout: timeout.to_string(),
                review: None,
            },
            entrypoint: Entrypoint { cell: "solo".to_string(), message: "go".to_string() },
            budget: None,
        },
    )
}

#[tokio::test]
async fn test_happy_mission() {
    let h = harness().await;
    let cells = CellReconciler::new(h.ctx.clone());
    let missions = MissionReconciler::new(h.ctx.clone());
    let cancel = CancellationToken::new();

    // A cell whose prompt is to reply ok, and a mission gated on `echo ok`.
    create_typed(h.ctx.store.as_ref(), &Cell::new("default", "solo", cell_spec("reply ok")))
        .await
        .unwrap();
    cells.reconcile("default", "solo", &cancel).await.unwrap();
    h.runtime.set_phase("default", "cell-solo", WorkloadPhase::Running).await;
    cells.reconcile("default", "solo", &cancel).await.unwrap();

    let cell: Cell = get_typed(h.ctx.store.as_ref(), "default", "solo").await.unwrap().unwrap();
    assert_eq!(cell.status.unwrap().phase, CellPhase::Running);

    let check = CheckSpec::Command {
        name: "echo".to_string(),
        command: "echo ok".to_string(),
        success_pattern: Some("ok".to_string()),
        fail_pattern: None,
    };
    create_typed(h.ctx.store.as_ref(), &mission_with(vec![check], 1, "30m"))
        .await
        .unwrap();

    // Pending -> Running (attempt 1) -> Succeeded.
    missions.reconcile("default", "objective", &cancel).await.unwrap();
    let m: Mission =
        get_typed(h.ctx.store.as_ref(), "default", "objective").await.unwrap().unwrap();
    assert_eq!(m.status.as_ref().unwrap().phase, MissionPhase::Running);
    assert_eq!(m.status.as_ref().unwrap().attempt, 1);

    missions.reconcile("default", "objective", &cancel).await.unwrap();
    let m: Mission =
        get_typed(h.ctx.store.as_ref(), "default", "objective").await.unwrap().unwrap();
    let status = m.status.unwrap();
    assert_eq!(status.phase, MissionPhase::Succeeded);
    assert_eq!(status.checks.len(), 1);
    assert_eq!(status.checks[0].name, "echo");
    assert_eq!(status.checks[0].status, CheckStatus::Passed);
}

#[tokio::test]
async fn test_timeout_with_retry_then_failure() {
    let h = harness().await;
    let missions = MissionReconciler::new(h.ctx.clone());
    let cancel = CancellationToken::new();

    // Unreachable entrypoint: nothing consumes the inbox and the check
    // never passes.
    let check = CheckSpec::FileExists {
        name: "artifact".to_string(),
        paths: vec!["result.txt".to_string()],
    };
    create_typed(h.ctx.store.as_ref(), &mission_with(vec![check], 2, "2s"))
        .await
        .unwrap();

    missions.reconcile("default", "objective", &cancel).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
    missions.reconcile("default", "objective", &cancel).await.unwrap();

    // First timeout: back to Pending with the attempt recorded.
    let m: Mission =
        get_typed(h.ctx.store.as_ref(), "default", "objective").await.unwrap().unwrap();
    let status = m.status.as_ref().unwrap();
    assert_eq!(status.phase, MissionPhase::Pending);
    assert_eq!(status.history.len(), 1);

    // Second attempt starts (attempt = 2), times out, terminal failure.
    missions.reconcile("default", "objective", &cancel).await.unwrap();
    let m: Mission =
        get_typed(h.ctx.store.as_ref(), "default", "objective").await.unwrap().unwrap();
    assert_eq!(m.status.as_ref().unwrap().attempt, 2);

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
    missions.reconcile("default", "objective", &cancel).await.unwrap();

    let m: Mission =
        get_typed(h.ctx.store.as_ref(), "default", "objective").await.unwrap().unwrap();
    let status = m.status.unwrap();
    assert_eq!(status.phase, MissionPhase::Failed);
    assert!(status
        .message
        .as_ref()
        .unwrap()
        .contains("timed out after max attempts"));
    assert!(status.attempt <= 2);

    let events = h
        .ctx
        .events
        .list_for(ResourceKind::Mission, "default", "objective", 20)
        .await
        .unwrap();
    assert!(events.iter().any(|e| e.reason == "MissionTimeout"));
    assert!(events.iter().any(|e| e.reason == "MissionFailed"));
}

#[tokio::test]
async fn test_reconcile_twice_is_idempotent() {
    let h = harness().await;
    let cells = CellReconciler::new(h.ctx.clone());
    let cancel = CancellationToken::new();

    create_typed(h.ctx.store.as_ref(), &Cell::new("default", "solo", cell_spec("x")))
        .await
        .unwrap();
    cells.reconcile("default", "solo", &cancel).await.unwrap();
    let first: Cell =
        get_typed(h.ctx.store.as_ref(), "default", "solo").await.unwrap().unwrap();

    // Second reconcile of identical observed state performs no write.
    cells.reconcile("default", "solo", &cancel).await.unwrap();
    let second: Cell =
        get_typed(h.ctx.store.as_ref(), "default", "solo").await.unwrap().unwrap();
    assert_eq!(first.meta.resource_version, second.meta.resource_version);
}
