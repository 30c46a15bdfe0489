//! Spawn gating: approval queues, depth law, and the approval workflow
//! producing a correctly-placed child.

mod common;

use std::sync::Arc;

use cellplane::domain::models::cell::{Cell, RecursionSpec, SpawnPolicy};
use cellplane::domain::models::spawn_request::{SpawnDecision, SpawnRequest};
use cellplane::domain::ports::budget_ledger::BudgetLedger;
use cellplane::domain::ports::cell_tree::CellTreeStore;
use cellplane::domain::ports::resource_store::{get_typed, list_typed};
use cellplane::services::recursion::{RecursionValidator, SpawnInput};
use cellplane::services::spawn_service::SpawnRequestService;
use common::{cell_spec, harness};

fn input(name: &str) -> SpawnInput {
    SpawnInput {
        name: name.to_string(),
        spec: cell_spec("child"),
        budget: None,
        blueprint_ref: None,
        reason: Some("needs a helper".to_string()),
    }
}

#[tokio::test]
async fn test_approval_required_creates_pending_request_and_no_cell() {
    let h = harness().await;
    let validator = RecursionValidator::new(
        h.ctx.tree.clone(),
        h.ctx.ledger.clone(),
        h.ctx.store.clone(),
        100,
    );
    h.ctx.tree.insert("parent", None).await.unwrap();

    let recursion = RecursionSpec {
        max_depth: 3,
        max_descendants: 10,
        spawn_policy: SpawnPolicy::ApprovalRequired,
    };
    let verdict = validator
        .validate_spawn("parent", "default", &recursion, &input("helper"))
        .await
        .unwrap();

    assert!(!verdict.allowed);
    assert!(verdict.pending);

    // A Pending SpawnRequest row exists; no Cell was created.
    let requests: Vec<SpawnRequest> =
        list_typed(h.ctx.store.as_ref(), Some("default"), &Default::default())
            .await
            .unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].decision(), SpawnDecision::Pending);
    let cell: Option<Cell> = get_typed(h.ctx.store.as_ref(), "default", "helper").await.unwrap();
    assert!(cell.is_none());
}

#[tokio::test]
async fn test_approved_spawn_satisfies_depth_law() {
    let h = harness().await;
    let validator = RecursionValidator::new(
        h.ctx.tree.clone(),
        h.ctx.ledger.clone(),
        h.ctx.store.clone(),
        100,
    );
    let spawns = SpawnRequestService::new(
        h.ctx.store.clone(),
        h.ctx.tree.clone(),
        h.ctx.audit.clone(),
    );

    h.ctx.tree.insert("parent", None).await.unwrap();
    let recursion = RecursionSpec {
        max_depth: 2,
        max_descendants: 10,
        spawn_policy: SpawnPolicy::ApprovalRequired,
    };
    validator
        .validate_spawn("parent", "default", &recursion, &input("helper"))
        .await
        .unwrap();

    let cell = spawns
        .approve("default", "spawn-parent-helper", "operator", None)
        .await
        .unwrap();
    assert_eq!(cell.spec.parent_ref.as_deref(), Some("parent"));

    // depth(child) = depth(parent) + 1 and within the limit.
    let parent_depth = h.ctx.tree.get("parent").await.unwrap().unwrap().depth;
    let child = h.ctx.tree.get("helper").await.unwrap().unwrap();
    assert_eq!(child.depth, parent_depth + 1);
    assert!(child.depth <= recursion.max_depth);
    assert_eq!(child.root_id, "parent");
}

#[tokio::test]
async fn test_open_policy_with_budget_gate() {
    let h = harness().await;
    let validator = RecursionValidator::new(
        h.ctx.tree.clone(),
        h.ctx.ledger.clone(),
        h.ctx.store.clone(),
        100,
    );
    h.ctx.tree.insert("parent", None).await.unwrap();
    h.ctx.ledger.init_root("parent", 2.0, None).await.unwrap();

    let recursion = RecursionSpec {
        max_depth: 3,
        max_descendants: 10,
        spawn_policy: SpawnPolicy::Open,
    };

    let mut rich = input("pricey");
    rich.budget = Some(3.0);
    let verdict = validator
        .validate_spawn("parent", "default", &recursion, &rich)
        .await
        .unwrap();
    assert!(!verdict.allowed);
    assert!(verdict.reason.unwrap().contains("Insufficient budget"));

    let mut affordable = input("frugal");
    affordable.budget = Some(2.0);
    let verdict = validator
        .validate_spawn("parent", "default", &recursion, &affordable)
        .await
        .unwrap();
    assert!(verdict.allowed);
}

#[tokio::test]
async fn test_validator_consults_shared_tree(
) {
    // The validator, spawn service and reconcilers all see one tree.
    let h = harness().await;
    let tree: Arc<dyn CellTreeStore> = h.ctx.tree.clone();
    tree.insert("root", None).await.unwrap();
    tree.insert("a", Some("root")).await.unwrap();
    tree.insert("b", Some("a")).await.unwrap();

    let validator = RecursionValidator::new(
        h.ctx.tree.clone(),
        h.ctx.ledger.clone(),
        h.ctx.store.clone(),
        100,
    );
    let tight = RecursionSpec {
        max_depth: 2,
        max_descendants: 10,
        spawn_policy: SpawnPolicy::Open,
    };
    // b sits at depth 2 already.
    let verdict = validator
        .validate_spawn("b", "default", &tight, &input("c"))
        .await
        .unwrap();
    assert!(!verdict.allowed);
}
