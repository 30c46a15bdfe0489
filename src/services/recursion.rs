//! Recursion validator.
//!
//! Gatekeeper for every spawn request. Checks run in a fixed order with
//! first-failure-wins: spawn policy, depth, descendant count, budget,
//! platform-wide cell cap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ControlResult;
use crate::domain::models::cell::{CellSpec, RecursionSpec, SpawnPolicy};
use crate::domain::models::spawn_request::{SpawnRequest, SpawnRequestSpec};
use crate::domain::ports::budget_ledger::BudgetLedger;
use crate::domain::ports::cell_tree::CellTreeStore;
use crate::domain::ports::resource_store::{create_typed, get_typed, ResourceStore};

/// What a cell asks for when spawning a child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnInput {
    /// Name for the child cell.
    pub name: String,
    pub spec: CellSpec,
    /// Budget to allocate to the child on spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    /// Blueprint backing this spawn, required under `blueprint_only`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outcome of spawn validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnVerdict {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Set when a SpawnRequest was enqueued for human consent.
    #[serde(default)]
    pub pending: bool,
}

impl SpawnVerdict {
    fn allowed() -> Self {
        Self { allowed: true, reason: None, pending: false }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()), pending: false }
    }

    fn pending(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()), pending: true }
    }
}

pub struct RecursionValidator {
    tree: Arc<dyn CellTreeStore>,
    ledger: Arc<dyn BudgetLedger>,
    store: Arc<dyn ResourceStore>,
    /// Platform-wide cap on cells per root tree.
    max_total_cells: u32,
}

impl RecursionValidator {
    pub fn new(
        tree: Arc<dyn CellTreeStore>,
        ledger: Arc<dyn BudgetLedger>,
        store: Arc<dyn ResourceStore>,
        max_total_cells: u32,
    ) -> Self {
        Self { tree, ledger, store, max_total_cells }
    }

    /// Validate a spawn attempt by `parent` in `namespace`.
    pub async fn validate_spawn(
        &self,
        parent: &str,
        namespace: &str,
        recursion: &RecursionSpec,
        input: &SpawnInput,
    ) -> ControlResult<SpawnVerdict> {
        // 1. Policy.
        match recursion.spawn_policy {
            SpawnPolicy::Disabled => {
                return Ok(SpawnVerdict::denied("spawning is disabled for this cell"));
            }
            SpawnPolicy::BlueprintOnly if input.blueprint_ref.is_none() => {
                return Ok(SpawnVerdict::denied(
                    "spawn policy is blueprint_only and no blueprint was referenced",
                ));
            }
            SpawnPolicy::ApprovalRequired => {
                return self.enqueue_request(parent, namespace, input).await;
            }
            SpawnPolicy::Open | SpawnPolicy::BlueprintOnly => {}
        }

        // 2. Depth.
        let depth = match self.tree.get(parent).await? {
            Some(entry) => entry.depth,
            None => 0,
        };
        if depth + 1 > recursion.max_depth {
            return Ok(SpawnVerdict::denied(format!(
                "max depth {} reached (parent at depth {})",
                recursion.max_depth, depth
            )));
        }

        // 3. Descendants.
        let descendants = self.tree.descendant_count(parent).await?;
        if descendants >= u64::from(recursion.max_descendants) {
            return Ok(SpawnVerdict::denied(format!(
                "max descendants {} reached",
                recursion.max_descendants
            )));
        }

        // 4. Budget.
        if let Some(budget) = input.budget {
            let available = self
                .ledger
                .get_balance(parent)
                .await?
                .map(|b| b.available())
                .unwrap_or(0.0);
            if available < budget {
                return Ok(SpawnVerdict::denied(format!(
                    "Insufficient budget: parent has {:.4} available, child needs {:.4}",
                    available, budget
                )));
            }
        }

        // 5. Platform cap, counted over the tree rooted at the parent's root.
        let root_id = match self.tree.get(parent).await? {
            Some(entry) => entry.root_id,
            None => parent.to_string(),
        };
        let total = self.tree.subtree_size(&root_id).await?;
        if total >= u64::from(self.max_total_cells) {
            return Ok(SpawnVerdict::denied(format!(
                "platform limit of {} cells reached for tree '{}'",
                self.max_total_cells, root_id
            )));
        }

        Ok(SpawnVerdict::allowed())
    }

    async fn enqueue_request(
        &self,
        parent: &str,
        namespace: &str,
        input: &SpawnInput,
    ) -> ControlResult<SpawnVerdict> {
        let request_name = format!("spawn-{}-{}", parent, input.name);

        // An existing queued request is not duplicated.
        if get_typed::<SpawnRequest>(self.store.as_ref(), namespace, &request_name)
            .await?
            .is_some()
        {
            return Ok(SpawnVerdict::pending(format!(
                "spawn request '{}' is awaiting approval",
                request_name
            )));
        }

        let request = SpawnRequest::new(
            namespace,
            request_name.clone(),
            SpawnRequestSpec {
                name: input.name.clone(),
                namespace: namespace.to_string(),
                requestor_cell_id: parent.to_string(),
                requested_spec: input.spec.clone(),
                reason: input.reason.clone(),
            },
        );
        create_typed(self.store.as_ref(), &request).await?;
        tracing::info!(parent, child = %input.name, request = %request_name, "spawn queued for approval");

        Ok(SpawnVerdict::pending(format!(
            "spawn request '{}' created and awaiting approval",
            request_name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::budget_ledger::SqliteBudgetLedger;
    use crate::adapters::sqlite::cell_tree::SqliteCellTree;
    use crate::adapters::sqlite::migrations::migrated_test_pool;
    use crate::adapters::sqlite::resource_store::SqliteResourceStore;
    use crate::domain::models::cell::{CellResources, MindSpec};
    use crate::domain::models::spawn_request::SpawnDecision;
    use crate::domain::ports::resource_store::list_typed;

    fn spec(policy: SpawnPolicy) -> RecursionSpec {
        RecursionSpec { max_depth: 2, max_descendants: 3, spawn_policy: policy }
    }

    fn input(name: &str) -> SpawnInput {
        SpawnInput {
            name: name.to_string(),
            spec: CellSpec {
                mind: MindSpec {
                    provider: "anthropic".to_string(),
                    model: "claude-haiku".to_string(),
                    system_prompt: String::new(),
                    temperature: None,
                    max_tokens: None,
                    memory_window: None,
                },
                tools: vec![],
                resources: CellResources::default(),
                parent_ref: Some("parent".to_string()),
                formation_ref: None,
                recursion: RecursionSpec::default(),
            },
            budget: None,
            blueprint_ref: None,
            reason: None,
        }
    }

    async fn validator(max_total: u32) -> (RecursionValidator, Arc<SqliteCellTree>, Arc<SqliteBudgetLedger>, Arc<SqliteResourceStore>) {
        let pool = migrated_test_pool().await.unwrap();
        let tree = Arc::new(SqliteCellTree::new(pool.clone()));
        let ledger = Arc::new(SqliteBudgetLedger::new(pool.clone()));
        let store = Arc::new(SqliteResourceStore::new(pool));
        let validator = RecursionValidator::new(
            tree.clone(),
            ledger.clone(),
            store.clone(),
            max_total,
        );
        (validator, tree, ledger, store)
    }

    #[tokio::test]
    async fn test_disabled_policy_denies() {
        let (validator, ..) = validator(100).await;
        let verdict = validator
            .validate_spawn("parent", "default", &spec(SpawnPolicy::Disabled), &input("c"))
            .await
            .unwrap();
        assert!(!verdict.allowed);
        assert!(!verdict.pending);
        assert!(verdict.reason.unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn test_blueprint_only_requires_blueprint() {
        let (validator, ..) = validator(100).await;
        let verdict = validator
            .validate_spawn("parent", "default", &spec(SpawnPolicy::BlueprintOnly), &input("c"))
            .await
            .unwrap();
        assert!(!verdict.allowed);

        let mut with_blueprint = input("c");
        with_blueprint.blueprint_ref = Some("researcher".to_string());
        let verdict = validator
            .validate_spawn("parent", "default", &spec(SpawnPolicy::BlueprintOnly), &with_blueprint)
            .await
            .unwrap();
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn test_approval_required_enqueues_request() {
        let (validator, _, _, store) = validator(100).await;
        let verdict = validator
            .validate_spawn("parent", "default", &spec(SpawnPolicy::ApprovalRequired), &input("c"))
            .await
            .unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.pending);

        let requests: Vec<SpawnRequest> =
            list_typed(store.as_ref(), Some("default"), &Default::default())
                .await
                .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].decision(), SpawnDecision::Pending);
        assert_eq!(requests[0].spec.requestor_cell_id, "parent");

        // Re-validation does not duplicate the queue entry.
        let verdict = validator
            .validate_spawn("parent", "default", &spec(SpawnPolicy::ApprovalRequired), &input("c"))
            .await
            .unwrap();
        assert!(verdict.pending);
        let requests: Vec<SpawnRequest> =
            list_typed(store.as_ref(), Some("default"), &Default::default())
                .await
                .unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let (validator, tree, ..) = validator(100).await;
        tree.insert("root", None).await.unwrap();
        tree.insert("mid", Some("root")).await.unwrap();
        tree.insert("deep", Some("mid")).await.unwrap();

        // deep is at depth 2; spawning would exceed max_depth 2.
        let verdict = validator
            .validate_spawn("deep", "default", &spec(SpawnPolicy::Open), &input("c"))
            .await
            .unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("depth"));

        // mid is at depth 1; a child at depth 2 is allowed.
        let verdict = validator
            .validate_spawn("mid", "default", &spec(SpawnPolicy::Open), &input("c"))
            .await
            .unwrap();
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn test_descendant_limit() {
        let (validator, tree, ..) = validator(100).await;
        tree.insert("parent", None).await.unwrap();
        for i in 0..3 {
            tree.insert(&format!("child-{}", i), Some("parent")).await.unwrap();
        }
        let verdict = validator
            .validate_spawn("parent", "default", &spec(SpawnPolicy::Open), &input("c"))
            .await
            .unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("descendants"));
    }

    #[tokio::test]
    async fn test_budget_check() {
        let (validator, tree, ledger, _) = validator(100).await;
        tree.insert("parent", None).await.unwrap();
        ledger.init_root("parent", 5.0, None).await.unwrap();

        let mut over = input("c");
        over.budget = Some(6.0);
        let verdict = validator
            .validate_spawn("parent", "default", &spec(SpawnPolicy::Open), &over)
            .await
            .unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("Insufficient budget"));

        let mut exact = input("c");
        exact.budget = Some(5.0);
        let verdict = validator
            .validate_spawn("parent", "default", &spec(SpawnPolicy::Open), &exact)
            .await
            .unwrap();
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn test_platform_cap() {
        let (validator, tree, ..) = validator(2).await;
        tree.insert("root", None).await.unwrap();
        tree.insert("child", Some("root")).await.unwrap();

        let relaxed = RecursionSpec {
            max_depth: 10,
            max_descendants: 100,
            spawn_policy: SpawnPolicy::Open,
        };
        let verdict = validator
            .validate_spawn("child", "default", &relaxed, &input("c"))
            .await
            .unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("platform limit"));
    }
}
