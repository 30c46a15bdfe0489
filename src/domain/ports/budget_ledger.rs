//! Budget ledger port.
//!
//! Transactional interface over the hierarchical budget. Every mutating
//! operation covers both participating balances and its journal rows in a
//! single transaction; `available >= 0` is never observable as violated.

use async_trait::async_trait;

use crate::domain::errors::ControlResult;
use crate::domain::models::budget::{BudgetBalance, BudgetTreeNode, LedgerEntry};

#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Create a root balance with `allocated = amount` and write the
    /// opening `allocate` entry. Fails if the cell already has a balance.
    async fn init_root(
        &self,
        cell_id: &str,
        amount: f64,
        reason: Option<&str>,
    ) -> ControlResult<BudgetBalance>;

    /// Move `amount` of available funds from parent to child:
    /// `from.delegated += amount`, `to.allocated += amount`. Requires
    /// `from.available >= amount` and `amount > 0`.
    async fn allocate(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        reason: Option<&str>,
    ) -> ControlResult<()>;

    /// Record spend against a cell. Requires `available >= amount`.
    async fn spend(&self, cell_id: &str, amount: f64, reason: Option<&str>) -> ControlResult<()>;

    /// Return the child's remaining available funds to the parent.
    /// Returns the amount reclaimed; zero when nothing is available.
    async fn reclaim(
        &self,
        child: &str,
        parent: &str,
        reason: Option<&str>,
    ) -> ControlResult<f64>;

    /// Additive grant from parent to an existing child balance.
    async fn top_up(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        reason: Option<&str>,
    ) -> ControlResult<()>;

    async fn get_balance(&self, cell_id: &str) -> ControlResult<Option<BudgetBalance>>;

    /// Journal rows for one cell, newest first.
    async fn get_history(&self, cell_id: &str, limit: u32) -> ControlResult<Vec<LedgerEntry>>;

    /// Tree-aggregated view rooted at `root_id`.
    async fn get_tree(&self, root_id: &str) -> ControlResult<Option<BudgetTreeNode>>;
}
