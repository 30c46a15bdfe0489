//! Budget ledger domain model.
//!
//! The ledger is an append-only journal of budget operations; balances are a
//! materialised view. `available = allocated - spent - delegated` must never
//! go negative after any committed operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operations recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetOperation {
    Allocate,
    Spend,
    Reclaim,
    TopUp,
}

impl BudgetOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allocate => "allocate",
            Self::Spend => "spend",
            Self::Reclaim => "reclaim",
            Self::TopUp => "top_up",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "allocate" => Some(Self::Allocate),
            "spend" => Some(Self::Spend),
            "reclaim" => Some(Self::Reclaim),
            "top_up" => Some(Self::TopUp),
            _ => None,
        }
    }
}

/// One journal row. Transfer operations write a row per participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub cell_id: String,
    pub operation: BudgetOperation,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_cell_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_cell_id: Option<String>,
    /// The participant's available balance after the operation committed.
    pub balance_after: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Derived balance for one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetBalance {
    pub cell_id: String,
    pub allocated: f64,
    pub spent: f64,
    pub delegated: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl BudgetBalance {
    pub fn new(cell_id: impl Into<String>) -> Self {
        Self {
            cell_id: cell_id.into(),
            allocated: 0.0,
            spent: 0.0,
            delegated: 0.0,
            parent_id: None,
        }
    }

    /// Funds the cell can still spend or delegate.
    pub fn available(&self) -> f64 {
        self.allocated - self.spent - self.delegated
    }

    /// Invariant checked after every mutation in tests.
    pub fn is_consistent(&self) -> bool {
        self.available() >= -f64::EPSILON
            && self.allocated >= 0.0
            && self.spent >= 0.0
            && self.delegated >= 0.0
    }
}

/// Tree-aggregated view rooted at one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetTreeNode {
    pub balance: BudgetBalance,
    pub children: Vec<BudgetTreeNode>,
}

impl BudgetTreeNode {
    /// Total allocated across this subtree.
    pub fn subtree_allocated(&self) -> f64 {
        self.balance.allocated
            + self.children.iter().map(BudgetTreeNode::subtree_allocated).sum::<f64>()
    }

    /// Total spent across this subtree.
    pub fn subtree_spent(&self) -> f64 {
        self.balance.spent + self.children.iter().map(BudgetTreeNode::subtree_spent).sum::<f64>()
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(BudgetTreeNode::node_count).sum::<usize>()
    }
}

/// Rebuild balances by replaying the journal from the beginning.
///
/// Transfer operations journal one row per participant; the row's `cell_id`
/// names the participant and the from/to fields give the direction. The
/// result must equal the materialised balances table exactly.
pub fn replay_ledger(entries: &[LedgerEntry]) -> std::collections::BTreeMap<String, BudgetBalance> {
    let mut balances: std::collections::BTreeMap<String, BudgetBalance> =
        std::collections::BTreeMap::new();

    for entry in entries {
        let balance = balances
            .entry(entry.cell_id.clone())
            .or_insert_with(|| BudgetBalance::new(entry.cell_id.clone()));
        match entry.operation {
            BudgetOperation::Allocate | BudgetOperation::TopUp => {
                match (&entry.from_cell_id, &entry.to_cell_id) {
                    (Some(from), _) if *from == entry.cell_id => {
                        balance.delegated += entry.amount;
                    }
                    (_, Some(to)) if *to == entry.cell_id => {
                        balance.allocated += entry.amount;
                        if balance.parent_id.is_none() {
                            balance.parent_id =
                                entry.from_cell_id.clone().filter(|f| *f != entry.cell_id);
                        }
                    }
                    _ => {}
                }
            }
            BudgetOperation::Spend => balance.spent += entry.amount,
            BudgetOperation::Reclaim => match (&entry.from_cell_id, &entry.to_cell_id) {
                (Some(child), _) if *child == entry.cell_id => {
                    balance.allocated -= entry.amount;
                }
                (_, Some(parent)) if *parent == entry.cell_id => {
                    balance.delegated -= entry.amount;
                }
                _ => {}
            },
        }
    }

    balances
}
