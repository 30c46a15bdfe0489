//! Cell tree port.
//!
//! Parent/depth/descendant-count queries over the cell hierarchy, consulted
//! by the recursion validator on every spawn.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::ControlResult;

/// One node of the hierarchy with derived placement fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellTreeEntry {
    pub cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub root_id: String,
    /// Root cells have depth 0.
    pub depth: u32,
    /// Slash-joined ancestry, root first, e.g. `root/mid/leaf`.
    pub path: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CellTreeStore: Send + Sync {
    /// Insert a cell under `parent_id` (or as a new root when `None`),
    /// deriving depth, root and path from the parent.
    async fn insert(&self, cell_id: &str, parent_id: Option<&str>) -> ControlResult<CellTreeEntry>;

    async fn get(&self, cell_id: &str) -> ControlResult<Option<CellTreeEntry>>;

    /// Direct children of a cell.
    async fn children(&self, cell_id: &str) -> ControlResult<Vec<CellTreeEntry>>;

    /// Number of strict descendants (excludes the cell itself).
    async fn descendant_count(&self, cell_id: &str) -> ControlResult<u64>;

    /// Total cells in the tree rooted at `root_id` (includes the root).
    async fn subtree_size(&self, root_id: &str) -> ControlResult<u64>;

    /// Remove a leaf entry. Removing a cell with children is a validation
    /// error; the cascade is the store's job, not the tree's.
    async fn remove(&self, cell_id: &str) -> ControlResult<()>;
}
