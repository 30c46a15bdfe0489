//! SQLite implementation of the cell tree.
//!
//! Depth, root and path are derived from the parent at insert time;
//! descendant counts walk the subtree with a recursive CTE.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::ports::cell_tree::{CellTreeEntry, CellTreeStore};

pub struct SqliteCellTree {
    pool: SqlitePool,
}

impl SqliteCellTree {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CellTreeStore for SqliteCellTree {
    async fn insert(&self, cell_id: &str, parent_id: Option<&str>) -> ControlResult<CellTreeEntry> {
        let (root_id, depth, path) = match parent_id {
            None => (cell_id.to_string(), 0u32, cell_id.to_string()),
            Some(parent) => {
                let Some(parent_entry) = self.get(parent).await? else {
                    return Err(ControlError::not_found("CellTreeEntry", parent));
                };
                (
                    parent_entry.root_id,
                    parent_entry.depth + 1,
                    format!("{}/{}", parent_entry.path, cell_id),
                )
            }
        };

        let created_at = Utc::now();
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO cell_tree (cell_id, parent_id, root_id, depth, path, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(cell_id)
        .bind(parent_id)
        .bind(&root_id)
        .bind(i64::from(depth))
        .bind(&path)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::Validation(format!(
                "cell '{}' is already in the tree",
                cell_id
            )));
        }

        Ok(CellTreeEntry {
            cell_id: cell_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            root_id,
            depth,
            path,
            created_at,
        })
    }

    async fn get(&self, cell_id: &str) -> ControlResult<Option<CellTreeEntry>> {
        let row: Option<TreeRow> = sqlx::query_as("SELECT * FROM cell_tree WHERE cell_id = ?")
            .bind(cell_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TreeRow::into_entry).transpose()
    }

    async fn children(&self, cell_id: &str) -> ControlResult<Vec<CellTreeEntry>> {
        let rows: Vec<TreeRow> =
            sqlx::query_as("SELECT * FROM cell_tree WHERE parent_id = ? ORDER BY cell_id")
                .bind(cell_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TreeRow::into_entry).collect()
    }

    async fn descendant_count(&self, cell_id: &str) -> ControlResult<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"WITH RECURSIVE descendants(cell_id) AS (
                   SELECT cell_id FROM cell_tree WHERE parent_id = ?
                   UNION ALL
                   SELECT t.cell_id FROM cell_tree t
                   JOIN descendants d ON t.parent_id = d.cell_id
               )
               SELECT COUNT(*) FROM descendants"#,
        )
        .bind(cell_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn subtree_size(&self, root_id: &str) -> ControlResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cell_tree WHERE root_id = ?")
            .bind(root_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn remove(&self, cell_id: &str) -> ControlResult<()> {
        let (children,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM cell_tree WHERE parent_id = ?")
                .bind(cell_id)
                .fetch_one(&self.pool)
                .await?;
        if children > 0 {
            return Err(ControlError::Validation(format!(
                "cell '{}' still has {} children",
                cell_id, children
            )));
        }

        let result = sqlx::query("DELETE FROM cell_tree WHERE cell_id = ?")
            .bind(cell_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ControlError::not_found("CellTreeEntry", cell_id));
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TreeRow {
    cell_id: String,
    parent_id: Option<String>,
    root_id: String,
    depth: i64,
    path: String,
    created_at: String,
}

impl TreeRow {
    fn into_entry(self) -> ControlResult<CellTreeEntry> {
        Ok(CellTreeEntry {
            cell_id: self.cell_id,
            parent_id: self.parent_id,
            root_id: self.root_id,
            depth: self.depth as u32,
            path: self.path,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map_err(|e| ControlError::Serialization(format!("bad timestamp: {}", e)))?
                .with_timezone(&Utc),
        })
    }
}
