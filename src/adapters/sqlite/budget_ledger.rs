//! SQLite implementation of the budget ledger.
//!
//! Balance mutations and their journal rows commit in one transaction, and
//! every debit carries its invariant guard inside the UPDATE statement
//! (`available >= amount`), so no interleaving can observe or create a
//! negative available balance.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::budget::{
    BudgetBalance, BudgetOperation, BudgetTreeNode, LedgerEntry,
};
use crate::domain::ports::budget_ledger::BudgetLedger;

pub struct SqliteBudgetLedger {
    pool: SqlitePool,
}

impl SqliteBudgetLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_balance(
        tx: &mut Transaction<'_, Sqlite>,
        cell_id: &str,
    ) -> ControlResult<Option<BudgetBalance>> {
        let row: Option<BalanceRow> =
            sqlx::query_as("SELECT * FROM budget_balances WHERE cell_id = ?")
                .bind(cell_id)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(row.map(BalanceRow::into_balance))
    }

    async fn write_entry(
        tx: &mut Transaction<'_, Sqlite>,
        cell_id: &str,
        operation: BudgetOperation,
        amount: f64,
        from_cell_id: Option<&str>,
        to_cell_id: Option<&str>,
        balance_after: f64,
        reason: Option<&str>,
    ) -> ControlResult<()> {
        sqlx::query(
            r#"INSERT INTO budget_ledger
               (id, cell_id, operation, amount, from_cell_id, to_cell_id,
                balance_after, reason, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(cell_id)
        .bind(operation.as_str())
        .bind(amount)
        .bind(from_cell_id)
        .bind(to_cell_id)
        .bind(balance_after)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Debit `amount` of available funds from `cell_id` into its delegated
    /// bucket. The availability guard lives in the UPDATE itself.
    async fn delegate_from(
        tx: &mut Transaction<'_, Sqlite>,
        cell_id: &str,
        amount: f64,
    ) -> ControlResult<()> {
        let result = sqlx::query(
            r#"UPDATE budget_balances
               SET delegated = delegated + ?, updated_at = ?
               WHERE cell_id = ? AND (allocated - spent - delegated) >= ?"#,
        )
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .bind(cell_id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return match Self::fetch_balance(tx, cell_id).await? {
                Some(balance) => Err(ControlError::BudgetExceeded(format!(
                    "Insufficient budget: {} has {:.4} available, needs {:.4}",
                    cell_id,
                    balance.available(),
                    amount
                ))),
                None => Err(ControlError::not_found("BudgetBalance", cell_id)),
            };
        }
        Ok(())
    }

    /// Shared body of allocate and top_up; they differ in the journal
    /// operation and whether a missing recipient is created.
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        reason: Option<&str>,
        operation: BudgetOperation,
        create_recipient: bool,
    ) -> ControlResult<()> {
        require_positive(amount)?;
        if from == to {
            return Err(ControlError::Validation(
                "cannot transfer budget to self".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        Self::delegate_from(&mut tx, from, amount).await?;

        if create_recipient {
            sqlx::query(
                r#"INSERT INTO budget_balances (cell_id, allocated, spent, delegated, parent_id, updated_at)
                   VALUES (?, ?, 0, 0, ?, ?)
                   ON CONFLICT(cell_id) DO UPDATE SET
                       allocated = allocated + excluded.allocated,
                       updated_at = excluded.updated_at"#,
            )
            .bind(to)
            .bind(amount)
            .bind(from)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        } else {
            let result = sqlx::query(
                "UPDATE budget_balances SET allocated = allocated + ?, updated_at = ? WHERE cell_id = ?",
            )
            .bind(amount)
            .bind(Utc::now().to_rfc3339())
            .bind(to)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(ControlError::not_found("BudgetBalance", to));
            }
        }

        let from_after = Self::fetch_balance(&mut tx, from)
            .await?
            .map(|b| b.available())
            .unwrap_or_default();
        let to_after = Self::fetch_balance(&mut tx, to)
            .await?
            .map(|b| b.available())
            .unwrap_or_default();

        // One journal row per participant, same transaction as the balances.
        Self::write_entry(&mut tx, from, operation, amount, Some(from), Some(to), from_after, reason)
            .await?;
        Self::write_entry(&mut tx, to, operation, amount, Some(from), Some(to), to_after, reason)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn subtree(&self, cell_id: &str) -> ControlResult<Option<BudgetTreeNode>> {
        let Some(balance) = self.get_balance(cell_id).await? else {
            return Ok(None);
        };
        let rows: Vec<BalanceRow> =
            sqlx::query_as("SELECT * FROM budget_balances WHERE parent_id = ? ORDER BY cell_id")
                .bind(cell_id)
                .fetch_all(&self.pool)
                .await?;

        let mut children = Vec::with_capacity(rows.len());
        for row in rows {
            let child_id = row.cell_id.clone();
            if let Some(node) = Box::pin(self.subtree(&child_id)).await? {
                children.push(node);
            }
        }
        Ok(Some(BudgetTreeNode { balance, children }))
    }
}

fn require_positive(amount: f64) -> ControlResult<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ControlError::Validation(format!(
            "budget amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

#[async_trait]
impl BudgetLedger for SqliteBudgetLedger {
    async fn init_root(
        &self,
        cell_id: &str,
        amount: f64,
        reason: Option<&str>,
    ) -> ControlResult<BudgetBalance> {
        require_positive(amount)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO budget_balances
               (cell_id, allocated, spent, delegated, parent_id, updated_at)
               VALUES (?, ?, 0, 0, NULL, ?)"#,
        )
        .bind(cell_id)
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::Validation(format!(
                "budget balance for '{}' already exists",
                cell_id
            )));
        }

        Self::write_entry(
            &mut tx,
            cell_id,
            BudgetOperation::Allocate,
            amount,
            None,
            Some(cell_id),
            amount,
            reason,
        )
        .await?;
        tx.commit().await?;

        Ok(BudgetBalance {
            cell_id: cell_id.to_string(),
            allocated: amount,
            spent: 0.0,
            delegated: 0.0,
            parent_id: None,
        })
    }

    async fn allocate(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        reason: Option<&str>,
    ) -> ControlResult<()> {
        self.transfer(from, to, amount, reason, BudgetOperation::Allocate, true)
            .await
    }

    async fn spend(&self, cell_id: &str, amount: f64, reason: Option<&str>) -> ControlResult<()> {
        require_positive(amount)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE budget_balances
               SET spent = spent + ?, updated_at = ?
               WHERE cell_id = ? AND (allocated - spent - delegated) >= ?"#,
        )
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .bind(cell_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return match Self::fetch_balance(&mut tx, cell_id).await? {
                Some(balance) => Err(ControlError::BudgetExceeded(format!(
                    "Insufficient budget: {} has {:.4} available, needs {:.4}",
                    cell_id,
                    balance.available(),
                    amount
                ))),
                None => Err(ControlError::not_found("BudgetBalance", cell_id)),
            };
        }

        let after = Self::fetch_balance(&mut tx, cell_id)
            .await?
            .map(|b| b.available())
            .unwrap_or_default();
        Self::write_entry(
            &mut tx,
            cell_id,
            BudgetOperation::Spend,
            amount,
            None,
            None,
            after,
            reason,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reclaim(
        &self,
        child: &str,
        parent: &str,
        reason: Option<&str>,
    ) -> ControlResult<f64> {
        let mut tx = self.pool.begin().await?;

        let Some(child_balance) = Self::fetch_balance(&mut tx, child).await? else {
            return Err(ControlError::not_found("BudgetBalance", child));
        };
        let amount = child_balance.available();
        if amount <= 0.0 {
            return Ok(0.0);
        }

        let result = sqlx::query(
            r#"UPDATE budget_balances
               SET allocated = allocated - ?, updated_at = ?
               WHERE cell_id = ? AND (allocated - spent - delegated) >= ?"#,
        )
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .bind(child)
        .bind(amount)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ControlError::conflict("BudgetBalance", child));
        }

        let result = sqlx::query(
            r#"UPDATE budget_balances
               SET delegated = delegated - ?, updated_at = ?
               WHERE cell_id = ? AND delegated >= ?"#,
        )
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .bind(parent)
        .bind(amount)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return match Self::fetch_balance(&mut tx, parent).await? {
                Some(_) => Err(ControlError::Validation(format!(
                    "parent '{}' has not delegated {:.4} to reclaim",
                    parent, amount
                ))),
                None => Err(ControlError::not_found("BudgetBalance", parent)),
            };
        }

        let child_after = Self::fetch_balance(&mut tx, child)
            .await?
            .map(|b| b.available())
            .unwrap_or_default();
        let parent_after = Self::fetch_balance(&mut tx, parent)
            .await?
            .map(|b| b.available())
            .unwrap_or_default();

        Self::write_entry(
            &mut tx,
            child,
            BudgetOperation::Reclaim,
            amount,
            Some(child),
            Some(parent),
            child_after,
            reason,
        )
        .await?;
        Self::write_entry(
            &mut tx,
            parent,
            BudgetOperation::Reclaim,
            amount,
            Some(child),
            Some(parent),
            parent_after,
            reason,
        )
        .await?;

        tx.commit().await?;
        Ok(amount)
    }

    async fn top_up(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        reason: Option<&str>,
    ) -> ControlResult<()> {
        self.transfer(from, to, amount, reason, BudgetOperation::TopUp, false)
            .await
    }

    async fn get_balance(&self, cell_id: &str) -> ControlResult<Option<BudgetBalance>> {
        let row: Option<BalanceRow> =
            sqlx::query_as("SELECT * FROM budget_balances WHERE cell_id = ?")
                .bind(cell_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(BalanceRow::into_balance))
    }

    async fn get_history(&self, cell_id: &str, limit: u32) -> ControlResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            r#"SELECT * FROM budget_ledger
               WHERE cell_id = ?
               ORDER BY created_at DESC, rowid DESC
               LIMIT ?"#,
        )
        .bind(cell_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    async fn get_tree(&self, root_id: &str) -> ControlResult<Option<BudgetTreeNode>> {
        self.subtree(root_id).await
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    cell_id: String,
    allocated: f64,
    spent: f64,
    delegated: f64,
    parent_id: Option<String>,
    #[allow(dead_code)]
    updated_at: String,
}

impl BalanceRow {
    fn into_balance(self) -> BudgetBalance {
        BudgetBalance {
            cell_id: self.cell_id,
            allocated: self.allocated,
            spent: self.spent,
            delegated: self.delegated,
            parent_id: self.parent_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: String,
    cell_id: String,
    operation: String,
    amount: f64,
    from_cell_id: Option<String>,
    to_cell_id: Option<String>,
    balance_after: f64,
    reason: Option<String>,
    created_at: String,
}

impl LedgerRow {
    fn into_entry(self) -> ControlResult<LedgerEntry> {
        Ok(LedgerEntry {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| ControlError::Serialization(format!("bad ledger id: {}", e)))?,
            cell_id: self.cell_id,
            operation: BudgetOperation::from_str(&self.operation).ok_or_else(|| {
                ControlError::Serialization(format!("unknown operation '{}'", self.operation))
            })?,
            amount: self.amount,
            from_cell_id: self.from_cell_id,
            to_cell_id: self.to_cell_id,
            balance_after: self.balance_after,
            reason: self.reason,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map_err(|e| ControlError::Serialization(format!("bad timestamp: {}", e)))?
                .with_timezone(&Utc),
        })
    }
}
