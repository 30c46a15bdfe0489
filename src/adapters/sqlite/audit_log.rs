//! SQLite implementation of the audit log.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::ports::audit_log::{AuditEntry, AuditFilter, AuditLog, AuditOutcome};

pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn record(&self, entry: AuditEntry) -> ControlResult<()> {
        sqlx::query(
            r#"INSERT INTO audit_entries
               (id, actor, action, resource_type, resource_id, namespace,
                detail, outcome, status_code, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.namespace)
        .bind(&entry.detail)
        .bind(entry.outcome.as_str())
        .bind(entry.status_code.map(i64::from))
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        filter: AuditFilter,
        limit: u32,
        offset: u32,
    ) -> ControlResult<Vec<AuditEntry>> {
        let mut query = String::from("SELECT * FROM audit_entries WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(actor) = &filter.actor {
            query.push_str(" AND actor = ?");
            bindings.push(actor.clone());
        }
        if let Some(resource_type) = &filter.resource_type {
            query.push_str(" AND resource_type = ?");
            bindings.push(resource_type.clone());
        }
        if let Some(namespace) = &filter.namespace {
            query.push_str(" AND namespace = ?");
            bindings.push(namespace.clone());
        }
        if let Some(since) = &filter.since {
            query.push_str(" AND created_at >= ?");
            bindings.push(since.to_rfc3339());
        }
        query.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, AuditRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        q = q.bind(i64::from(limit)).bind(i64::from(offset));

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(AuditRow::into_entry).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: String,
    actor: String,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    namespace: String,
    detail: Option<String>,
    outcome: String,
    status_code: Option<i64>,
    created_at: String,
}

impl AuditRow {
    fn into_entry(self) -> ControlResult<AuditEntry> {
        let outcome = match self.outcome.as_str() {
            "success" => AuditOutcome::Success,
            "failure" => AuditOutcome::Failure,
            other => {
                return Err(ControlError::Serialization(format!(
                    "unknown audit outcome '{}'",
                    other
                )))
            }
        };
        Ok(AuditEntry {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| ControlError::Serialization(format!("bad audit id: {}", e)))?,
            actor: self.actor,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            namespace: self.namespace,
            detail: self.detail,
            outcome,
            status_code: self.status_code.map(|c| c as u16),
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map_err(|e| ControlError::Serialization(format!("bad timestamp: {}", e)))?
                .with_timezone(&Utc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::migrations::migrated_test_pool;

    #[tokio::test]
    async fn test_record_and_query_with_filters() {
        let log = SqliteAuditLog::new(migrated_test_pool().await.unwrap());

        log.record(
            AuditEntry::new("alice", "apply", "Cell", "default", AuditOutcome::Success)
                .with_resource_id("a"),
        )
        .await
        .unwrap();
        log.record(
            AuditEntry::new("bob", "delete", "Mission", "default", AuditOutcome::Failure)
                .with_detail("not found"),
        )
        .await
        .unwrap();

        let all = log.query(AuditFilter::default(), 10, 0).await.unwrap();
        assert_eq!(all.len(), 2);

        let alice_only = log
            .query(
                AuditFilter { actor: Some("alice".to_string()), ..Default::default() },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(alice_only.len(), 1);
        assert_eq!(alice_only[0].action, "apply");
        assert_eq!(alice_only[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn test_pagination() {
        let log = SqliteAuditLog::new(migrated_test_pool().await.unwrap());
        for i in 0..5 {
            log.record(AuditEntry::new(
                "actor",
                format!("action-{}", i),
                "Cell",
                "default",
                AuditOutcome::Success,
            ))
            .await
            .unwrap();
        }
        let page = log.query(AuditFilter::default(), 2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
    }
}
