//! SQLite implementation of the credential store.
//!
//! The partial unique index on `(cell_id) WHERE revoked_at IS NULL` backs
//! the one-active-record rule; rotation revokes and inserts in a single
//! transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::credentials::{BusPermissions, NatsCredentials};
use crate::domain::ports::credential_store::CredentialStore;

pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn rotate(&self, credentials: &NatsCredentials) -> ControlResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE nats_credentials SET revoked_at = ? WHERE cell_id = ? AND revoked_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&credentials.cell_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO nats_credentials
               (id, cell_id, namespace, username, password,
                publish_permissions, subscribe_permissions, created_at, revoked_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)"#,
        )
        .bind(credentials.id.to_string())
        .bind(&credentials.cell_id)
        .bind(&credentials.namespace)
        .bind(&credentials.username)
        .bind(&credentials.password)
        .bind(serde_json::to_string(&credentials.permissions.publish)?)
        .bind(serde_json::to_string(&credentials.permissions.subscribe)?)
        .bind(credentials.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_active(&self, cell_id: &str) -> ControlResult<Option<NatsCredentials>> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT * FROM nats_credentials WHERE cell_id = ? AND revoked_at IS NULL",
        )
        .bind(cell_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CredentialRow::into_credentials).transpose()
    }

    async fn revoke(&self, cell_id: &str) -> ControlResult<bool> {
        let result = sqlx::query(
            "UPDATE nats_credentials SET revoked_at = ? WHERE cell_id = ? AND revoked_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cell_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, namespace: &str) -> ControlResult<Vec<NatsCredentials>> {
        let rows: Vec<CredentialRow> = sqlx::query_as(
            "SELECT * FROM nats_credentials WHERE namespace = ? ORDER BY created_at DESC",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CredentialRow::into_credentials).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    id: String,
    cell_id: String,
    namespace: String,
    username: String,
    password: String,
    publish_permissions: String,
    subscribe_permissions: String,
    created_at: String,
    revoked_at: Option<String>,
}

impl CredentialRow {
    fn into_credentials(self) -> ControlResult<NatsCredentials> {
        let parse = |raw: &str| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| ControlError::Serialization(format!("bad timestamp: {}", e)))
        };
        Ok(NatsCredentials {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| ControlError::Serialization(format!("bad credential id: {}", e)))?,
            cell_id: self.cell_id,
            namespace: self.namespace,
            username: self.username,
            password: self.password,
            permissions: BusPermissions {
                publish: serde_json::from_str(&self.publish_permissions)?,
                subscribe: serde_json::from_str(&self.subscribe_permissions)?,
            },
            created_at: parse(&self.created_at)?,
            revoked_at: self.revoked_at.as_deref().map(parse).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::migrations::migrated_test_pool;

    fn credentials(cell_id: &str, password: &str) -> NatsCredentials {
        NatsCredentials {
            id: Uuid::new_v4(),
            cell_id: cell_id.to_string(),
            namespace: "default".to_string(),
            username: format!("cell-default-{}", cell_id),
            password: password.to_string(),
            permissions: BusPermissions {
                publish: vec![format!("cell.default.{}.outbox", cell_id)],
                subscribe: vec![format!("cell.default.{}.inbox", cell_id)],
            },
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn test_rotate_and_fetch() {
        let store = SqliteCredentialStore::new(migrated_test_pool().await.unwrap());
        store.rotate(&credentials("a", "first-password")).await.unwrap();

        let active = store.get_active("a").await.unwrap().unwrap();
        assert_eq!(active.password, "first-password");
        assert!(active.is_active());
    }

    #[tokio::test]
    async fn test_rotation_revokes_previous() {
        let store = SqliteCredentialStore::new(migrated_test_pool().await.unwrap());
        store.rotate(&credentials("a", "first")).await.unwrap();
        store.rotate(&credentials("a", "second")).await.unwrap();

        let active = store.get_active("a").await.unwrap().unwrap();
        assert_eq!(active.password, "second");

        let all = store.list("default").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|c| c.is_active()).count(), 1);
    }

    #[tokio::test]
    async fn test_revoke() {
        let store = SqliteCredentialStore::new(migrated_test_pool().await.unwrap());
        store.rotate(&credentials("a", "pw")).await.unwrap();

        assert!(store.revoke("a").await.unwrap());
        assert!(store.get_active("a").await.unwrap().is_none());
        // Second revoke finds nothing active.
        assert!(!store.revoke("a").await.unwrap());
    }
}
