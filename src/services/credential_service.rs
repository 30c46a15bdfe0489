//! Per-cell bus credential management.
//!
//! Credentials carry subject-level allow-lists derived from topology peers.
//! Regeneration revokes the previous record first; access validation runs
//! the subject matcher over the stored permission lists.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::credentials::{BusOp, BusPermissions, NatsCredentials};
use crate::domain::ports::credential_store::CredentialStore;
use crate::services::subject::matches_any;

/// Length of generated passwords.
const PASSWORD_LEN: usize = 32;

pub struct CredentialService {
    store: Arc<dyn CredentialStore>,
}

impl CredentialService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Issue fresh credentials for a cell, revoking any active record.
    ///
    /// Permissions:
    /// - subscribe: the cell's own inbox
    /// - publish: its outbox, its events subject, and each allowed peer's
    ///   inbox (deduplicated)
    pub async fn generate(
        &self,
        cell_id: &str,
        namespace: &str,
        topology_peers: &[String],
    ) -> ControlResult<NatsCredentials> {
        let mut publish = BTreeSet::new();
        publish.insert(format!("cell.{}.{}.outbox", namespace, cell_id));
        publish.insert(format!("cell.events.{}.{}", namespace, cell_id));
        for peer in topology_peers {
            publish.insert(format!("cell.{}.{}.inbox", namespace, peer));
        }

        let credentials = NatsCredentials {
            id: Uuid::new_v4(),
            cell_id: cell_id.to_string(),
            namespace: namespace.to_string(),
            username: format!("cell-{}-{}", namespace, cell_id),
            password: generate_password(),
            permissions: BusPermissions {
                publish: publish.into_iter().collect(),
                subscribe: vec![format!("cell.{}.{}.inbox", namespace, cell_id)],
            },
            created_at: Utc::now(),
            revoked_at: None,
        };

        self.store.rotate(&credentials).await?;
        tracing::info!(cell = cell_id, namespace, "issued bus credentials");
        Ok(credentials)
    }

    /// Whether the cell's active credentials permit `op` on `subject`.
    pub async fn validate_access(
        &self,
        cell_id: &str,
        subject: &str,
        op: BusOp,
    ) -> ControlResult<bool> {
        let Some(credentials) = self.store.get_active(cell_id).await? else {
            return Err(ControlError::not_found("NatsCredentials", cell_id));
        };
        Ok(matches_any(
            credentials.permissions_for(op).iter().map(String::as_str),
            subject,
        ))
    }

    /// Whether the cell currently holds active credentials.
    pub async fn has_active(&self, cell_id: &str) -> ControlResult<bool> {
        Ok(self.store.get_active(cell_id).await?.is_some())
    }

    /// Revoke the active record, e.g. on cell deletion.
    pub async fn revoke(&self, cell_id: &str) -> ControlResult<bool> {
        let revoked = self.store.revoke(cell_id).await?;
        if revoked {
            tracing::info!(cell = cell_id, "revoked bus credentials");
        }
        Ok(revoked)
    }
}

fn generate_password() -> String {
    // Alphanumeric sampling over the OS-seeded generator.
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::credentials::SqliteCredentialStore;
    use crate::adapters::sqlite::migrations::migrated_test_pool;

    async fn service() -> (CredentialService, Arc<SqliteCredentialStore>) {
        let store = Arc::new(SqliteCredentialStore::new(migrated_test_pool().await.unwrap()));
        (CredentialService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_generated_permissions() {
        let (service, _) = service().await;
        let creds = service
            .generate("s-0", "default", &["h-0".to_string(), "h-0".to_string()])
            .await
            .unwrap();

        assert_eq!(creds.username, "cell-default-s-0");
        assert_eq!(creds.password.len(), PASSWORD_LEN);
        assert_eq!(creds.permissions.subscribe, vec!["cell.default.s-0.inbox"]);
        // Deduplicated peer inbox plus own outbox and events subjects.
        assert_eq!(
            creds.permissions.publish,
            vec![
                "cell.default.h-0.inbox".to_string(),
                "cell.default.s-0.outbox".to_string(),
                "cell.events.default.s-0".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_validate_access() {
        let (service, _) = service().await;
        service.generate("s-0", "default", &["h-0".to_string()]).await.unwrap();

        assert!(service
            .validate_access("s-0", "cell.default.h-0.inbox", BusOp::Publish)
            .await
            .unwrap());
        assert!(service
            .validate_access("s-0", "cell.default.s-0.outbox", BusOp::Publish)
            .await
            .unwrap());
        // No route to a sibling spoke.
        assert!(!service
            .validate_access("s-0", "cell.default.s-1.inbox", BusOp::Publish)
            .await
            .unwrap());
        assert!(service
            .validate_access("s-0", "cell.default.s-0.inbox", BusOp::Subscribe)
            .await
            .unwrap());
        assert!(!service
            .validate_access("s-0", "cell.default.h-0.inbox", BusOp::Subscribe)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_regeneration_rotates() {
        let (service, store) = service().await;
        let first = service.generate("a", "default", &[]).await.unwrap();
        let second = service.generate("a", "default", &[]).await.unwrap();
        assert_ne!(first.password, second.password);

        let active = store.get_active("a").await.unwrap().unwrap();
        assert_eq!(active.password, second.password);
        let all = store.list("default").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_credentials_error() {
        let (service, _) = service().await;
        let err = service
            .validate_access("ghost", "cell.default.x.inbox", BusOp::Publish)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NotFound { .. }));
    }

    #[test]
    fn test_password_charset() {
        let password = generate_password();
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
