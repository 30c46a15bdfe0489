//! Credential store port.

use async_trait::async_trait;

use crate::domain::errors::ControlResult;
use crate::domain::models::credentials::NatsCredentials;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Revoke any active record for the cell and insert the replacement,
    /// atomically.
    async fn rotate(&self, credentials: &NatsCredentials) -> ControlResult<()>;

    /// The single active (unrevoked) record for a cell.
    async fn get_active(&self, cell_id: &str) -> ControlResult<Option<NatsCredentials>>;

    /// Mark the active record revoked. Returns whether one existed.
    async fn revoke(&self, cell_id: &str) -> ControlResult<bool>;

    /// All records (active and revoked) for a namespace.
    async fn list(&self, namespace: &str) -> ControlResult<Vec<NatsCredentials>>;
}
