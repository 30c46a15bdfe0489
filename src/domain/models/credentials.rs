//! Per-cell bus credentials with subject-level allow-lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Publish/subscribe subject allow-lists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusPermissions {
    pub publish: Vec<String>,
    pub subscribe: Vec<String>,
}

/// Operation being checked against a permission list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusOp {
    Publish,
    Subscribe,
}

impl BusOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
        }
    }
}

/// One credential record. At most one active (unrevoked) record exists per
/// cell at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatsCredentials {
    pub id: Uuid,
    pub cell_id: String,
    pub namespace: String,
    pub username: String,
    pub password: String,
    pub permissions: BusPermissions,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl NatsCredentials {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }

    /// The permission list that governs `op`.
    pub fn permissions_for(&self, op: BusOp) -> &[String] {
        match op {
            BusOp::Publish => &self.permissions.publish,
            BusOp::Subscribe => &self.permissions.subscribe,
        }
    }
}
