//! Event recorder port.
//!
//! One structured entry per state transition, append-only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::ControlResult;
use crate::domain::models::meta::{ObjectMeta, ResourceKind};

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Normal,
    Warning,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
        }
    }
}

/// Reference to the resource an event is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
}

impl ObjectRef {
    pub fn new(kind: ResourceKind, meta: &ObjectMeta) -> Self {
        Self {
            kind,
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            uid: Some(meta.uid),
        }
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub object: ObjectRef,
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only structured event log.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn emit(
        &self,
        object: ObjectRef,
        kind: EventKind,
        reason: &str,
        message: &str,
    ) -> ControlResult<()>;

    /// Events for one resource, newest first.
    async fn list_for(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        limit: u32,
    ) -> ControlResult<Vec<EventRecord>>;
}
