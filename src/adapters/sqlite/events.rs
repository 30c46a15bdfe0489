//! SQLite implementation of the event recorder.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::meta::ResourceKind;
use crate::domain::ports::event_recorder::{EventKind, EventRecord, EventRecorder, ObjectRef};

pub struct SqliteEventRecorder {
    pool: SqlitePool,
}

impl SqliteEventRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRecorder for SqliteEventRecorder {
    async fn emit(
        &self,
        object: ObjectRef,
        kind: EventKind,
        reason: &str,
        message: &str,
    ) -> ControlResult<()> {
        tracing::info!(
            resource = %format!("{}/{}/{}", object.kind, object.namespace, object.name),
            reason,
            message,
            "event"
        );
        sqlx::query(
            r#"INSERT INTO events
               (id, resource_kind, resource_namespace, resource_name, resource_uid,
                event_kind, reason, message, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(object.kind.as_str())
        .bind(&object.namespace)
        .bind(&object.name)
        .bind(object.uid.map(|u| u.to_string()))
        .bind(kind.as_str())
        .bind(reason)
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        limit: u32,
    ) -> ControlResult<Vec<EventRecord>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"SELECT * FROM events
               WHERE resource_kind = ? AND resource_namespace = ? AND resource_name = ?
               ORDER BY created_at DESC, rowid DESC
               LIMIT ?"#,
        )
        .bind(kind.as_str())
        .bind(namespace)
        .bind(name)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EventRow::into_record).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    resource_kind: String,
    resource_namespace: String,
    resource_name: String,
    resource_uid: Option<String>,
    event_kind: String,
    reason: String,
    message: String,
    created_at: String,
}

impl EventRow {
    fn into_record(self) -> ControlResult<EventRecord> {
        let kind = ResourceKind::from_str(&self.resource_kind).ok_or_else(|| {
            ControlError::Serialization(format!("unknown kind '{}'", self.resource_kind))
        })?;
        let event_kind = match self.event_kind.as_str() {
            "normal" => EventKind::Normal,
            "warning" => EventKind::Warning,
            other => {
                return Err(ControlError::Serialization(format!(
                    "unknown event kind '{}'",
                    other
                )))
            }
        };
        Ok(EventRecord {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| ControlError::Serialization(format!("bad event id: {}", e)))?,
            object: ObjectRef {
                kind,
                namespace: self.resource_namespace,
                name: self.resource_name,
                uid: self
                    .resource_uid
                    .as_deref()
                    .map(Uuid::parse_str)
                    .transpose()
                    .map_err(|e| ControlError::Serialization(format!("bad uid: {}", e)))?,
            },
            kind: event_kind,
            reason: self.reason,
            message: self.message,
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
    async fn test_emit_and_list() {
        let recorder = SqliteEventRecorder::new(migrated_test_pool().await.unwrap());
        let object = ObjectRef {
            kind: ResourceKind::Mission,
            namespace: "default".to_string(),
            name: "m1".to_string(),
            uid: Some(Uuid::new_v4()),
        };

        recorder
            .emit(object.clone(), EventKind::Normal, "MissionStarted", "attempt 1")
            .await
            .unwrap();
        recorder
            .emit(object.clone(), EventKind::Warning, "MissionTimeout", "timed out")
            .await
            .unwrap();

        let events = recorder
            .list_for(ResourceKind::Mission, "default", "m1", 10)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        // Newest first.
        assert_eq!(events[0].reason, "MissionTimeout");
        assert_eq!(events[0].kind, EventKind::Warning);
        assert_eq!(events[1].reason, "MissionStarted");
    }
}
