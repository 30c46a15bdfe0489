//! Permission- and protocol-enforcing bus decorator.
//!
//! Wraps any bus and applies two gates to publishes from cells:
//! credential allow-lists (topology isolation) and, when the envelope
//! names a protocol, the per-route protocol state machine. Senders whose
//! `from` is not a cell identifier (control-plane components use dotted
//! names) pass through untouched.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::credentials::BusOp;
use crate::domain::models::envelope::Envelope;
use crate::domain::models::meta::is_valid_label;
use crate::domain::ports::message_bus::{MessageBus, Subscription};
use crate::services::credential_service::CredentialService;
use crate::services::protocol::ProtocolEnforcer;

pub struct GuardedBus {
    inner: Arc<dyn MessageBus>,
    credentials: Arc<CredentialService>,
    enforcer: Arc<ProtocolEnforcer>,
}

impl GuardedBus {
    pub fn new(
        inner: Arc<dyn MessageBus>,
        credentials: Arc<CredentialService>,
        enforcer: Arc<ProtocolEnforcer>,
    ) -> Self {
        Self { inner, credentials, enforcer }
    }
}

#[async_trait]
impl MessageBus for GuardedBus {
    async fn publish(&self, subject: &str, envelope: &Envelope) -> ControlResult<()> {
        // Cell senders carry bare label identities; everything else is a
        // platform component publishing on its own authority.
        if is_valid_label(&envelope.from) {
            let permitted = self
                .credentials
                .validate_access(&envelope.from, subject, BusOp::Publish)
                .await?;
            if !permitted {
                return Err(ControlError::ProtocolViolation(format!(
                    "cell '{}' may not publish to '{}'",
                    envelope.from, subject
                )));
            }

            if let Some(protocol) = envelope.payload.get("protocol").and_then(|v| v.as_str()) {
                let trigger = envelope
                    .payload
                    .get("trigger")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let verdict = self.enforcer.validate_message(
                    &envelope.from,
                    &envelope.to,
                    trigger,
                    Some(protocol),
                );
                if !verdict.allowed {
                    return Err(ControlError::ProtocolViolation(
                        verdict.reason.unwrap_or_else(|| "message rejected".to_string()),
                    ));
                }
            }
        }

        self.inner.publish(subject, envelope).await
    }

    async fn subscribe(&self, pattern: &str) -> ControlResult<Subscription> {
        self.inner.subscribe(pattern).await
    }
}
