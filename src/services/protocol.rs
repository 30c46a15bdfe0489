//! Protocol enforcer.
//!
//! Validates cell-to-cell message triggers against per-route protocol state
//! machines. Sessions live in memory keyed by `(from, to, protocol)`; a
//! restart loses them and the next message starts a fresh session.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::models::protocol::{builtin_protocols, ProtocolSession, ProtocolSpec};

/// Outcome of validating one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageVerdict {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Session state after the message, when a protocol applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_state: Option<String>,
}

impl MessageVerdict {
    fn allowed(state: Option<String>) -> Self {
        Self { allowed: true, reason: None, protocol_state: state }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()), protocol_state: None }
    }
}

type SessionKey = (String, String, String);

pub struct ProtocolEnforcer {
    protocols: std::sync::RwLock<HashMap<String, ProtocolSpec>>,
    sessions: std::sync::Mutex<HashMap<SessionKey, ProtocolSession>>,
}

impl Default for ProtocolEnforcer {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ProtocolEnforcer {
    /// An enforcer preloaded with the contract, deliberation and auction
    /// protocols.
    pub fn with_builtins() -> Self {
        let enforcer = Self {
            protocols: std::sync::RwLock::new(HashMap::new()),
            sessions: std::sync::Mutex::new(HashMap::new()),
        };
        for spec in builtin_protocols() {
            // Builtins are valid by construction.
            let _ = enforcer.register(spec);
        }
        enforcer
    }

    /// Register a user-defined protocol.
    pub fn register(&self, spec: ProtocolSpec) -> Result<(), String> {
        spec.validate()?;
        self.protocols
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn known_protocols(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .protocols
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Validate a message from `from` to `to` carrying `trigger`.
    ///
    /// Free-form messages (no protocol named) are always allowed. Within a
    /// protocol the trigger must be an outgoing transition of the session's
    /// current state; the session advances on success. A session found in a
    /// terminal state is replaced with a fresh one before validation.
    pub fn validate_message(
        &self,
        from: &str,
        to: &str,
        trigger: &str,
        protocol_name: Option<&str>,
    ) -> MessageVerdict {
        let Some(protocol_name) = protocol_name else {
            return MessageVerdict::allowed(None);
        };

        let protocols = self
            .protocols
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(spec) = protocols.get(protocol_name) else {
            return MessageVerdict::denied(format!("unknown protocol '{}'", protocol_name));
        };

        let key = (from.to_string(), to.to_string(), protocol_name.to_string());
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let session = sessions
            .entry(key.clone())
            .or_insert_with(|| ProtocolSession::new(from, to, spec));

        // A finished conversation starts over.
        if spec.is_terminal(&session.state) {
            *session = ProtocolSession::new(from, to, spec);
        }

        if session.is_expired(spec, Utc::now()) {
            let reason = format!(
                "protocol session '{}' between {} and {} timed out in state '{}'",
                protocol_name, from, to, session.state
            );
            sessions.remove(&key);
            return MessageVerdict::denied(reason);
        }

        match spec.transition(&session.state, trigger) {
            Some(transition) => {
                let next = transition.to.clone();
                session.advance(trigger, &next);
                tracing::debug!(
                    protocol = protocol_name,
                    from,
                    to,
                    trigger,
                    state = %next,
                    "protocol message accepted"
                );
                MessageVerdict::allowed(Some(next))
            }
            None => {
                let mut allowed = spec.allowed_triggers(&session.state);
                allowed.sort_unstable();
                MessageVerdict::denied(format!(
                    "trigger '{}' not allowed in state '{}'; allowed: [{}]",
                    trigger,
                    session.state,
                    allowed.join(", ")
                ))
            }
        }
    }

    /// Snapshot of a live session's state, for diagnostics.
    pub fn session_state(&self, from: &str, to: &str, protocol: &str) -> Option<String> {
        let sessions = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions
            .get(&(from.to_string(), to.to_string(), protocol.to_string()))
            .map(|s| s.state.clone())
    }

    /// Count of live sessions, for diagnostics.
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}
