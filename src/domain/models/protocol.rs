//! Interaction protocols as table-driven state machines.
//!
//! A protocol constrains the message triggers a directed cell pair may
//! exchange. Sessions are instantiated per `(from, to, protocol)` and live
//! until they reach a terminal state or time out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named protocol state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolState {
    pub name: String,
    #[serde(default)]
    pub terminal: bool,
}

/// One edge of the protocol state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolTransition {
    pub from: String,
    pub to: String,
    pub trigger: String,
    /// Role that may fire this trigger; `None` means any participant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// A complete protocol definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSpec {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub states: Vec<ProtocolState>,
    pub initial: String,
    pub transitions: Vec<ProtocolTransition>,
    /// Session expiry; a timed-out session denies further messages.
    #[serde(default = "default_session_timeout")]
    pub timeout_seconds: u64,
}

fn default_session_timeout() -> u64 {
    3600
}

impl ProtocolSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("protocol name must not be empty".to_string());
        }
        if self.states.is_empty() {
            return Err(format!("protocol '{}' declares no states", self.name));
        }
        let state_names: std::collections::BTreeSet<&str> =
            self.states.iter().map(|s| s.name.as_str()).collect();
        if state_names.len() != self.states.len() {
            return Err(format!("protocol '{}' has duplicate states", self.name));
        }
        if !state_names.contains(self.initial.as_str()) {
            return Err(format!(
                "protocol '{}' initial state '{}' is not declared",
                self.name, self.initial
            ));
        }
        for t in &self.transitions {
            if !state_names.contains(t.from.as_str()) || !state_names.contains(t.to.as_str()) {
                return Err(format!(
                    "protocol '{}' transition {}->{} references undeclared states",
                    self.name, t.from, t.to
                ));
            }
        }
        if self.timeout_seconds == 0 {
            return Err(format!("protocol '{}' timeout must be positive", self.name));
        }
        Ok(())
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        self.states.iter().any(|s| s.name == state && s.terminal)
    }

    /// The transition out of `state` fired by `trigger`, if any.
    pub fn transition(&self, state: &str, trigger: &str) -> Option<&ProtocolTransition> {
        self.transitions.iter().find(|t| t.from == state && t.trigger == trigger)
    }

    /// All triggers legal in `state`, for diagnostics.
    pub fn allowed_triggers(&self, state: &str) -> Vec<&str> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.trigger.as_str())
            .collect()
    }
}

/// One fired trigger in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStep {
    pub trigger: String,
    pub state: String,
    pub at: DateTime<Utc>,
}

/// A live protocol session for one directed cell pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSession {
    pub from_cell: String,
    pub to_cell: String,
    pub protocol: String,
    pub state: String,
    pub history: Vec<SessionStep>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ProtocolSession {
    pub fn new(from_cell: impl Into<String>, to_cell: impl Into<String>, spec: &ProtocolSpec) -> Self {
        let now = Utc::now();
        Self {
            from_cell: from_cell.into(),
            to_cell: to_cell.into(),
            protocol: spec.name.clone(),
            state: spec.initial.clone(),
            history: Vec::new(),
            started_at: now,
            last_activity: now,
        }
    }

    pub fn is_expired(&self, spec: &ProtocolSpec, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.last_activity);
        age.num_seconds() >= 0 && age.num_seconds() as u64 >= spec.timeout_seconds
    }

    /// Advance to `next_state` recording the trigger.
    pub fn advance(&mut self, trigger: &str, next_state: &str) {
        let now = Utc::now();
        self.state = next_state.to_string();
        self.history.push(SessionStep {
            trigger: trigger.to_string(),
            state: next_state.to_string(),
            at: now,
        });
        self.last_activity = now;
    }
}

fn state(name: &str, terminal: bool) -> ProtocolState {
    ProtocolState { name: name.to_string(), terminal }
}

fn transition(from: &str, to: &str, trigger: &str, role: Option<&str>) -> ProtocolTransition {
    ProtocolTransition {
        from: from.to_string(),
        to: to.to_string(),
        trigger: trigger.to_string(),
        role: role.map(str::to_string),
    }
}

/// Contract-net style negotiation: propose, accept, confirm, deliver.
pub fn contract_protocol() -> ProtocolSpec {
    ProtocolSpec {
        name: "contract".to_string(),
        roles: vec!["initiator".to_string(), "contractor".to_string()],
        states: vec![
            state("start", false),
            state("proposed", false),
            state("accepted", false),
            state("confirmed", false),
            state("delivered", true),
            state("rejected", true),
        ],
        initial: "start".to_string(),
        transitions: vec![
            transition("start", "proposed", "propose", Some("initiator")),
            transition("proposed", "accepted", "accept", Some("contractor")),
            transition("proposed", "rejected", "reject", Some("contractor")),
            transition("accepted", "confirmed", "confirm", Some("initiator")),
            transition("confirmed", "delivered", "deliver", Some("contractor")),
        ],
        timeout_seconds: 3600,
    }
}

/// Structured argumentation ending in a vote.
pub fn deliberation_protocol() -> ProtocolSpec {
    ProtocolSpec {
        name: "deliberation".to_string(),
        roles: vec!["moderator".to_string(), "participant".to_string()],
        states: vec![
            state("start", false),
            state("deliberating", false),
            state("voting", false),
            state("resolved", true),
        ],
        initial: "start".to_string(),
        transitions: vec![
            transition("start", "deliberating", "propose", None),
            transition("deliberating", "deliberating", "argue", None),
            transition("deliberating", "voting", "call_vote", Some("moderator")),
            transition("voting", "voting", "vote", None),
            transition("voting", "resolved", "resolve", Some("moderator")),
        ],
        timeout_seconds: 3600,
    }
}

/// Single-round auction: announce, bid, award, close.
pub fn auction_protocol() -> ProtocolSpec {
    ProtocolSpec {
        name: "auction".to_string(),
        roles: vec!["auctioneer".to_string(), "bidder".to_string()],
        states: vec![
            state("start", false),
            state("open", false),
            state("awarded", false),
            state("closed", true),
        ],
        initial: "start".to_string(),
        transitions: vec![
            transition("start", "open", "announce", Some("auctioneer")),
            transition("open", "open", "bid", Some("bidder")),
            transition("open", "awarded", "award", Some("auctioneer")),
            transition("awarded", "closed", "close", Some("auctioneer")),
        ],
        timeout_seconds: 1800,
    }
}

/// All protocols registered out of the box.
pub fn builtin_protocols() -> Vec<ProtocolSpec> {
    vec![contract_protocol(), deliberation_protocol(), auction_protocol()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_valid() {
        for spec in builtin_protocols() {
            assert!(spec.validate().is_ok(), "{} should validate", spec.name);
        }
    }

    #[test]
    fn test_contract_walk() {
        let spec = contract_protocol();
        let mut session = ProtocolSession::new("a", "b", &spec);
        assert_eq!(session.state, "start");

        // deliver is illegal in start; propose is the only option.
        assert!(spec.transition("start", "deliver").is_none());
        assert_eq!(spec.allowed_triggers("start"), vec!["propose"]);

        for (trigger, expected) in [
            ("propose", "proposed"),
            ("accept", "accepted"),
            ("confirm", "confirmed"),
            ("deliver", "delivered"),
        ] {
            let t = spec.transition(&session.state, trigger).expect("legal trigger");
            let to = t.to.clone();
            session.advance(trigger, &to);
            assert_eq!(session.state, expected);
        }
        assert!(spec.is_terminal(&session.state));
        assert_eq!(session.history.len(), 4);
    }

    #[test]
    fn test_session_expiry() {
        let spec = contract_protocol();
        let mut session = ProtocolSession::new("a", "b", &spec);
        let later = session.last_activity + chrono::Duration::seconds(3601);
        assert!(session.is_expired(&spec, later));
        session.last_activity = Utc::now();
        assert!(!session.is_expired(&spec, Utc::now()));
    }

    #[test]
    fn test_validation_catches_dangling_states() {
        let mut spec = contract_protocol();
        spec.transitions.push(transition("confirmed", "ghost", "haunt", None));
        assert!(spec.validate().is_err());

        let mut spec = contract_protocol();
        spec.initial = "ghost".to_string();
        assert!(spec.validate().is_err());
    }
}
