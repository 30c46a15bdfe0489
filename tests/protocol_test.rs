//! Contract protocol enforcement end to end.

mod common;

use cellplane::domain::errors::ControlError;
use cellplane::domain::models::envelope::{Envelope, MessageType};
use cellplane::domain::ports::message_bus::MessageBus;
use common::harness;

fn protocol_message(from: &str, to: &str, trigger: &str) -> Envelope {
    Envelope::new(
        from,
        to,
        MessageType::Message,
        serde_json::json!({
            "content": format!("{} message", trigger),
            "protocol": "contract",
            "trigger": trigger,
        }),
    )
}

#[tokio::test]
async fn test_contract_protocol_enforcement() {
    let h = harness().await;

    // deliver before the handshake: denied, with the reason listing the
    // legal trigger.
    let verdict = h.enforcer.validate_message("a", "b", "deliver", Some("contract"));
    assert!(!verdict.allowed);
    assert!(verdict.reason.as_ref().unwrap().contains("propose"));

    for trigger in ["propose", "accept", "confirm"] {
        let verdict = h.enforcer.validate_message("a", "b", trigger, Some("contract"));
        assert!(verdict.allowed, "{trigger} should be legal in sequence");
    }

    let verdict = h.enforcer.validate_message("a", "b", "deliver", Some("contract"));
    assert!(verdict.allowed);
    assert_eq!(verdict.protocol_state.as_deref(), Some("delivered"));
}

#[tokio::test]
async fn test_protocol_enforced_on_the_bus() {
    let h = harness().await;
    // Both peers hold credentials routing them to each other.
    h.credentials.generate("a", "default", &["b".to_string()]).await.unwrap();
    h.credentials.generate("b", "default", &["a".to_string()]).await.unwrap();

    let err = h
        .guarded_bus
        .publish("cell.default.b.inbox", &protocol_message("a", "b", "deliver"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ProtocolViolation(_)));

    for trigger in ["propose", "accept", "confirm", "deliver"] {
        h.guarded_bus
            .publish("cell.default.b.inbox", &protocol_message("a", "b", trigger))
            .await
            .unwrap();
    }

    // The completed session is replaced: a fresh proposal is legal again.
    h.guarded_bus
        .publish("cell.default.b.inbox", &protocol_message("a", "b", "propose"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_free_form_messages_untouched() {
    let h = harness().await;
    h.credentials.generate("a", "default", &["b".to_string()]).await.unwrap();

    h.guarded_bus
        .publish("cell.default.b.inbox", &Envelope::message("a", "b", "just chatting"))
        .await
        .unwrap();
}
