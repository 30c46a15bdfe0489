//! In-memory message bus.
//!
//! Single-process pub/sub with the same wildcard semantics as the external
//! broker. Used in tests and single-node deployments; the broker behind the
//! port is otherwise a deployment choice.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::domain::errors::ControlResult;
use crate::domain::models::envelope::Envelope;
use crate::domain::ports::message_bus::{BusMessage, MessageBus, Subscription};
use crate::services::subject::subject_matches;

struct Subscriber {
    pattern: String,
    sender: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
pub struct InMemoryBus {
    subscribers: std::sync::Mutex<Vec<Subscriber>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions, for tests and introspection.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: &str, envelope: &Envelope) -> ControlResult<()> {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Drop subscribers whose receivers are gone while delivering.
        subscribers.retain(|subscriber| {
            if subscriber.sender.is_closed() {
                return false;
            }
            if subject_matches(&subscriber.pattern, subject) {
                let message = BusMessage {
                    subject: subject.to_string(),
                    envelope: envelope.clone(),
                };
                return subscriber.sender.send(message).is_ok();
            }
            true
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> ControlResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Subscriber { pattern: pattern.to_string(), sender });
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_exact_subject_delivery() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("cell.default.a.inbox").await.unwrap();
        bus.publish("cell.default.a.inbox", &Envelope::message("x", "a", "hi"))
            .await
            .unwrap();
        bus.publish("cell.default.b.inbox", &Envelope::message("x", "b", "no"))
            .await
            .unwrap();

        let message = sub.next().await.unwrap();
        assert_eq!(message.subject, "cell.default.a.inbox");
        assert_eq!(message.envelope.content(), Some("hi"));
    }

    #[tokio::test]
    async fn test_wildcard_subscription() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("cell.events.>").await.unwrap();
        bus.publish(
            "cell.events.default.a",
            &Envelope::message("controller", "observers", "started"),
        )
        .await
        .unwrap();
        let message = sub.next().await.unwrap();
        assert_eq!(message.subject, "cell.events.default.a");
    }

    #[tokio::test]
    async fn test_dropped_subscribers_pruned() {
        let bus = InMemoryBus::new();
        {
            let _sub = bus.subscribe("a.b").await.unwrap();
            assert_eq!(bus.subscriber_count(), 1);
        }
        // Receiver dropped; next publish prunes it.
        bus.publish("a.b", &Envelope::message("x", "y", "z")).await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_fan_out() {
        let bus = InMemoryBus::new();
        let mut first = bus.subscribe("t.*").await.unwrap();
        let mut second = bus.subscribe("t.>").await.unwrap();
        bus.publish("t.x", &Envelope::message("a", "b", "m")).await.unwrap();
        assert!(first.next().await.is_some());
        assert!(second.next().await.is_some());
    }
}
