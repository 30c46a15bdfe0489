//! Message bus port.
//!
//! Subject-addressed pub/sub with `*` (single token) and `>` (tail)
//! wildcard subscriptions. The concrete broker is a deployment choice; the
//! in-memory adapter covers single-process deployments and tests.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::domain::errors::ControlResult;
use crate::domain::models::envelope::Envelope;

/// A delivered message: the concrete subject it was published on plus the
/// envelope.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub envelope: Envelope,
}

pub type Subscription = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// Subject-addressed pub/sub.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, envelope: &Envelope) -> ControlResult<()>;

    /// Subscribe with wildcard semantics; the stream yields every message
    /// whose subject matches the pattern from this point on.
    async fn subscribe(&self, pattern: &str) -> ControlResult<Subscription>;
}
