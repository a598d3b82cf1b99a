//! The seams between the pub/sub core and the embedding application.
//!
//! [`Adapter`] is implemented by the host: it decides which nodes exist,
//! who may see them, what their initial value is, and what happens to
//! messages published by clients. Every callback is async; answering from
//! the ready path is the synchronous case, awaiting something else is the
//! deferred case. The core never holds a lock across an adapter call.
//!
//! [`Subscriber`] is the narrow sink the registry pushes node events into;
//! the Bayeux [`crate::bayeux::Session`] is the only implementation in this
//! crate, but anything that wants a feed of node updates can implement it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::node::{Node, NodeName};

/// Why a subscription attempt was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeFailure {
    /// The node name failed validation.
    Invalid,
    /// The subscriber is not allowed to see the node.
    Unauthorized,
    /// The adapter did not provide an initial value.
    Initialization,
}

impl SubscribeFailure {
    /// The client-visible error text for this failure.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            SubscribeFailure::Invalid => "invalid subscription",
            SubscribeFailure::Unauthorized => "authorization failed",
            SubscribeFailure::Initialization => "initialization failed",
        }
    }
}

/// Sink for node events, implemented by subscribing parties.
pub trait Subscriber: Send + Sync {
    /// A subscribed node changed (or delivered its initial value).
    fn on_update(&self, name: &NodeName, node: &Node);

    /// A subscription was established.
    fn on_subscribed(&self, name: &NodeName);

    /// A subscription attempt failed.
    fn on_subscribe_failed(&self, name: &NodeName, reason: SubscribeFailure);
}

/// Application callbacks driven by the pub/sub registry.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Is `name` a well-formed node in this application at all?
    async fn validate(&self, name: &NodeName) -> bool;

    /// May `subscriber` see `name`?
    ///
    /// Skipped entirely when the configuration does not require
    /// authorization.
    async fn authorize(&self, subscriber: &Arc<dyn Subscriber>, name: &NodeName) -> bool;

    /// Provide the initial value for a node that does not exist yet.
    ///
    /// `None` fails the subscription with `initialization failed`;
    /// `Some(Value::Null)` succeeds without producing an initial data event.
    async fn initialize(&self, name: &NodeName) -> Option<Value>;

    /// Inspect a handshake before a session is created.
    ///
    /// Receives the `ext` field of the handshake message, if any. An `Err`
    /// rejects the handshake with the returned text as the client-visible
    /// error.
    async fn handshake(&self, _ext: Option<&Value>) -> Result<(), String> {
        Ok(())
    }

    /// A client published `data` on a non-meta channel.
    ///
    /// `message` is the complete raw Bayeux message, `session_id` identifies
    /// the publishing session. An `Err` surfaces as the reply's `error`
    /// field.
    async fn publish(
        &self,
        channel: &str,
        data: &Value,
        message: &Value,
        session_id: &str,
    ) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_are_the_wire_strings() {
        assert_eq!(SubscribeFailure::Invalid.reason(), "invalid subscription");
        assert_eq!(
            SubscribeFailure::Unauthorized.reason(),
            "authorization failed"
        );
        assert_eq!(
            SubscribeFailure::Initialization.reason(),
            "initialization failed"
        );
    }
}
