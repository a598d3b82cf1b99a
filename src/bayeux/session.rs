//! Per-client Bayeux sessions.
//!
//! A [`Session`] is the mailbox between the pub/sub tree and one client: it
//! implements the [`Subscriber`] sink, renders node events into wire
//! messages, and buffers them in a FIFO queue bounded jointly by a count
//! and a byte cap (oldest events dropped first). At most one long-poll
//! response waits on a session at a time; [`Session::wait_for_events`]
//! hands out a consume-once [`oneshot`] receiver that fires when events are
//! ready to be drained, so a woken response collects everything enqueued up
//! to the moment it resumes.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::config::Configuration;
use crate::pubsub::adapter::{SubscribeFailure, Subscriber};
use crate::pubsub::delta::json_size;
use crate::pubsub::node::{Node, NodeName};
use crate::pubsub::root::Root;

use super::channel::{channel_from_node_name, node_name_from_channel};

/// How a parked response gets woken.
#[derive(Debug, PartialEq, Eq)]
pub enum Wake {
    /// Events are ready; drain them with [`Session::events`]. A hurry or a
    /// poll timeout may leave nothing to drain.
    Notified,
    /// Another response parked on the same session; this one lost.
    SecondConnection,
}

/// Outcome of [`Session::wait_for_events`].
pub enum WaitResult {
    /// Events were already queued; no reference to the caller is kept.
    Ready(Vec<Value>),
    /// Nothing queued; the receiver fires on the next wake.
    Park(oneshot::Receiver<Wake>),
}

struct QueuedEvent {
    event: Value,
    size: usize,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<QueuedEvent>,
    queue_size: usize,
    waiting: Option<oneshot::Sender<Wake>>,
    /// Channel text and request id of subscriptions awaiting their ack.
    pending: HashMap<NodeName, PendingSubscription>,
}

struct PendingSubscription {
    channel: String,
    id: Option<Value>,
}

/// One client's session: subscriptions, event queue and long-poll slot.
pub struct Session {
    session_id: String,
    root: Arc<Root>,
    config: Arc<Configuration>,
    inner: Mutex<Inner>,
}

impl Session {
    /// Create a session.
    #[must_use]
    pub fn new(session_id: String, root: Arc<Root>, config: Arc<Configuration>) -> Arc<Self> {
        Arc::new(Session {
            session_id,
            root,
            config,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// The session's id, as carried in `clientId` fields.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Subscribe to a data channel.
    ///
    /// The acknowledgment (and any initial data event) arrives through the
    /// event queue once the registry has an answer. A channel that does not
    /// name a node is rejected immediately with `invalid subscription`.
    pub fn subscribe(self: &Arc<Self>, channel: &str, id: Option<Value>) {
        match node_name_from_channel(channel) {
            Ok(name) => {
                self.inner.lock().pending.insert(
                    name.clone(),
                    PendingSubscription {
                        channel: channel.to_string(),
                        id,
                    },
                );
                self.root
                    .subscribe(self.clone() as Arc<dyn Subscriber>, name);
            }
            Err(_) => {
                self.enqueue(self.subscribe_ack(
                    channel,
                    &id,
                    Some(SubscribeFailure::Invalid.reason()),
                ));
            }
        }
    }

    /// Unsubscribe from a data channel.
    ///
    /// Answers `not subscribed` when no link exists; a link whose subscribe
    /// is still unacknowledged is acknowledged as a success first.
    pub fn unsubscribe(self: &Arc<Self>, channel: &str, id: Option<Value>) {
        let name = node_name_from_channel(channel).unwrap_or_default();
        let subscriber = self.clone() as Arc<dyn Subscriber>;
        let found = !name.is_empty() && self.root.unsubscribe(&subscriber, &name);

        let mut ack = json!({
            "channel": "/meta/unsubscribe",
            "clientId": self.session_id,
            "subscription": channel,
            "successful": found,
        });
        if !found {
            ack["error"] = json!("not subscribed");
        }
        if let Some(id) = id {
            ack["id"] = id;
        }
        self.enqueue(ack);
    }

    /// Forward a published message to the adapter.
    ///
    /// # Errors
    ///
    /// Propagates the adapter's error text; it becomes the reply's `error`
    /// field. An adapter panic is caught and reported as `internal error`,
    /// without tearing the server down.
    pub async fn publish(
        &self,
        channel: &str,
        data: &Value,
        message: &Value,
    ) -> Result<(), String> {
        let call = self
            .root
            .adapter()
            .publish(channel, data, message, &self.session_id);

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                error!(channel = %channel, "adapter panicked while publishing");
                Err("internal error".to_string())
            }
        }
    }

    /// Drain and return all pending events.
    #[must_use]
    pub fn events(&self) -> Vec<Value> {
        let mut inner = self.inner.lock();
        inner.queue_size = 0;
        inner.queue.drain(..).map(|queued| queued.event).collect()
    }

    /// Return queued events immediately, or park the caller.
    ///
    /// A previously parked response is woken with
    /// [`Wake::SecondConnection`] and replaced.
    #[must_use]
    pub fn wait_for_events(&self) -> WaitResult {
        let mut inner = self.inner.lock();

        if !inner.queue.is_empty() {
            inner.queue_size = 0;
            let events = inner.queue.drain(..).map(|queued| queued.event).collect();
            return WaitResult::Ready(events);
        }

        if let Some(previous) = inner.waiting.take() {
            debug!(session_id = %self.session_id, "second connection detected");
            let _ = previous.send(Wake::SecondConnection);
        }

        let (tx, rx) = oneshot::channel();
        inner.waiting = Some(tx);
        WaitResult::Park(rx)
    }

    /// Wake a parked response with whatever is queued, possibly nothing.
    ///
    /// Called when a later request on the same session needs the parked
    /// response flushed first.
    pub fn hurry(&self) {
        self.wake_waiting();
    }

    /// Wake a parked response after the poll timeout with an empty batch.
    pub fn timeout(&self) {
        self.wake_waiting();
    }

    /// Tear the session down: cancel all subscriptions, wake any parked
    /// response and drop buffered state.
    pub fn close(self: &Arc<Self>) {
        self.root
            .unsubscribe_all(&(self.clone() as Arc<dyn Subscriber>));

        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.queue.clear();
        inner.queue_size = 0;
        if let Some(waiting) = inner.waiting.take() {
            let _ = waiting.send(Wake::Notified);
        }
    }

    fn wake_waiting(&self) {
        let mut inner = self.inner.lock();
        if let Some(waiting) = inner.waiting.take() {
            // Queued events stay queued; the woken response drains them.
            let _ = waiting.send(Wake::Notified);
        }
    }

    fn enqueue(&self, event: Value) {
        let mut inner = self.inner.lock();

        let size = json_size(&event);
        inner.queue.push_back(QueuedEvent { event, size });
        inner.queue_size += size;

        let max_count = self.config.get_max_messages_per_client();
        let max_size = self.config.get_max_messages_size_per_client();
        while !inner.queue.is_empty()
            && (inner.queue.len() > max_count || inner.queue_size > max_size)
        {
            if let Some(dropped) = inner.queue.pop_front() {
                inner.queue_size -= dropped.size;
            }
        }

        if let Some(waiting) = inner.waiting.take() {
            // A dead receiver just leaves the event queued for the next
            // poll.
            let _ = waiting.send(Wake::Notified);
        }
    }

    fn subscribe_ack(&self, channel: &str, id: &Option<Value>, error: Option<&str>) -> Value {
        let mut ack = json!({
            "channel": "/meta/subscribe",
            "clientId": self.session_id,
            "subscription": channel,
            "successful": error.is_none(),
        });
        if let Some(error) = error {
            ack["error"] = json!(error);
        }
        if let Some(id) = id {
            ack["id"] = id.clone();
        }
        ack
    }
}

impl Subscriber for Session {
    fn on_update(&self, name: &NodeName, node: &Node) {
        // Node values shaped `{"data": .., "id": ..}` carry an explicit
        // payload and correlation id; anything else is the payload itself.
        let (payload, id) = match node.data() {
            Value::Object(object) if object.contains_key("data") => (
                object.get("data").cloned().unwrap_or(Value::Null),
                object.get("id").cloned(),
            ),
            other => (other.clone(), None),
        };

        let mut event = json!({
            "channel": channel_from_node_name(name),
            "data": payload,
        });
        if let Some(id) = id {
            event["id"] = id;
        }
        self.enqueue(event);
    }

    fn on_subscribed(&self, name: &NodeName) {
        let pending = self.inner.lock().pending.remove(name);
        let (channel, id) = match pending {
            Some(pending) => (pending.channel, pending.id),
            None => (channel_from_node_name(name), None),
        };
        self.enqueue(self.subscribe_ack(&channel, &id, None));
    }

    fn on_subscribe_failed(&self, name: &NodeName, reason: SubscribeFailure) {
        let pending = self.inner.lock().pending.remove(name);
        let (channel, id) = match pending {
            Some(pending) => (pending.channel, pending.id),
            None => (channel_from_node_name(name), None),
        };
        self.enqueue(self.subscribe_ack(&channel, &id, Some(reason.reason())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::adapter::Adapter;
    use crate::pubsub::node::{Key, NodeVersion};
    use async_trait::async_trait;

    struct NullAdapter;

    #[async_trait]
    impl Adapter for NullAdapter {
        async fn validate(&self, _name: &NodeName) -> bool {
            false
        }

        async fn authorize(&self, _subscriber: &Arc<dyn Subscriber>, _name: &NodeName) -> bool {
            false
        }

        async fn initialize(&self, _name: &NodeName) -> Option<Value> {
            None
        }

        async fn publish(
            &self,
            _channel: &str,
            _data: &Value,
            _message: &Value,
            _session_id: &str,
        ) -> Result<(), String> {
            Ok(())
        }
    }

    fn session_with(config: Configuration) -> Arc<Session> {
        let root = Root::new(Arc::new(NullAdapter), crate::pubsub::Configuration::new());
        Session::new("sss".to_string(), root, Arc::new(config))
    }

    fn session() -> Arc<Session> {
        session_with(Configuration::new())
    }

    fn name_ab() -> NodeName {
        let mut name = NodeName::new();
        name.add(Key::new("a", "b"));
        name
    }

    fn node(data: Value) -> Node {
        Node::new(NodeVersion::from_number(1), data)
    }

    #[test]
    fn update_event_carries_channel_and_data() {
        let session = session();
        session.on_update(&name_ab(), &node(json!({ "data": 1 })));

        assert_eq!(
            session.events(),
            vec![json!({ "channel": "/a/b", "data": 1 })]
        );
        assert!(session.events().is_empty());
    }

    #[test]
    fn update_event_extracts_embedded_id() {
        let session = session();
        session.on_update(&name_ab(), &node(json!({ "data": 2, "id": "foo" })));

        assert_eq!(
            session.events(),
            vec![json!({ "channel": "/a/b", "data": 2, "id": "foo" })]
        );
    }

    #[test]
    fn plain_values_are_the_payload() {
        let session = session();
        session.on_update(&name_ab(), &node(json!(42)));

        assert_eq!(
            session.events(),
            vec![json!({ "channel": "/a/b", "data": 42 })]
        );
    }

    #[test]
    fn events_preserve_fifo_order() {
        let session = session();
        session.on_update(&name_ab(), &node(json!({ "data": 1 })));
        session.on_update(&name_ab(), &node(json!({ "data": 2, "id": "foo" })));

        assert_eq!(
            session.events(),
            vec![
                json!({ "channel": "/a/b", "data": 1 }),
                json!({ "channel": "/a/b", "data": 2, "id": "foo" }),
            ]
        );
    }

    #[test]
    fn count_cap_drops_oldest() {
        let session = session_with(Configuration::new().max_messages_per_client(2));
        for n in 1..=3 {
            session.on_update(&name_ab(), &node(json!({ "data": n })));
        }

        assert_eq!(
            session.events(),
            vec![
                json!({ "channel": "/a/b", "data": 2 }),
                json!({ "channel": "/a/b", "data": 3 }),
            ]
        );
    }

    #[test]
    fn size_cap_drops_oldest() {
        let event_size = json_size(&json!({ "channel": "/a/b", "data": 0 }));
        let session =
            session_with(Configuration::new().max_messages_size_per_client(2 * event_size));

        for n in 0..5 {
            session.on_update(&name_ab(), &node(json!({ "data": n })));
        }

        let events = session.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["data"], json!(3));
        assert_eq!(events[1]["data"], json!(4));
    }

    #[test]
    fn waiting_response_is_notified_of_new_events() {
        let session = session();

        let WaitResult::Park(mut rx) = session.wait_for_events() else {
            panic!("queue should be empty");
        };

        session.on_update(&name_ab(), &node(json!({ "data": 1 })));

        assert!(matches!(rx.try_recv(), Ok(Wake::Notified)));
        assert_eq!(
            session.events(),
            vec![json!({ "channel": "/a/b", "data": 1 })]
        );
    }

    #[test]
    fn woken_response_collects_the_whole_batch() {
        let session = session();

        let WaitResult::Park(mut rx) = session.wait_for_events() else {
            panic!("queue should be empty");
        };

        // Two events land before the woken response gets to drain.
        session.on_update(&name_ab(), &node(json!({ "data": 1 })));
        session.on_update(&name_ab(), &node(json!({ "data": 2 })));

        assert!(matches!(rx.try_recv(), Ok(Wake::Notified)));
        assert_eq!(session.events().len(), 2);
    }

    #[test]
    fn queued_events_short_circuit_waiting() {
        let session = session();
        session.on_update(&name_ab(), &node(json!({ "data": 1 })));

        let WaitResult::Ready(events) = session.wait_for_events() else {
            panic!("expected ready events");
        };
        assert_eq!(events, vec![json!({ "channel": "/a/b", "data": 1 })]);
    }

    #[test]
    fn second_connection_displaces_first() {
        let session = session();

        let WaitResult::Park(mut first) = session.wait_for_events() else {
            panic!("expected park");
        };
        let WaitResult::Park(mut second) = session.wait_for_events() else {
            panic!("expected park");
        };

        assert!(matches!(first.try_recv(), Ok(Wake::SecondConnection)));

        session.on_update(&name_ab(), &node(json!({ "data": 1 })));
        assert!(matches!(second.try_recv(), Ok(Wake::Notified)));
        assert_eq!(session.events().len(), 1);
    }

    #[test]
    fn hurry_wakes_with_empty_batch() {
        let session = session();

        let WaitResult::Park(mut rx) = session.wait_for_events() else {
            panic!("expected park");
        };
        session.hurry();

        assert!(matches!(rx.try_recv(), Ok(Wake::Notified)));
        assert!(session.events().is_empty());
    }

    #[test]
    fn timeout_wakes_with_empty_batch() {
        let session = session();

        let WaitResult::Park(mut rx) = session.wait_for_events() else {
            panic!("expected park");
        };
        session.timeout();

        assert!(matches!(rx.try_recv(), Ok(Wake::Notified)));
        assert!(session.events().is_empty());
    }

    #[test]
    fn dropped_receiver_keeps_events_queued() {
        let session = session();

        let WaitResult::Park(rx) = session.wait_for_events() else {
            panic!("expected park");
        };
        drop(rx);

        session.on_update(&name_ab(), &node(json!({ "data": 1 })));
        assert_eq!(session.events().len(), 1);
    }

    #[test]
    fn close_wakes_waiting_response_empty() {
        let session = session();

        let WaitResult::Park(mut rx) = session.wait_for_events() else {
            panic!("expected park");
        };
        session.close();

        assert!(matches!(rx.try_recv(), Ok(Wake::Notified)));
        assert!(session.events().is_empty());
    }
}
