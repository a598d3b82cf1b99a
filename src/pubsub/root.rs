//! The pub/sub registry: nodes, subscriptions and adapter handshakes.
//!
//! [`Root`] owns every data node and the subscription links between nodes
//! and [`Subscriber`]s. A subscription is registered the moment
//! [`Root::subscribe`] is called and only then driven through the adapter's
//! validate → authorize → initialize pipeline on a spawned task, so an
//! unsubscribe (or session close) racing an unacknowledged subscribe always
//! finds the link. Adapter callbacks are never awaited while the registry
//! lock is held.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::adapter::{Adapter, SubscribeFailure, Subscriber};
use super::config::Configuration;
use super::node::{Node, NodeName, NodeVersion};

/// Identity of a subscriber: thin-pointer identity of its `Arc`.
type SubscriberKey = usize;

fn subscriber_key(subscriber: &Arc<dyn Subscriber>) -> SubscriberKey {
    Arc::as_ptr(subscriber).cast::<()>() as usize
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SubscriptionState {
    /// Registered, adapter pipeline not finished yet.
    Pending,
    /// Acknowledged; receives update fan-out.
    Established,
}

struct SubscriptionEntry {
    key: SubscriberKey,
    subscriber: Arc<dyn Subscriber>,
    state: SubscriptionState,
    generation: u64,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeName, Node>,
    /// Subscribers per node, in subscription order.
    subscriptions: HashMap<NodeName, Vec<SubscriptionEntry>>,
    /// Node names per subscriber, for O(1) teardown on close.
    by_subscriber: HashMap<SubscriberKey, HashSet<NodeName>>,
    next_generation: u64,
}

impl Inner {
    fn entry_position(&self, name: &NodeName, key: SubscriberKey) -> Option<usize> {
        self.subscriptions
            .get(name)?
            .iter()
            .position(|entry| entry.key == key)
    }

    fn remove_entry(&mut self, name: &NodeName, key: SubscriberKey) -> Option<SubscriptionEntry> {
        let entries = self.subscriptions.get_mut(name)?;
        let pos = entries.iter().position(|entry| entry.key == key)?;
        let entry = entries.remove(pos);
        if entries.is_empty() {
            self.subscriptions.remove(name);
        }
        if let Some(names) = self.by_subscriber.get_mut(&key) {
            names.remove(name);
            if names.is_empty() {
                self.by_subscriber.remove(&key);
            }
        }
        Some(entry)
    }

    fn is_pending(&self, name: &NodeName, key: SubscriberKey, generation: u64) -> bool {
        self.entry_position(name, key)
            .map(|pos| {
                let entry = &self.subscriptions[name][pos];
                entry.state == SubscriptionState::Pending && entry.generation == generation
            })
            .unwrap_or(false)
    }
}

/// Owner of the node store and the subscription registry.
pub struct Root {
    adapter: Arc<dyn Adapter>,
    config: Configuration,
    inner: Mutex<Inner>,
}

impl Root {
    /// Create a registry over an adapter.
    #[must_use]
    pub fn new(adapter: Arc<dyn Adapter>, config: Configuration) -> Arc<Self> {
        Arc::new(Root {
            adapter,
            config,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// The adapter this registry talks to.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// Subscribe `subscriber` to `name`.
    ///
    /// The link is registered immediately; the adapter pipeline runs on a
    /// spawned task and reports through the subscriber's lifecycle
    /// callbacks. Re-subscribing an established link re-acknowledges it
    /// without consulting the adapter again.
    pub fn subscribe(self: &Arc<Self>, subscriber: Arc<dyn Subscriber>, name: NodeName) {
        let key = subscriber_key(&subscriber);

        let generation = {
            let mut inner = self.inner.lock();

            if let Some(pos) = inner.entry_position(&name, key) {
                let state = inner.subscriptions[&name][pos].state;
                drop(inner);
                if state == SubscriptionState::Established {
                    subscriber.on_subscribed(&name);
                }
                return;
            }

            let generation = inner.next_generation;
            inner.next_generation += 1;

            inner
                .subscriptions
                .entry(name.clone())
                .or_default()
                .push(SubscriptionEntry {
                    key,
                    subscriber: subscriber.clone(),
                    state: SubscriptionState::Pending,
                    generation,
                });
            inner
                .by_subscriber
                .entry(key)
                .or_default()
                .insert(name.clone());
            generation
        };

        let root = self.clone();
        tokio::spawn(async move {
            root.run_subscription(subscriber, name, key, generation)
                .await;
        });
    }

    /// Remove the link between `subscriber` and `name`.
    ///
    /// Returns `false` when no such link exists. Removing a link whose
    /// subscribe has not been acknowledged yet acknowledges it implicitly as
    /// a success first; the still-running adapter pipeline then finds the
    /// link gone and stops silently.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber>, name: &NodeName) -> bool {
        let key = subscriber_key(subscriber);

        let removed = {
            let mut inner = self.inner.lock();
            inner.remove_entry(name, key)
        };

        match removed {
            Some(entry) => {
                if entry.state == SubscriptionState::Pending {
                    subscriber.on_subscribed(name);
                }
                true
            }
            None => false,
        }
    }

    /// Remove every link of `subscriber` without acknowledgments.
    ///
    /// Used when a session closes; there is nobody left to acknowledge to.
    pub fn unsubscribe_all(&self, subscriber: &Arc<dyn Subscriber>) {
        let key = subscriber_key(subscriber);
        let mut inner = self.inner.lock();

        let Some(names) = inner.by_subscriber.remove(&key) else {
            return;
        };
        for name in names {
            if let Some(entries) = inner.subscriptions.get_mut(&name) {
                entries.retain(|entry| entry.key != key);
                if entries.is_empty() {
                    inner.subscriptions.remove(&name);
                }
            }
        }
    }

    /// Set `name` to `data`, creating the node if needed, and fan the change
    /// out to every established subscriber in subscription order.
    pub fn update_node(&self, name: &NodeName, data: Value) {
        let fan_out = {
            let mut inner = self.inner.lock();

            let changed = match inner.nodes.get_mut(name) {
                Some(node) => node.update(data, self.config.get_keep_update_percent()),
                None => {
                    inner
                        .nodes
                        .insert(name.clone(), Node::new(NodeVersion::new(), data));
                    true
                }
            };

            if !changed {
                return;
            }

            let snapshot = inner.nodes[name].clone();
            let subscribers: Vec<Arc<dyn Subscriber>> = inner
                .subscriptions
                .get(name)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|entry| entry.state == SubscriptionState::Established)
                        .map(|entry| entry.subscriber.clone())
                        .collect()
                })
                .unwrap_or_default();
            (snapshot, subscribers)
        };

        let (snapshot, subscribers) = fan_out;
        debug!(node = %name, version = %snapshot.current_version(), "node updated");
        for subscriber in subscribers {
            subscriber.on_update(name, &snapshot);
        }
    }

    /// Catch-up query against the node's delta ring; see
    /// [`Node::update_from`]. `None` when the node does not exist.
    #[must_use]
    pub fn update_from(&self, name: &NodeName, known_version: NodeVersion) -> Option<(bool, Value)> {
        self.inner
            .lock()
            .nodes
            .get(name)
            .map(|node| node.update_from(known_version))
    }

    /// The node's current version and value, if it exists.
    #[must_use]
    pub fn current(&self, name: &NodeName) -> Option<(NodeVersion, Value)> {
        self.inner
            .lock()
            .nodes
            .get(name)
            .map(|node| (node.current_version(), node.data().clone()))
    }

    async fn run_subscription(
        self: Arc<Self>,
        subscriber: Arc<dyn Subscriber>,
        name: NodeName,
        key: SubscriberKey,
        generation: u64,
    ) {
        if !self.adapter.validate(&name).await {
            self.fail_subscription(&subscriber, &name, key, generation, SubscribeFailure::Invalid);
            return;
        }

        if self.config.is_authorization_required() {
            if !self.inner.lock().is_pending(&name, key, generation) {
                return;
            }
            if !self.adapter.authorize(&subscriber, &name).await {
                self.fail_subscription(
                    &subscriber,
                    &name,
                    key,
                    generation,
                    SubscribeFailure::Unauthorized,
                );
                return;
            }
        }

        if !self.inner.lock().is_pending(&name, key, generation) {
            return;
        }

        let existing = self.inner.lock().nodes.get(&name).cloned();
        let node = match existing {
            Some(node) => node,
            None => {
                let Some(initial) = self.adapter.initialize(&name).await else {
                    self.fail_subscription(
                        &subscriber,
                        &name,
                        key,
                        generation,
                        SubscribeFailure::Initialization,
                    );
                    return;
                };

                let mut inner = self.inner.lock();
                if !inner.is_pending(&name, key, generation) {
                    return;
                }
                // A concurrent subscriber may have initialized the node
                // in the meantime; the first value wins.
                inner
                    .nodes
                    .entry(name.clone())
                    .or_insert_with(|| Node::new(NodeVersion::new(), initial))
                    .clone()
            }
        };

        {
            let mut inner = self.inner.lock();
            let Some(entry) = inner
                .subscriptions
                .get_mut(&name)
                .and_then(|entries| entries.iter_mut().find(|entry| entry.key == key))
            else {
                return;
            };
            if entry.state != SubscriptionState::Pending || entry.generation != generation {
                return;
            }
            entry.state = SubscriptionState::Established;
        }

        subscriber.on_subscribed(&name);
        if !node.data().is_null() {
            subscriber.on_update(&name, &node);
        }
    }

    fn fail_subscription(
        &self,
        subscriber: &Arc<dyn Subscriber>,
        name: &NodeName,
        key: SubscriberKey,
        generation: u64,
        reason: SubscribeFailure,
    ) {
        let removed = {
            let mut inner = self.inner.lock();
            if inner.is_pending(name, key, generation) {
                inner.remove_entry(name, key)
            } else {
                None
            }
        };

        if removed.is_some() {
            debug!(node = %name, reason = reason.reason(), "subscription rejected");
            subscriber.on_subscribe_failed(name, reason);
        }
    }
}
