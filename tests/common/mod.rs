//! Shared test fixtures: a programmable adapter and small helpers.
//!
//! The adapter answers nothing until a test provides an answer, so both the
//! synchronous path (answer set before the subscription) and the deferred
//! path (answer set afterwards) are exercised with the same fixture.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bayeux_rs::pubsub::{Adapter, Subscriber};
use bayeux_rs::{node_name_from_channel, NodeName};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;

#[derive(Clone)]
enum InitAnswer {
    Value(Value),
    Skip,
}

#[derive(Default)]
struct State {
    validation: HashMap<NodeName, bool>,
    authorization: HashMap<NodeName, bool>,
    initialization: HashMap<NodeName, InitAnswer>,
    handshake_error: Option<String>,
    publish_error: Option<String>,
    publish_panics: bool,
    publishes: Vec<Value>,
}

/// Adapter whose answers are scripted by the test.
pub struct TestAdapter {
    state: Mutex<State>,
    version: watch::Sender<u64>,
}

impl TestAdapter {
    pub fn new() -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new(TestAdapter {
            state: Mutex::new(State::default()),
            version,
        })
    }

    pub fn answer_validation_request(&self, name: NodeName, answer: bool) {
        self.state.lock().validation.insert(name, answer);
        self.bump();
    }

    pub fn answer_authorization_request(&self, name: NodeName, answer: bool) {
        self.state.lock().authorization.insert(name, answer);
        self.bump();
    }

    pub fn answer_initialization_request(&self, name: NodeName, value: Value) {
        self.state
            .lock()
            .initialization
            .insert(name, InitAnswer::Value(value));
        self.bump();
    }

    pub fn skip_initialization_request(&self, name: NodeName) {
        self.state
            .lock()
            .initialization
            .insert(name, InitAnswer::Skip);
        self.bump();
    }

    pub fn reject_handshakes(&self, error: &str) {
        self.state.lock().handshake_error = Some(error.to_string());
    }

    pub fn reject_publishes(&self, error: &str) {
        self.state.lock().publish_error = Some(error.to_string());
    }

    pub fn panic_on_publish(&self) {
        self.state.lock().publish_panics = true;
    }

    /// All publish calls seen so far, oldest first.
    pub fn publishes(&self) -> Vec<Value> {
        self.state.lock().publishes.clone()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    async fn wait_for<T: Clone>(&self, lookup: impl Fn(&State) -> Option<T>) -> T {
        let mut receiver = self.version.subscribe();
        loop {
            if let Some(answer) = lookup(&self.state.lock()) {
                return answer;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[async_trait]
impl Adapter for TestAdapter {
    async fn validate(&self, name: &NodeName) -> bool {
        self.wait_for(|state| state.validation.get(name).copied())
            .await
    }

    async fn authorize(&self, _subscriber: &Arc<dyn Subscriber>, name: &NodeName) -> bool {
        self.wait_for(|state| state.authorization.get(name).copied())
            .await
    }

    async fn initialize(&self, name: &NodeName) -> Option<Value> {
        let answer = self
            .wait_for(|state| state.initialization.get(name).cloned())
            .await;
        match answer {
            InitAnswer::Value(value) => Some(value),
            InitAnswer::Skip => None,
        }
    }

    async fn handshake(&self, _ext: Option<&Value>) -> Result<(), String> {
        match self.state.lock().handshake_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn publish(
        &self,
        channel: &str,
        data: &Value,
        message: &Value,
        session_id: &str,
    ) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.publish_panics {
            drop(state);
            panic!("adapter failure");
        }
        state.publishes.push(json!({
            "channel": channel,
            "data": data,
            "message": message,
            "session_id": session_id,
        }));
        match state.publish_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Parse a data channel into a node name, panicking on malformed input.
pub fn node_name(channel: &str) -> NodeName {
    node_name_from_channel(channel).expect("valid channel")
}

/// Let spawned registry pipelines run to completion.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
