//! bayeux_rs: a Bayeux 1.0 long-polling server over a versioned
//! publish/subscribe data tree.
//!
//! The crate has three layers:
//!
//! - **pubsub**: named, versioned JSON nodes with a bounded delta history,
//!   a subscription registry, and the [`Adapter`] seam through which the
//!   embedding application validates, authorizes and initializes
//!   subscriptions and receives published messages.
//! - **bayeux**: the session engine: handshake/connect/subscribe/
//!   unsubscribe/disconnect/publish semantics, per-session event queues
//!   with count and byte caps, and the long-poll parking machinery.
//! - **server**: a thin axum surface decoding the three wire encodings
//!   (JSON body, form body, GET query) into dispatcher batches.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bayeux_rs::{pubsub, Configuration, Connector, Root};
//! # use async_trait::async_trait;
//! # use serde_json::Value;
//! # struct MyAdapter;
//! # #[async_trait]
//! # impl bayeux_rs::Adapter for MyAdapter {
//! #     async fn validate(&self, _: &bayeux_rs::NodeName) -> bool { true }
//! #     async fn authorize(&self, _: &Arc<dyn bayeux_rs::Subscriber>, _: &bayeux_rs::NodeName) -> bool { true }
//! #     async fn initialize(&self, _: &bayeux_rs::NodeName) -> Option<Value> { Some(Value::Null) }
//! #     async fn publish(&self, _: &str, _: &Value, _: &Value, _: &str) -> Result<(), String> { Ok(()) }
//! # }
//!
//! # async fn run() -> std::io::Result<()> {
//! let root = Root::new(Arc::new(MyAdapter), pubsub::Configuration::new());
//! let connector = Connector::new(root, Configuration::new());
//! bayeux_rs::server::serve("0.0.0.0:8080".parse().unwrap(), connector).await
//! # }
//! ```

pub mod bayeux;
pub mod config;
pub mod error;
pub mod pubsub;
pub mod server;

pub use crate::bayeux::{
    channel_from_node_name, node_name_from_channel, Connector, CountingIdGenerator,
    SecureIdGenerator, Session, SessionIdGenerator,
};
pub use crate::config::Configuration;
pub use crate::error::{BayeuxError, Result};
pub use crate::pubsub::{Adapter, Node, NodeName, NodeVersion, Root, SubscribeFailure, Subscriber};
pub use crate::server::router;
