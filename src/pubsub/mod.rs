//! The versioned publish/subscribe data tree.
//!
//! Nodes are named JSON values with a version counter and a bounded ring of
//! recent deltas ([`node`]). The [`Root`] registry maps node names to
//! subscribers, drives the adapter's validate/authorize/initialize
//! handshakes and fans updates out. The embedding application plugs in
//! through the [`Adapter`] trait; parties interested in updates implement
//! [`Subscriber`].

pub mod adapter;
pub mod config;
pub mod delta;
pub mod node;
pub mod root;

pub use adapter::{Adapter, SubscribeFailure, Subscriber};
pub use config::Configuration;
pub use node::{Key, Node, NodeName, NodeVersion};
pub use root::Root;
