//! Mapping between Bayeux channel paths and node names.
//!
//! A data channel `/a/b/c/d` names the node `{a: b, c: d}`: path segments
//! alternate between key domains and key values. The path must consist of
//! an even number of non-empty segments; anything else is not a data
//! channel and a subscription to it is rejected as `invalid subscription`.

use crate::error::{BayeuxError, Result};
use crate::pubsub::node::{Key, NodeName};

/// Parse a channel path into a node name.
///
/// # Errors
///
/// Returns [`BayeuxError::InvalidChannel`] when the path does not start
/// with `/`, has an odd number of segments, or contains empty segments.
pub fn node_name_from_channel(channel: &str) -> Result<NodeName> {
    let Some(path) = channel.strip_prefix('/') else {
        return Err(BayeuxError::InvalidChannel(channel.to_string()));
    };

    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() % 2 != 0 || segments.iter().any(|segment| segment.is_empty()) {
        return Err(BayeuxError::InvalidChannel(channel.to_string()));
    }

    let mut name = NodeName::new();
    for pair in segments.chunks(2) {
        name.add(Key::new(pair[0], pair[1]));
    }
    Ok(name)
}

/// Render a node name as a channel path.
///
/// Key pairs appear in the name's canonical domain order, so
/// `channel_from_node_name(node_name_from_channel(c)?)` reproduces `c` for
/// any canonical channel.
#[must_use]
pub fn channel_from_node_name(name: &NodeName) -> String {
    let mut channel = String::new();
    for key in name.keys() {
        channel.push('/');
        channel.push_str(key.domain());
        channel.push('/');
        channel.push_str(key.value());
    }
    channel
}
