//! The Bayeux session engine.
//!
//! Implements the server side of the Bayeux 1.0 protocol over long-polling:
//! handshake, connect, subscribe, unsubscribe, disconnect and publish, with
//! per-session event buffering and the long-poll suspension machinery.
//! Incoming batches are decoded by [`protocol`], routed by the dispatcher
//! methods on [`Connector`], and answered from per-[`Session`] queues fed by
//! the pub/sub tree.

pub mod channel;
pub mod connector;
pub mod dispatcher;
pub mod protocol;
pub mod session;

pub use channel::{channel_from_node_name, node_name_from_channel};
pub use connector::{Connector, CountingIdGenerator, SecureIdGenerator, SessionIdGenerator};
pub use dispatcher::{
    ERROR_INVALID_CLIENT_ID, ERROR_UNSUPPORTED_CONNECTION_TYPE, LONG_POLLING, PROTOCOL_VERSION,
};
pub use protocol::{Message, MessageEnvelope};
pub use session::{Session, WaitResult, Wake};
