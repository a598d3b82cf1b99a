//! Error types for the Bayeux server core.
//!
//! Errors in this module cover the seams where a request can fail before it
//! reaches the protocol layer: undecodable message bodies and malformed
//! channel paths. Protocol-level failures (invalid client ids, rejected
//! subscriptions, ...) are not Rust errors; they are carried to the client in
//! the `error` field of an otherwise successful reply and are defined as
//! string constants in [`crate::bayeux::dispatcher`].
//!
//! # Error Categories
//!
//! | Category | Variants | Client-visible as |
//! |----------|----------|-------------------|
//! | Decoding | `MalformedBody`, `Json` | HTTP 400 |
//! | Channels | `InvalidChannel` | `error: "invalid subscription"` |

use thiserror::Error;

/// Result type for Bayeux core operations.
pub type Result<T> = std::result::Result<T, BayeuxError>;

/// Errors produced while decoding and validating incoming requests.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BayeuxError {
    /// The request body is not a decodable Bayeux message batch.
    ///
    /// Covers bodies that are valid JSON but not an object or array of
    /// objects, form bodies without a `message` parameter, and batch
    /// elements lacking a `channel` field.
    #[error("malformed message body: {0}")]
    MalformedBody(String),

    /// The request body is not valid JSON at all.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A channel path does not name a data node.
    ///
    /// Node channels must consist of an even number of non-empty segments,
    /// `/domain1/value1/domain2/value2/...`.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),
}
