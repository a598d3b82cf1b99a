//! Decoding of incoming Bayeux message batches.
//!
//! A batch reaches the server in one of three encodings:
//!
//! 1. a JSON body (`Content-Type: application/json`) holding a single
//!    message object or an array of them,
//! 2. an `application/x-www-form-urlencoded` body with one or more
//!    `message=<url-encoded-json>` parameters, each an object or an array,
//!    flattened left to right,
//! 3. an HTTP GET with the same parameters in the query string.
//!
//! All three produce the same thing: a non-empty list of message objects,
//! each carrying a string `channel`. Anything else is malformed and the
//! request is answered with HTTP 400.

use serde::Deserialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::error::{BayeuxError, Result};

/// The envelope fields of one Bayeux message.
///
/// Everything is optional at this level; the dispatcher decides which
/// fields each channel requires. The raw message value is kept alongside
/// for verbatim forwarding to the adapter.
#[derive(Debug, Deserialize)]
pub struct MessageEnvelope {
    /// The message's channel; presence is guaranteed by [`decode_json`].
    pub channel: String,

    /// The session this message belongs to.
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,

    /// Channel to subscribe to / unsubscribe from.
    pub subscription: Option<String>,

    /// Transport requested by a `/meta/connect`.
    #[serde(rename = "connectionType")]
    pub connection_type: Option<String>,

    /// Transports offered by a `/meta/handshake`.
    #[serde(rename = "supportedConnectionTypes")]
    pub supported_connection_types: Option<Vec<String>>,

    /// Client correlation id, echoed verbatim; may be any JSON value.
    pub id: Option<Value>,

    /// Payload of a publish.
    pub data: Option<Value>,

    /// Extension data of a handshake.
    pub ext: Option<Value>,
}

/// One decoded message: its envelope plus the raw value.
#[derive(Debug)]
pub struct Message {
    pub envelope: MessageEnvelope,
    pub raw: Value,
}

/// Decode a JSON body into a batch.
///
/// # Errors
///
/// Fails when the body is not JSON, not an object or array of objects, an
/// empty array, or an element has no string `channel`.
pub fn decode_json(body: &[u8]) -> Result<Vec<Message>> {
    let value: Value = serde_json::from_slice(body)?;
    batch_from_value(value)
}

/// Decode an `application/x-www-form-urlencoded` body into a batch.
///
/// # Errors
///
/// Fails when no `message` parameter is present or any of them fails to
/// decode as a message or array of messages.
pub fn decode_form(body: &[u8]) -> Result<Vec<Message>> {
    let mut batch = Vec::new();

    for (key, value) in form_urlencoded::parse(body) {
        if key != "message" {
            continue;
        }
        let value: Value = serde_json::from_str(&value)?;
        batch.extend(batch_from_value(value)?);
    }

    if batch.is_empty() {
        return Err(BayeuxError::MalformedBody(
            "no message parameter".to_string(),
        ));
    }
    Ok(batch)
}

/// Decode a GET query string into a batch; same format as [`decode_form`].
///
/// # Errors
///
/// See [`decode_form`].
pub fn decode_query(query: &str) -> Result<Vec<Message>> {
    decode_form(query.as_bytes())
}

fn batch_from_value(value: Value) -> Result<Vec<Message>> {
    let elements = match value {
        Value::Array(elements) if !elements.is_empty() => elements,
        object @ Value::Object(_) => vec![object],
        Value::Array(_) => {
            return Err(BayeuxError::MalformedBody("empty message batch".to_string()));
        }
        other => {
            return Err(BayeuxError::MalformedBody(format!(
                "expected message object or array, got {other}"
            )));
        }
    };

    elements
        .into_iter()
        .map(|raw| {
            let envelope: MessageEnvelope = serde_json::from_value(raw.clone())
                .map_err(|err| BayeuxError::MalformedBody(err.to_string()))?;
            Ok(Message { envelope, raw })
        })
        .collect()
}
