//! Routing of decoded message batches and response assembly.
//!
//! [`Connector::process`] applies one batch against the session store and
//! returns the response array: the per-message replies in request order,
//! followed by the events drained from the involved sessions. When the
//! batch ends in a successful `/meta/connect` and nothing is queued, the
//! call parks on the session until whichever comes first of: an event, a
//! hurry from a pipelined request, displacement by a second connection, or
//! the poll timeout.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::connector::Connector;
use super::protocol::Message;
use super::session::{Session, WaitResult, Wake};

/// Protocol version advertised in handshake replies.
pub const PROTOCOL_VERSION: &str = "1.0";

/// The only connection type this server speaks.
pub const LONG_POLLING: &str = "long-polling";

/// Error text for unknown, missing or foreign `clientId` values.
pub const ERROR_INVALID_CLIENT_ID: &str = "invalid clientId";

/// Error text for connection types other than long-polling.
pub const ERROR_UNSUPPORTED_CONNECTION_TYPE: &str = "unsupported connection type";

/// Sessions touched by the batch currently being processed.
///
/// Handles are acquired once per session and released together when the
/// response is complete; the first acquisition of an existing session
/// hurries any response still parked on it from an earlier request.
struct AcquiredSessions<'a> {
    connector: &'a Arc<Connector>,
    sessions: Vec<Arc<Session>>,
}

impl AcquiredSessions<'_> {
    fn resolve(&mut self, client_id: Option<&str>) -> Option<Arc<Session>> {
        let client_id = client_id?;

        if let Some(session) = self
            .sessions
            .iter()
            .find(|session| session.session_id() == client_id)
        {
            return Some(session.clone());
        }

        let session = self.connector.find_session(client_id)?;
        session.hurry();
        self.sessions.push(session.clone());
        Some(session)
    }

    fn track(&mut self, session: Arc<Session>) {
        self.sessions.push(session);
    }
}

impl Connector {
    /// Process one decoded batch for a client connecting as
    /// `connection_name` and return the response array.
    pub async fn process(self: &Arc<Self>, connection_name: &str, batch: Vec<Message>) -> Vec<Value> {
        let mut acquired = AcquiredSessions {
            connector: self,
            sessions: Vec::new(),
        };
        let mut closing: HashSet<String> = HashSet::new();
        let mut replies: Vec<Value> = Vec::new();
        let mut park: Option<Arc<Session>> = None;

        let last_index = batch.len().saturating_sub(1);
        for (index, message) in batch.into_iter().enumerate() {
            let is_last = index == last_index;
            let envelope = &message.envelope;

            match envelope.channel.as_str() {
                "/meta/handshake" => {
                    replies.push(self.handshake(connection_name, &message, &mut acquired).await);
                }

                "/meta/connect" => {
                    let session = acquired.resolve(envelope.client_id.as_deref());
                    let reply = match &session {
                        None => {
                            let mut reply = json!({
                                "channel": "/meta/connect",
                                "successful": false,
                                "error": ERROR_INVALID_CLIENT_ID,
                                "advice": { "reconnect": "handshake" },
                            });
                            echo_client_id(&mut reply, envelope.client_id.as_deref());
                            reply
                        }
                        Some(session) => {
                            if envelope.connection_type.as_deref() == Some(LONG_POLLING) {
                                if is_last {
                                    park = Some(session.clone());
                                }
                                json!({
                                    "channel": "/meta/connect",
                                    "clientId": session.session_id(),
                                    "successful": true,
                                })
                            } else {
                                json!({
                                    "channel": "/meta/connect",
                                    "clientId": session.session_id(),
                                    "successful": false,
                                    "error": ERROR_UNSUPPORTED_CONNECTION_TYPE,
                                })
                            }
                        }
                    };
                    replies.push(with_id(reply, &envelope.id));
                }

                "/meta/subscribe" => {
                    match acquired.resolve(envelope.client_id.as_deref()) {
                        Some(session) => {
                            match envelope.subscription.as_deref().filter(|s| !s.is_empty()) {
                                Some(subscription) => {
                                    // The ack travels through the event
                                    // queue, not the reply list.
                                    session.subscribe(subscription, envelope.id.clone());
                                }
                                None => {
                                    let reply = json!({
                                        "channel": "/meta/subscribe",
                                        "clientId": session.session_id(),
                                        "successful": false,
                                        "error": ERROR_INVALID_CLIENT_ID,
                                    });
                                    replies.push(with_id(reply, &envelope.id));
                                }
                            }
                        }
                        None => {
                            let mut reply = json!({
                                "channel": "/meta/subscribe",
                                "successful": false,
                                "error": ERROR_INVALID_CLIENT_ID,
                            });
                            echo_client_id(&mut reply, envelope.client_id.as_deref());
                            replies.push(with_id(reply, &envelope.id));
                        }
                    }
                }

                "/meta/unsubscribe" => {
                    match acquired.resolve(envelope.client_id.as_deref()) {
                        Some(session) => {
                            let subscription = envelope.subscription.clone().unwrap_or_default();
                            session.unsubscribe(&subscription, envelope.id.clone());
                        }
                        None => {
                            let mut reply = json!({
                                "channel": "/meta/unsubscribe",
                                "successful": false,
                                "error": ERROR_INVALID_CLIENT_ID,
                            });
                            echo_client_id(&mut reply, envelope.client_id.as_deref());
                            replies.push(with_id(reply, &envelope.id));
                        }
                    }
                }

                "/meta/disconnect" => {
                    let reply = match acquired.resolve(envelope.client_id.as_deref()) {
                        Some(session) => {
                            closing.insert(session.session_id().to_string());
                            json!({
                                "channel": "/meta/disconnect",
                                "clientId": session.session_id(),
                                "successful": true,
                            })
                        }
                        None => {
                            let mut reply = json!({
                                "channel": "/meta/disconnect",
                                "successful": false,
                                "error": ERROR_INVALID_CLIENT_ID,
                            });
                            echo_client_id(&mut reply, envelope.client_id.as_deref());
                            reply
                        }
                    };
                    replies.push(with_id(reply, &envelope.id));
                }

                channel => {
                    replies.push(self.publish(channel, &message, &mut acquired).await);
                }
            }
        }

        for session_id in &closing {
            if let Some(session) = acquired
                .sessions
                .iter()
                .find(|session| session.session_id() == session_id)
            {
                session.close();
            }
            self.drop_session(session_id);
        }

        let mut response = replies;
        match park {
            Some(session) if !closing.contains(session.session_id()) => {
                self.long_poll(&session, &mut response).await;
            }
            _ => {
                for session in &acquired.sessions {
                    response.extend(session.events());
                }
            }
        }

        for session in &acquired.sessions {
            self.idle_session(session);
        }

        response
    }

    async fn handshake(
        self: &Arc<Self>,
        connection_name: &str,
        message: &Message,
        acquired: &mut AcquiredSessions<'_>,
    ) -> Value {
        let envelope = &message.envelope;

        let offers_long_polling = envelope
            .supported_connection_types
            .as_ref()
            .is_some_and(|types| types.iter().any(|t| t == LONG_POLLING));

        let mut reply = json!({
            "channel": "/meta/handshake",
            "version": PROTOCOL_VERSION,
            "supportedConnectionTypes": [LONG_POLLING],
        });

        if !offers_long_polling {
            reply["successful"] = json!(false);
            reply["error"] = json!(ERROR_UNSUPPORTED_CONNECTION_TYPE);
            return with_id(reply, &envelope.id);
        }

        match self.root().adapter().handshake(envelope.ext.as_ref()).await {
            Ok(()) => {
                let session = self.create_session(connection_name);
                reply["clientId"] = json!(session.session_id());
                reply["successful"] = json!(true);
                acquired.track(session);
            }
            Err(error) => {
                debug!(error = %error, "handshake rejected by adapter");
                reply["successful"] = json!(false);
                reply["error"] = json!(error);
            }
        }

        with_id(reply, &envelope.id)
    }

    async fn publish(
        self: &Arc<Self>,
        channel: &str,
        message: &Message,
        acquired: &mut AcquiredSessions<'_>,
    ) -> Value {
        let envelope = &message.envelope;

        let Some(session) = acquired.resolve(envelope.client_id.as_deref()) else {
            let mut reply = json!({
                "channel": channel,
                "successful": false,
                "error": ERROR_INVALID_CLIENT_ID,
            });
            echo_client_id(&mut reply, envelope.client_id.as_deref());
            return with_id(reply, &envelope.id);
        };

        let data = envelope.data.clone().unwrap_or(Value::Null);
        let result = session.publish(channel, &data, &message.raw).await;

        let mut reply = json!({
            "channel": channel,
            "clientId": session.session_id(),
            "successful": result.is_ok(),
        });
        if let Err(error) = result {
            warn!(channel = %channel, error = %error, "publish rejected");
            reply["error"] = json!(error);
        }
        with_id(reply, &envelope.id)
    }

    async fn long_poll(self: &Arc<Self>, session: &Arc<Session>, response: &mut Vec<Value>) {
        match session.wait_for_events() {
            WaitResult::Ready(events) => response.extend(events),
            WaitResult::Park(receiver) => {
                let timeout = self.config().get_long_polling_timeout();
                match tokio::time::timeout(timeout, receiver).await {
                    Ok(Ok(Wake::Notified)) => response.extend(session.events()),
                    Ok(Ok(Wake::SecondConnection)) => {
                        debug!(session_id = %session.session_id(), "displaced by second connection");
                    }
                    // Sender dropped without a wake: the session is gone.
                    Ok(Err(_)) => {}
                    Err(_elapsed) => session.timeout(),
                }
            }
        }
    }
}

fn with_id(mut reply: Value, id: &Option<Value>) -> Value {
    if let Some(id) = id {
        reply["id"] = id.clone();
    }
    reply
}

fn echo_client_id(reply: &mut Value, client_id: Option<&str>) {
    if let Some(client_id) = client_id {
        reply["clientId"] = json!(client_id);
    }
}
