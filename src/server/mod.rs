//! HTTP surface of the Bayeux endpoint.
//!
//! A thin axum layer: any path and any of the three request encodings are
//! accepted, the decoded batch goes through the dispatcher, and the reply
//! array comes back as `200 application/json`. Bodies that fail to decode
//! are answered with `400 Bad Request`.
//!
//! The peer address used to derive session ids is taken from the
//! [`ConnectInfo`] request extension, so the router should be served with
//! `into_make_service_with_connect_info::<SocketAddr>()`; [`serve`] does
//! exactly that.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bayeux::protocol::{self, Message};
use crate::bayeux::Connector;
use crate::error::{BayeuxError, Result};

/// Upper bound for request bodies; a message batch has no business being
/// larger.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the axum router for a Bayeux endpoint.
///
/// The handler is mounted as the fallback, so the endpoint answers on any
/// path; mount it under a sub-path with `Router::nest` if the embedding
/// application serves other routes.
#[must_use]
pub fn router(connector: Arc<Connector>) -> Router {
    Router::new().fallback(bayeux_endpoint).with_state(connector)
}

/// Bind `addr` and serve the Bayeux endpoint until the task is cancelled.
///
/// # Errors
///
/// Returns the underlying I/O error when binding or serving fails.
pub async fn serve(addr: SocketAddr, connector: Arc<Connector>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "bayeux endpoint listening");
    axum::serve(
        listener,
        router(connector).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn bayeux_endpoint(
    State(connector): State<Arc<Connector>>,
    request: Request,
) -> Response {
    let connection_name = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown:0".to_string());

    let batch = match decode_request(request).await {
        Ok(batch) => batch,
        Err(error) => {
            warn!(error = %error, "undecodable bayeux request");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    debug!(connection = %connection_name, messages = batch.len(), "dispatching batch");
    let response = connector.process(&connection_name, batch).await;
    Json(Value::Array(response)).into_response()
}

async fn decode_request(request: Request) -> Result<Vec<Message>> {
    if request.method() == Method::GET {
        let query = request
            .uri()
            .query()
            .ok_or_else(|| BayeuxError::MalformedBody("missing query string".to_string()))?;
        return protocol::decode_query(query);
    }

    if request.method() != Method::POST {
        return Err(BayeuxError::MalformedBody(format!(
            "unsupported method {}",
            request.method()
        )));
    }

    let form_encoded = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

    let body: Bytes = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|err| BayeuxError::MalformedBody(err.to_string()))?;

    if form_encoded {
        protocol::decode_form(&body)
    } else {
        protocol::decode_json(&body)
    }
}
