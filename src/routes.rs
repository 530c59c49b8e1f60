//! HTTP surface: platform callbacks, health and the internal send trigger.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::api::{MessageSender, SendRequest};
use crate::config::mask_corp_id;
use crate::crypto::WecomCrypto;
use crate::dispatcher::Dispatcher;
use crate::error::{CryptoError, Error, XmlError};
use crate::message::InboundMessage;
use crate::xml::parse_xml;

/// Acknowledgment body the platform expects for every message callback.
const ACK: &str = "success";

/// Shared state for the gateway routes.
#[derive(Clone)]
pub struct AppState {
    pub crypto: Arc<WecomCrypto>,
    pub dispatcher: Arc<Dispatcher>,
    pub sender: Arc<dyn MessageSender>,
}

/// Signature parameters the platform appends to callback URLs.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallbackQuery {
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub echostr: String,
}

/// Build the gateway routes.
pub fn gateway_routes(state: AppState) -> Router {
    Router::new()
        .route("/callback", get(verify_url).post(receive_callback))
        .route("/health", get(health))
        .route("/send", post(send_message))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// GET /callback
///
/// URL verification: answers with the decrypted `echostr`.
async fn verify_url(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    info!(
        timestamp = %query.timestamp,
        nonce = %query.nonce,
        "URL verification request"
    );

    if !state.crypto.is_configured() {
        error!("WeCom credentials not configured");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Not configured".to_string());
    }

    if !state.crypto.verify_signature(
        &query.msg_signature,
        &query.timestamp,
        &query.nonce,
        Some(query.echostr.as_str()),
    ) {
        warn!("URL verification signature mismatch");
        return (StatusCode::FORBIDDEN, "Invalid signature".to_string());
    }

    match state.crypto.decrypt(&query.echostr) {
        Ok(echo) => {
            info!("URL verification succeeded");
            (StatusCode::OK, echo)
        }
        Err(e) => {
            error!(error = %e, "Failed to decrypt echostr");
            (StatusCode::INTERNAL_SERVER_ERROR, "Decrypt failed".to_string())
        }
    }
}

/// POST /callback
///
/// Always acknowledges with `success` so the platform does not retry; the
/// message itself is handled on a background task.
async fn receive_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    body: String,
) -> impl IntoResponse {
    debug!(timestamp = %query.timestamp, bytes = body.len(), "Message callback");

    if !state.crypto.is_configured() {
        error!("WeCom credentials not configured");
        return (StatusCode::OK, ACK);
    }

    match accept_callback(&state, &query, &body) {
        Ok(()) => {}
        Err(Error::Crypto(CryptoError::SignatureMismatch)) => {
            warn!(timestamp = %query.timestamp, "Message signature mismatch");
        }
        Err(Error::Xml(XmlError::MissingElement(name))) => {
            warn!(element = name, "Callback body without encrypted payload");
        }
        Err(e) => error!(error = %e, "Error handling callback"),
    }

    (StatusCode::OK, ACK)
}

/// Verify, decrypt and hand a callback body to the dispatcher.
fn accept_callback(state: &AppState, query: &CallbackQuery, body: &str) -> Result<(), Error> {
    let envelope = parse_xml(body)?;
    let encrypted = envelope
        .get("Encrypt")
        .filter(|e| !e.is_empty())
        .ok_or(XmlError::MissingElement("Encrypt"))?;

    if !state.crypto.verify_signature(
        &query.msg_signature,
        &query.timestamp,
        &query.nonce,
        Some(encrypted.as_str()),
    ) {
        return Err(CryptoError::SignatureMismatch.into());
    }

    let plain = state.crypto.decrypt(encrypted)?;
    let message = InboundMessage::from_fields(parse_xml(&plain)?)
        .map_err(|e| XmlError::Malformed(e.to_string()))?;

    info!(
        msg_type = %message.msg_type,
        from = %message.from_user_name,
        "Received message"
    );

    state.dispatcher.spawn(message);
    Ok(())
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.crypto.is_configured();
    Json(serde_json::json!({
        "status": if ready { "ready" } else { "not_configured" },
        "corpId": ready.then(|| mask_corp_id(state.crypto.corp_id())),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// POST /send
///
/// Internal trigger for outbound messages.
async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> impl IntoResponse {
    info!(msg_type = request.msg_type.as_str(), "Send message request");

    match state.sender.send(request).await {
        Ok(receipt) => {
            let mut body = serde_json::to_value(receipt).unwrap_or_default();
            if let Some(fields) = body.as_object_mut() {
                fields.insert("success".to_string(), serde_json::Value::Bool(true));
            }
            Json(body)
        }
        Err(e) => {
            error!(error = %e, "Failed to send message");
            Json(serde_json::json!({ "success": false, "error": e.to_string() }))
        }
    }
}
