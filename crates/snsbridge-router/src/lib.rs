//! Inbound notification routing
//!
//! Classifies each inbound payload by its `Type` field and drives the rest
//! of the bridge: subscription confirmations complete the handshake and
//! record the deregistration handle, notifications are wrapped in a
//! Lambda-style envelope and dispatched to the configured handler, and
//! anything else is answered with a diagnostic message and no side effects.

mod envelope;

pub use envelope::{InvocationEnvelope, SnsRecord, EVENT_SOURCE, EVENT_VERSION};

use serde_json::Value;
use snsbridge_handler::{HandlerError, HandlerKind, HandlerRegistry};
use snsbridge_sns::{confirmation, SnsError, TopicArn};
use snsbridge_subscribe::{SubscriptionHandle, SubscriptionStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Payload `Type` marking a confirmation handshake request.
pub const TYPE_SUBSCRIPTION_CONFIRMATION: &str = "SubscriptionConfirmation";
/// Payload `Type` marking a notification delivery.
pub const TYPE_NOTIFICATION: &str = "Notification";

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("confirmation payload is missing the {0} field")]
    MissingField(&'static str),

    #[error("failed to fetch the confirmation document: {0}")]
    ConfirmationFetch(#[source] reqwest::Error),

    #[error(transparent)]
    Sns(#[from] SnsError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("handler task failed: {0}")]
    HandlerTask(String),

    #[error("failed to encode the invocation envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything a request needs to be routed.
pub struct RouterState {
    pub topic: TopicArn,
    pub registry: Arc<HandlerRegistry>,
    pub handler: HandlerKind,
    pub store: SubscriptionStore,
    pub http: reqwest::Client,
}

/// Route a raw inbound body to the matching behavior and produce the
/// response message.
///
/// Unknown or unparseable payloads are a recoverable path: they are logged
/// and answered with a diagnostic, never an error. Confirmation and
/// dispatch failures propagate so the HTTP layer can surface a server
/// error to the provider, which applies its own delivery retry policy.
pub async fn route(state: &RouterState, raw: &[u8]) -> Result<String, RouteError> {
    let payload: Value = match serde_json::from_slice(raw) {
        Ok(payload) => payload,
        Err(err) => {
            let body = String::from_utf8_lossy(raw);
            let msg = format!("Don't know how to handle {body}");
            error!("{msg} ({err})");
            return Ok(msg);
        }
    };

    match payload.get("Type").and_then(Value::as_str) {
        Some(TYPE_SUBSCRIPTION_CONFIRMATION) => confirm(state, &payload).await,
        Some(TYPE_NOTIFICATION) => dispatch(state, payload).await,
        _ => {
            let msg = format!("Don't know how to handle {payload}");
            error!("{msg}");
            Ok(msg)
        }
    }
}

/// Complete the confirmation handshake: fetch the provider's confirmation
/// URL, extract the deregistration token from the returned document, and
/// record the handle the shutdown sequence will release.
async fn confirm(state: &RouterState, payload: &Value) -> Result<String, RouteError> {
    if let Some(message) = payload.get("Message").and_then(Value::as_str) {
        info!("{message}");
    }

    let subscribe_url = payload
        .get("SubscribeURL")
        .and_then(Value::as_str)
        .ok_or(RouteError::MissingField("SubscribeURL"))?;

    let document = state
        .http
        .get(subscribe_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(RouteError::ConfirmationFetch)?
        .text()
        .await
        .map_err(RouteError::ConfirmationFetch)?;

    let unsubscribe_arn = confirmation::extract_subscription_arn(&document, &state.topic)?;

    state.store.record(SubscriptionHandle {
        subscription_arn: unsubscribe_arn.clone(),
        topic_arn: state.topic.as_str().to_string(),
    });

    let msg = format!(
        "Automatically subscribed to topic, unsubscribe callback configured with {unsubscribe_arn}"
    );
    info!("{msg}");
    Ok(msg)
}

/// Wrap the notification in an invocation envelope and run the handler.
async fn dispatch(state: &RouterState, payload: Value) -> Result<String, RouteError> {
    let envelope = InvocationEnvelope::for_notification(payload);
    let event = serde_json::to_value(&envelope)?;
    info!("Firing up Lambda with event: {event}");

    // Handler loading and execution are synchronous (dlopen plus a C call);
    // keep them off the async worker.
    let registry = state.registry.clone();
    let kind = state.handler.clone();
    let dispatched = event.clone();
    tokio::task::spawn_blocking(move || {
        registry.invoke(&kind, &dispatched, &Value::Object(serde_json::Map::new()))
    })
    .await
    .map_err(|err| RouteError::HandlerTask(err.to_string()))??;

    Ok(format!("Lambda successfully invoked with: {event}"))
}
