//! Protocol Module
//!
//! Handles JSON message construction and parsing for the streaming protocol.
//! Supports authentication, subscription management, data requests, and the
//! inbound response/stream envelope.

use crate::subscriptions::SubscriptionRequest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Outgoing Message Types
// ============================================================================

/// In-band authentication message sent after the connection opens
#[derive(Debug, Serialize)]
pub struct AuthMessage {
    pub action: &'static str,
    pub api_key: String,
    pub passphrase: String,
    pub signature: String,
    pub timestamp: i64,
    pub request_id: String,
}

/// Price levels requested for one subscription
#[derive(Debug, Serialize)]
pub struct QuantityLevels {
    pub token: String,
    pub levels: Vec<f64>,
}

/// Subscribe message for one token pair
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    pub base_token: String,
    pub quote_token: String,
    pub quantity: QuantityLevels,
    pub request_id: String,
    pub action: &'static str,
}

/// Unsubscribe message, token pair only
#[derive(Debug, Serialize)]
pub struct UnsubscribeMessage {
    pub base_token: String,
    pub quote_token: String,
    pub request_id: String,
    pub action: &'static str,
}

/// Out-of-stream data request (max_levels, allowed_markets, max_connections)
#[derive(Debug, Serialize)]
pub struct DataRequestMessage {
    pub request_type: String,
    pub request_id: String,
    pub action: &'static str,
}

// ============================================================================
// Incoming Message Types
// ============================================================================

/// Generic inbound envelope; the `event` discriminator selects handling
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// One price tick from a batched `stream` event
#[derive(Debug, Clone, Deserialize)]
pub struct StreamTick {
    #[serde(default, alias = "client_request_id")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub t_create: Option<i64>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub quantity_token: Option<String>,
    #[serde(default)]
    pub buy_price: Option<f64>,
    #[serde(default)]
    pub sell_price: Option<f64>,
    #[serde(default)]
    pub base_token: Option<String>,
    #[serde(default)]
    pub quote_token: Option<String>,
}

// ============================================================================
// Protocol Builder Functions
// ============================================================================

/// Generate the in-band auth message with a fresh request id
pub fn auth_message(api_key: &str, passphrase: &str, signature: &str, timestamp: i64) -> String {
    let msg = AuthMessage {
        action: "auth",
        api_key: api_key.to_string(),
        passphrase: passphrase.to_string(),
        signature: signature.to_string(),
        timestamp,
        request_id: generate_request_id(),
    };
    serde_json::to_string(&msg).expect("Failed to serialize auth message")
}

/// Generate a subscribe message for one registered request
pub fn subscribe_message(request: &SubscriptionRequest) -> String {
    let msg = SubscribeMessage {
        base_token: request.base_token.clone(),
        quote_token: request.quote_token.clone(),
        quantity: QuantityLevels {
            token: request.quantity_token.clone(),
            levels: request.levels.clone(),
        },
        request_id: request.correlation_id.clone(),
        action: "subscribe",
    };
    serde_json::to_string(&msg).expect("Failed to serialize subscribe message")
}

/// Generate an unsubscribe message for a token pair
pub fn unsubscribe_message(base_token: &str, quote_token: &str, request_id: &str) -> String {
    let msg = UnsubscribeMessage {
        base_token: base_token.to_string(),
        quote_token: quote_token.to_string(),
        request_id: request_id.to_string(),
        action: "unsubscribe",
    };
    serde_json::to_string(&msg).expect("Failed to serialize unsubscribe message")
}

/// Generate a data_request message
pub fn data_request_message(request_type: &str) -> String {
    let msg = DataRequestMessage {
        request_type: request_type.to_string(),
        request_id: generate_request_id(),
        action: "data_request",
    };
    serde_json::to_string(&msg).expect("Failed to serialize data request message")
}

/// Generate a new UUID v4 request id
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Parse an inbound JSON message into the generic envelope
pub fn parse_envelope(json: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(json)
}

/// Extract the tick batch from a `stream` envelope body
pub fn stream_ticks(envelope: &Envelope) -> Result<Vec<StreamTick>, serde_json::Error> {
    match &envelope.body {
        Some(body) => serde_json::from_value(body.clone()),
        None => Ok(Vec::new()),
    }
}
