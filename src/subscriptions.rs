//! Subscription Registry Module
//!
//! Builds the set of subscription requests sent after authentication: one
//! request per token pair, each with a unique correlation id used to match
//! asynchronous responses and stream ticks back to their subscription.

use thiserror::Error;
use uuid::Uuid;

/// Subscription validation error types
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Token pair '{0}' must be formatted as BASE/QUOTE")]
    MalformedTokenPair(String),
}

/// A single price-stream subscription, created once at session setup and
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub correlation_id: String,
    pub base_token: String,
    pub quote_token: String,
    pub levels: Vec<f64>,
    pub quantity_token: String,
}

/// Ordered set of subscription requests with unique correlation ids.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    requests: Vec<SubscriptionRequest>,
}

impl SubscriptionRegistry {
    /// Build one request per `"BASE/QUOTE"` pair, preserving input order.
    ///
    /// Fails on the first pair that does not contain exactly one `/`
    /// separator; no partial registry is produced. When `quantity_token` is
    /// `None`, each request quotes quantities in its own base token.
    pub fn build(
        token_pairs: &[String],
        levels: &[f64],
        quantity_token: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let mut requests = Vec::with_capacity(token_pairs.len());
        for pair in token_pairs {
            let (base, quote) = pair
                .split_once('/')
                .filter(|_| pair.matches('/').count() == 1)
                .ok_or_else(|| ValidationError::MalformedTokenPair(pair.clone()))?;
            requests.push(SubscriptionRequest {
                correlation_id: Uuid::new_v4().to_string(),
                base_token: base.to_string(),
                quote_token: quote.to_string(),
                levels: levels.to_vec(),
                quantity_token: quantity_token.unwrap_or(base).to_string(),
            });
        }
        Ok(Self { requests })
    }

    /// Requests in their original (and send) order.
    pub fn requests(&self) -> &[SubscriptionRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Assign a fresh correlation id to every request.
    ///
    /// Used when the session is configured to start each connection attempt
    /// with a clean latency history.
    pub fn regenerate_ids(&mut self) {
        for request in &mut self.requests {
            request.correlation_id = Uuid::new_v4().to_string();
        }
    }
}
