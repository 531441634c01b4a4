//! Market-Data Streaming Client Library
//!
//! A long-lived WebSocket client that authenticates to a price-tick
//! streaming service, subscribes to instrument/price-level pairs, and
//! tracks a running average of per-subscription update latency.
//!
//! # Modules
//!
//! - `config`: typed configuration loaded from .properties files
//! - `signer`: HMAC-SHA-256 request signing and handshake headers
//! - `subscriptions`: token-pair parsing and correlation-id registry
//! - `protocol`: wire message construction and parsing
//! - `tracker`: per-subscription running-average latency
//! - `client`: connection state machine and transport driver

pub mod client;
pub mod config;
pub mod protocol;
pub mod signer;
pub mod subscriptions;
pub mod tracker;

// Re-export main types for convenience
pub use client::{ClientError, SessionState, StreamSession};
pub use config::{AuthMode, Config, RetryPolicy};
pub use signer::Signer;
pub use subscriptions::{SubscriptionRegistry, SubscriptionRequest, ValidationError};
pub use tracker::{CorrelationError, LatencyTracker, UpdateSample};
