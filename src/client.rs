//! Stream Session Module
//!
//! Manages the WebSocket connection lifecycle (connect, authenticate,
//! subscribe, stream, reconnect) and routes inbound messages to the latency
//! tracker by correlation id. Supports both TLS and non-TLS connections
//! using tokio-tungstenite.
//!
//! The state machine is exposed as explicit `on_open`/`on_message`/
//! `on_close`/`on_error` methods that return the frames to send, driven by
//! the transport loop in [`StreamSession::run`]; the protocol flow can
//! therefore be exercised without a live connection.

use crate::config::{AuthMode, Config};
use crate::protocol::{self, Envelope};
use crate::signer::Signer;
use crate::subscriptions::{SubscriptionRegistry, ValidationError};
use crate::tracker::LatencyTracker;

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{
    connect_async, connect_async_tls_with_config,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::header::{HeaderName, HeaderValue},
        Error as WsError, Message,
    },
    Connector,
};

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Authentication rejected by server")]
    AuthenticationFailed,

    #[error("Malformed base64 secret: {0}")]
    Credentials(#[from] base64::DecodeError),

    #[error(transparent)]
    Subscription(#[from] ValidationError),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Session connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Streaming,
    Closing,
}

/// Authenticated streaming session over a single WebSocket connection
pub struct StreamSession {
    config: Config,
    signer: Signer,
    registry: SubscriptionRegistry,
    tracker: LatencyTracker,
    state: SessionState,
}

impl StreamSession {
    /// Create a session from validated configuration.
    ///
    /// Credential and token-pair faults surface here, before any connection
    /// attempt.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let signer = Signer::new(&config.secret)?;
        let registry = SubscriptionRegistry::build(
            &config.token_pairs,
            &config.levels,
            config.quantity_token.as_deref(),
        )?;

        Ok(Self {
            config,
            signer,
            registry,
            tracker: LatencyTracker::new(),
            state: SessionState::Disconnected,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tracker(&self) -> &LatencyTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Enter Connecting ahead of a transport attempt.
    pub fn begin_connect(&mut self) {
        self.state = SessionState::Connecting;
    }

    /// Transport-level open. Returns the frames to send on the fresh
    /// connection: the in-band auth message, or the subscription batch
    /// directly when the upgrade headers already carried the credentials.
    pub fn on_open(&mut self) -> Vec<String> {
        match self.config.auth_mode {
            AuthMode::Message => {
                self.state = SessionState::Authenticating;
                let timestamp = unix_timestamp();
                let signature =
                    self.signer
                        .sign(&timestamp.to_string(), "GET", &self.config.path);
                vec![protocol::auth_message(
                    &self.config.api_key,
                    &self.config.passphrase,
                    &signature,
                    timestamp,
                )]
            }
            AuthMode::Headers => self.subscribe_all(),
        }
    }

    /// Handle one inbound text frame received at `now`. Returns any frames
    /// to send in response; fails only on fatal conditions (authentication
    /// rejected). Unparseable messages and unknown events are logged and
    /// dropped without a state change.
    pub fn on_message(&mut self, text: &str, now: Instant) -> Result<Vec<String>, ClientError> {
        let envelope = match protocol::parse_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Dropping unparseable message: {} - {}", e, text);
                return Ok(Vec::new());
            }
        };

        match envelope.event.as_str() {
            "auth_response" => self.handle_auth_response(&envelope, now),
            "subscribe_response" | "unsubscribe_response" | "data_response"
            | "error_response" => {
                if envelope.is_success() {
                    log::info!("Received {}: {}", envelope.event, text);
                } else {
                    log::warn!("{} reported failure: {}", envelope.event, text);
                }
                if let Some(request_id) = &envelope.request_id {
                    self.note_update(request_id, now);
                }
                Ok(Vec::new())
            }
            "stream" => {
                self.handle_stream(&envelope, text, now);
                Ok(Vec::new())
            }
            other => {
                log::debug!("Ignoring unknown event '{}'", other);
                Ok(Vec::new())
            }
        }
    }

    /// Transport closed. Terminal Closing is preserved; otherwise the
    /// session returns to Disconnected and may be reconnected.
    pub fn on_close(&mut self) {
        if self.state != SessionState::Closing {
            self.state = SessionState::Disconnected;
        }
    }

    /// Transport error. Same state effect as a close.
    pub fn on_error(&mut self, error: &WsError) {
        log::error!("WebSocket error: {}", error);
        self.on_close();
    }

    /// Unsubscribe frames for every registered pair, for callers that drive
    /// their own transport.
    pub fn unsubscribe_messages(&self) -> Vec<String> {
        self.registry
            .requests()
            .iter()
            .map(|request| {
                protocol::unsubscribe_message(
                    &request.base_token,
                    &request.quote_token,
                    &protocol::generate_request_id(),
                )
            })
            .collect()
    }

    fn handle_auth_response(
        &mut self,
        envelope: &Envelope,
        now: Instant,
    ) -> Result<Vec<String>, ClientError> {
        if !envelope.is_success() {
            log::error!("Authentication failed: {:?}", envelope.error);
            self.state = SessionState::Closing;
            return Err(ClientError::AuthenticationFailed);
        }

        if self.state == SessionState::Authenticating {
            log::info!("Authentication successful");
            Ok(self.subscribe_all())
        } else {
            // Late ack; correlate it like any other single-object response.
            if let Some(request_id) = &envelope.request_id {
                self.note_update(request_id, now);
            }
            Ok(Vec::new())
        }
    }

    /// Emit one subscribe frame per registered request, in registry order.
    /// The session moves to Streaming as soon as the batch is built; acks
    /// arrive later as ordinary responses.
    fn subscribe_all(&mut self) -> Vec<String> {
        self.state = SessionState::Subscribing;
        let now = Instant::now();
        let mut frames = Vec::with_capacity(self.registry.len());
        for request in self.registry.requests() {
            self.tracker.record_sent(&request.correlation_id, now);
            frames.push(protocol::subscribe_message(request));
        }
        log::info!("Subscribing to {} token pair(s)", frames.len());
        self.state = SessionState::Streaming;
        frames
    }

    fn handle_stream(&mut self, envelope: &Envelope, text: &str, now: Instant) {
        if !envelope.is_success() {
            log::warn!("Stream error frame: {}", text);
            return;
        }
        let ticks = match protocol::stream_ticks(envelope) {
            Ok(ticks) => ticks,
            Err(e) => {
                log::warn!("Dropping malformed stream body: {} - {}", e, text);
                return;
            }
        };
        for tick in ticks {
            if self.config.log_streams {
                log::debug!("Tick: {:?}", tick);
            }
            match tick.request_id {
                Some(ref request_id) => self.note_update(request_id, now),
                None => log::warn!("Dropping tick without request id"),
            }
        }
    }

    /// Fold one correlated update into the tracker and report the running
    /// average at the configured cadence.
    fn note_update(&mut self, correlation_id: &str, now: Instant) {
        match self.tracker.record_update(correlation_id, now) {
            Ok(sample) => {
                if should_report(sample.samples, self.config.report_every) {
                    log::info!(
                        "Latency {}: interval={:?} avg={:?} samples={}",
                        correlation_id,
                        sample.interval,
                        sample.average,
                        sample.samples
                    );
                }
            }
            Err(e) => log::warn!("{}", e),
        }
    }

    // ========================================================================
    // Transport driver
    // ========================================================================

    /// Connect and stream until the retry policy is exhausted or a fatal
    /// fault occurs.
    ///
    /// Transport closures and errors feed the retry policy: a bounded number
    /// of reconnects with a fixed delay, counted across the whole session.
    /// Authentication rejection is terminal and never retried.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 && self.config.fresh_ids_on_reconnect {
                self.registry.regenerate_ids();
                self.tracker.clear();
            }
            self.begin_connect();
            let error = match self.connect_once().await {
                Ok(()) => ClientError::ConnectionClosed,
                Err(e) => e,
            };

            if matches!(error, ClientError::AuthenticationFailed) {
                self.state = SessionState::Closing;
                return Err(error);
            }

            let retry = &self.config.retry;
            if !retry.enabled || attempt >= retry.max_retries {
                self.state = SessionState::Closing;
                return Err(error);
            }
            attempt += 1;
            log::warn!(
                "Connection lost: {}; reconnecting in {:?} (attempt {}/{})",
                error,
                retry.delay,
                attempt,
                retry.max_retries
            );
            tokio::time::sleep(retry.delay).await;
        }
    }

    /// One connection attempt: upgrade, then drive the message loop until
    /// the transport ends.
    async fn connect_once(&mut self) -> Result<(), ClientError> {
        let url = self.config.websocket_url();
        let request = self.build_request(&url)?;
        log::info!("Connecting to {}", url);

        if self.config.use_ssl {
            let connector = native_tls::TlsConnector::builder()
                .build()
                .map_err(|e| ClientError::Tls(e.to_string()))?;

            let (ws_stream, _) = connect_async_tls_with_config(
                request,
                None,
                false,
                Some(Connector::NativeTls(connector)),
            )
            .await?;
            log::info!("WebSocket connection established (TLS)");

            self.drive(ws_stream).await
        } else {
            let (ws_stream, _) = connect_async(request).await?;
            log::info!("WebSocket connection established (non-TLS)");

            self.drive(ws_stream).await
        }
    }

    /// Build the upgrade request, attaching the signed FX-ACCESS headers in
    /// header-auth mode.
    fn build_request(&self, url: &str) -> Result<Request, ClientError> {
        let mut request = url.into_client_request()?;
        if self.config.auth_mode == AuthMode::Headers {
            let timestamp = unix_timestamp().to_string();
            let headers = self.signer.handshake_headers(
                &self.config.api_key,
                &self.config.passphrase,
                &timestamp,
                &self.config.path,
            );
            for (name, value) in headers {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    ClientError::Protocol(format!("invalid header name '{}': {}", name, e))
                })?;
                let value = HeaderValue::from_str(&value).map_err(|e| {
                    ClientError::Protocol(format!("invalid value for header '{}': {}", name, e))
                })?;
                request.headers_mut().insert(name, value);
            }
        }
        Ok(request)
    }

    async fn drive<S>(&mut self, ws_stream: S) -> Result<(), ClientError>
    // Generic over `S` so it works with both TLS and non-TLS WebSocket streams.
    where
        S: StreamExt<Item = Result<Message, WsError>>
            + SinkExt<Message, Error = WsError>
            + Unpin,
    {
        // Split the bidirectional WebSocket into separate read/write halves.
        let (mut write, mut read) = ws_stream.split();

        for frame in self.on_open() {
            log::debug!("Sending: {}", frame);
            write.send(Message::Text(frame)).await?;
        }

        // Main message processing loop: classify inbound frames until the
        // connection ends. Outbound sends are fire-and-forget; responses are
        // matched back to their request ids whenever they arrive.
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    log::debug!("Received: {}", text);
                    for frame in self.on_message(&text, Instant::now())? {
                        log::debug!("Sending: {}", frame);
                        write.send(Message::Text(frame)).await?;
                    }
                }
                // Server initiated close.
                Ok(Message::Close(frame)) => {
                    log::info!("Connection closed: {:?}", frame);
                    self.on_close();
                    return Err(ClientError::ConnectionClosed);
                }
                // WebSocket keepalive - respond with Pong.
                Ok(Message::Ping(data)) => {
                    write.send(Message::Pong(data)).await?;
                }
                // Ignore other message types (Binary, Pong, Frame).
                Ok(_) => {}
                Err(e) => {
                    self.on_error(&e);
                    return Err(ClientError::WebSocket(e));
                }
            }
        }

        self.on_close();
        Err(ClientError::ConnectionClosed)
    }
}

/// Report on the first update and every `cadence`-th after it (1, N+1,
/// 2N+1, ...), throttling per-tick logging on fast streams.
pub fn should_report(samples: u64, cadence: u64) -> bool {
    let cadence = cadence.max(1);
    samples > 0 && (samples - 1) % cadence == 0
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
