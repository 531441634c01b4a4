//! Stream Session Tests
//!
//! End-to-end scenarios, driven both directly through the session's state
//! machine methods and over live connections to an in-process WebSocket
//! server.

use fx_stream_client::{AuthMode, ClientError, Config, RetryPolicy, SessionState, StreamSession};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

fn test_config(host: &str) -> Config {
    Config {
        host: host.to_string(),
        path: "/price.tickers".to_string(),
        use_ssl: false,
        api_key: "test-key".to_string(),
        secret: "c2VjcmV0LWtleQ==".to_string(),
        passphrase: "phrase".to_string(),
        token_pairs: vec!["BTC/USD".to_string(), "ETH/USD".to_string()],
        levels: vec![1.0, 2.0],
        retry: RetryPolicy {
            enabled: false,
            max_retries: 0,
            delay: Duration::from_millis(10),
        },
        ..Default::default()
    }
}

// ============================================================================
// State machine scenarios (no transport)
// ============================================================================

#[test]
fn test_auth_success_subscribes_in_input_order() {
    let mut session = StreamSession::new(test_config("localhost")).unwrap();
    session.begin_connect();

    let auth_frames = session.on_open();
    assert_eq!(auth_frames.len(), 1);
    assert_eq!(session.state(), SessionState::Authenticating);

    let frames = session
        .on_message(r#"{"event":"auth_response","status":"success"}"#, Instant::now())
        .unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(session.state(), SessionState::Streaming);

    let subs: Vec<Value> = frames
        .iter()
        .map(|frame| serde_json::from_str(frame).unwrap())
        .collect();
    assert_eq!(subs[0]["action"], "subscribe");
    assert_eq!(subs[0]["base_token"], "BTC");
    assert_eq!(subs[1]["base_token"], "ETH");
    assert_eq!(subs[0]["quantity"]["levels"], json!([1.0, 2.0]));
    assert_ne!(subs[0]["request_id"], subs[1]["request_id"]);

    // Every sent subscription has a latency record from record_sent.
    for sub in &subs {
        assert!(session.tracker().has_record(sub["request_id"].as_str().unwrap()));
    }
}

#[test]
fn test_auth_failure_closes_without_subscribing() {
    let mut session = StreamSession::new(test_config("localhost")).unwrap();
    session.begin_connect();
    session.on_open();

    let result = session.on_message(
        r#"{"event":"auth_response","status":"failure","error":"bad key"}"#,
        Instant::now(),
    );
    assert!(matches!(result, Err(ClientError::AuthenticationFailed)));
    assert_eq!(session.state(), SessionState::Closing);
    assert!(session.tracker().is_empty());
}

#[test]
fn test_stream_batch_updates_each_tick_id() {
    let mut session = StreamSession::new(test_config("localhost")).unwrap();
    session.begin_connect();
    session.on_open();
    let frames = session
        .on_message(r#"{"event":"auth_response","status":"success"}"#, Instant::now())
        .unwrap();

    let ids: Vec<String> = frames
        .iter()
        .map(|frame| {
            let sub: Value = serde_json::from_str(frame).unwrap();
            sub["request_id"].as_str().unwrap().to_string()
        })
        .collect();

    let batch = json!({
        "event": "stream",
        "status": "success",
        "body": [
            {"request_id": ids[0], "base_token": "BTC", "quote_token": "USD",
             "buy_price": 50000.0, "sell_price": 49990.0},
            {"request_id": ids[1], "base_token": "ETH", "quote_token": "USD",
             "buy_price": 3000.0, "sell_price": 2999.0},
            {"request_id": ids[0], "base_token": "BTC", "quote_token": "USD",
             "buy_price": 50001.0, "sell_price": 49991.0},
        ]
    });
    let out = session.on_message(&batch.to_string(), Instant::now()).unwrap();

    assert!(out.is_empty());
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(session.tracker().samples(&ids[0]), 2);
    assert_eq!(session.tracker().samples(&ids[1]), 1);
}

#[test]
fn test_unknown_correlation_id_is_not_fatal() {
    let mut session = StreamSession::new(test_config("localhost")).unwrap();
    session.begin_connect();
    session.on_open();
    session
        .on_message(r#"{"event":"auth_response","status":"success"}"#, Instant::now())
        .unwrap();

    let out = session
        .on_message(
            r#"{"event":"subscribe_response","status":"success","request_id":"stranger"}"#,
            Instant::now(),
        )
        .unwrap();

    assert!(out.is_empty());
    assert_eq!(session.state(), SessionState::Streaming);
    assert!(!session.tracker().has_record("stranger"));
}

#[test]
fn test_unknown_event_and_garbage_are_ignored() {
    let mut session = StreamSession::new(test_config("localhost")).unwrap();
    session.begin_connect();
    session.on_open();
    session
        .on_message(r#"{"event":"auth_response","status":"success"}"#, Instant::now())
        .unwrap();

    let out = session
        .on_message(r#"{"event":"heartbeat","status":"success"}"#, Instant::now())
        .unwrap();
    assert!(out.is_empty());

    let out = session.on_message("{{{{not json", Instant::now()).unwrap();
    assert!(out.is_empty());
    assert_eq!(session.state(), SessionState::Streaming);
}

#[test]
fn test_close_after_streaming_returns_to_disconnected() {
    let mut session = StreamSession::new(test_config("localhost")).unwrap();
    session.begin_connect();
    session.on_open();
    session
        .on_message(r#"{"event":"auth_response","status":"success"}"#, Instant::now())
        .unwrap();
    assert_eq!(session.state(), SessionState::Streaming);

    session.on_close();
    assert_eq!(session.state(), SessionState::Disconnected);
}

// ============================================================================
// Live transport scenarios
// ============================================================================

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let msg = ws
            .next()
            .await
            .expect("connection ended unexpectedly")
            .expect("read failed");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("invalid json from client");
        }
    }
}

#[tokio::test]
async fn test_end_to_end_auth_subscribe_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let auth = next_json(&mut ws).await;
        assert_eq!(auth["action"], "auth");
        assert!(auth["signature"].is_string());
        assert_eq!(auth["api_key"], "test-key");

        ws.send(Message::Text(
            json!({"event": "auth_response", "status": "success"}).to_string(),
        ))
        .await
        .unwrap();

        let first = next_json(&mut ws).await;
        let second = next_json(&mut ws).await;
        assert_eq!(first["base_token"], "BTC");
        assert_eq!(second["base_token"], "ETH");

        let tick_id = first["request_id"].as_str().unwrap().to_string();
        ws.send(Message::Text(
            json!({
                "event": "stream",
                "status": "success",
                "body": [{"request_id": tick_id, "base_token": "BTC", "quote_token": "USD",
                          "buy_price": 50000.0, "sell_price": 49990.0}]
            })
            .to_string(),
        ))
        .await
        .unwrap();

        ws.close(None).await.unwrap();
        tick_id
    });

    let mut session = StreamSession::new(test_config(&addr.to_string())).unwrap();
    let result = session.run().await;

    // Retries disabled: the server close surfaces as a transport error.
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(session.state(), SessionState::Closing);

    let tick_id = server.await.unwrap();
    assert_eq!(session.tracker().samples(&tick_id), 1);
}

#[tokio::test]
async fn test_auth_rejection_is_not_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let _auth = next_json(&mut ws).await;
        ws.send(Message::Text(
            json!({"event": "auth_response", "status": "failure", "error": "invalid api key"})
                .to_string(),
        ))
        .await
        .unwrap();

        // The client must drop the connection without subscribing.
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break true,
                Some(Ok(Message::Text(_))) => break false,
                Some(Ok(_)) => continue,
            }
        }
    });

    let mut config = test_config(&addr.to_string());
    config.retry = RetryPolicy {
        enabled: true,
        max_retries: 3,
        delay: Duration::from_millis(10),
    };
    let mut session = StreamSession::new(config).unwrap();

    let result = session.run().await;
    assert!(matches!(result, Err(ClientError::AuthenticationFailed)));
    assert_eq!(session.state(), SessionState::Closing);
    assert!(
        server.await.unwrap(),
        "client sent frames after the auth rejection"
    );
}

#[tokio::test]
async fn test_exhausted_retries_surface_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut connections = 0u32;
        // Initial attempt plus three retries.
        while connections < 4 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            connections += 1;

            // Read the auth frame, then drop the connection.
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        }
        connections
    });

    let mut config = test_config(&addr.to_string());
    config.retry = RetryPolicy {
        enabled: true,
        max_retries: 3,
        delay: Duration::from_millis(10),
    };
    let mut session = StreamSession::new(config).unwrap();

    let started = Instant::now();
    let result = session.run().await;

    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(session.state(), SessionState::Closing);
    // Three reconnect delays must have elapsed.
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(server.await.unwrap(), 4);
}

#[tokio::test]
async fn test_header_mode_sends_signed_upgrade_headers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut seen = (false, false, false, false);
        let mut ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &tokio_tungstenite::tungstenite::handshake::server::Request,
             response: tokio_tungstenite::tungstenite::handshake::server::Response| {
                let headers = request.headers();
                seen = (
                    headers.contains_key("fx-access-sign"),
                    headers.contains_key("fx-access-timestamp"),
                    headers.contains_key("fx-access-key"),
                    headers.contains_key("fx-access-passphrase"),
                );
                Ok(response)
            },
        )
        .await
        .unwrap();

        // Header mode skips in-band auth: the first frame is a subscribe.
        let first = next_json(&mut ws).await;
        assert_eq!(first["action"], "subscribe");
        let _ = ws.close(None).await;
        seen
    });

    let mut config = test_config(&addr.to_string());
    config.auth_mode = AuthMode::Headers;
    let mut session = StreamSession::new(config).unwrap();

    let result = session.run().await;
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));

    let (sign, timestamp, key, passphrase) = server.await.unwrap();
    assert!(sign && timestamp && key && passphrase);
}
