//! Realtime connection integration tests
//!
//! Runs the connection against a scripted in-process WebSocket server, so
//! the handshake, the outbound wire shapes, and the inbound dispatch are
//! exercised over a real socket without the remote service.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use parlance::realtime::protocol::ServerEvent;
use parlance::{ConnectionEvent, ConnectionState, RealtimeConnection, SessionConfig};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

mod common;

/// Bind a loopback listener and build a config pointing at it
async fn local_server() -> (TcpListener, SessionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = SessionConfig::new("sk-test").with_endpoint(format!("ws://127.0.0.1:{port}"));
    (listener, config)
}

/// Receive the next connection event or fail loudly
async fn recv_event(events: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a connection event")
        .expect("event channel closed")
}

/// Receive the next event that came off the wire, skipping `Open`
async fn recv_inbound(events: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
    loop {
        match recv_event(events).await {
            ConnectionEvent::Open { .. } => {}
            event => return event,
        }
    }
}

#[tokio::test]
async fn test_connect_configures_session_before_open() {
    let (listener, config) = local_server().await;
    let (hold_tx, hold_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // the very first frame must be the session configuration
        let text = ws.next().await.unwrap().unwrap().into_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        // keep the socket open until the client finishes asserting
        let _ = hold_rx.await;
        value
    });

    let (connection, mut events) = RealtimeConnection::connect(&config).await.unwrap();

    assert!(connection.is_connected());
    assert_eq!(connection.state(), ConnectionState::Connected);

    match recv_event(&mut events).await {
        ConnectionEvent::Open { status } => assert_eq!(status, 101),
        other => panic!("expected Open, got {other:?}"),
    }

    let _ = hold_tx.send(());
    let update = server.await.unwrap();
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["voice"], "alloy");
    assert_eq!(update["session"]["input_audio_format"], "pcm16");
    assert_eq!(update["session"]["turn_detection"]["type"], "server_vad");
}

#[tokio::test]
async fn test_outbound_commands_reach_the_wire_in_order() {
    let (listener, config) = local_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // session.update, then the five commands under test
        let mut frames = Vec::new();
        for _ in 0..6 {
            let text = ws.next().await.unwrap().unwrap().into_text().unwrap();
            frames.push(serde_json::from_str::<serde_json::Value>(&text).unwrap());
        }
        frames
    });

    let (connection, _events) = RealtimeConnection::connect(&config).await.unwrap();

    let pcm = common::tone_ms(440.0, 0.3, 40);
    connection.send_audio(&pcm).await.unwrap();
    connection.commit_audio().await.unwrap();
    connection.send_text("what's the plan?").await.unwrap();
    connection
        .inject_assistant_text("The plan moved to Friday.")
        .await
        .unwrap();
    connection.request_response().await.unwrap();

    let frames = server.await.unwrap();
    assert_eq!(frames[0]["type"], "session.update");

    assert_eq!(frames[1]["type"], "input_audio_buffer.append");
    let decoded = BASE64.decode(frames[1]["audio"].as_str().unwrap()).unwrap();
    assert_eq!(decoded, pcm);

    assert_eq!(frames[2]["type"], "input_audio_buffer.commit");

    assert_eq!(frames[3]["type"], "conversation.item.create");
    assert_eq!(frames[3]["item"]["role"], "user");
    assert_eq!(frames[3]["item"]["content"][0]["type"], "input_text");
    assert_eq!(frames[3]["item"]["content"][0]["text"], "what's the plan?");

    assert_eq!(frames[4]["type"], "conversation.item.create");
    assert_eq!(frames[4]["item"]["role"], "assistant");
    assert_eq!(frames[4]["item"]["content"][0]["type"], "text");

    assert_eq!(frames[5]["type"], "response.create");
    assert_eq!(
        frames[5]["response"]["modalities"],
        serde_json::json!(["text", "audio"])
    );
    assert!(
        frames[5]["response"]["instructions"]
            .as_str()
            .is_some_and(|s| !s.is_empty())
    );
}

#[tokio::test]
async fn test_inbound_frames_dispatch_typed_opaque_and_malformed() {
    let (listener, config) = local_server().await;
    let (hold_tx, hold_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.next().await.unwrap().unwrap(); // session.update

        for frame in [
            r#"{"type":"session.created","event_id":"evt_1","session":{"id":"sess_1"}}"#,
            r#"{"type":"response.audio_transcript.delta","event_id":"evt_2","delta":"Sure."}"#,
            r#"{"type":"rate_limits.updated","rate_limits":[]}"#,
            "this is not json",
        ] {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }

        let _ = hold_rx.await;
    });

    let (_connection, mut events) = RealtimeConnection::connect(&config).await.unwrap();

    match recv_inbound(&mut events).await {
        ConnectionEvent::Event {
            event: ServerEvent::SessionCreated,
            raw,
        } => assert!(raw.contains("sess_1")),
        other => panic!("expected SessionCreated, got {other:?}"),
    }

    match recv_inbound(&mut events).await {
        ConnectionEvent::Event {
            event: ServerEvent::AudioTranscriptDelta { delta },
            ..
        } => assert_eq!(delta, "Sure."),
        other => panic!("expected AudioTranscriptDelta, got {other:?}"),
    }

    match recv_inbound(&mut events).await {
        ConnectionEvent::Unknown { event_type, raw } => {
            assert_eq!(event_type, "rate_limits.updated");
            assert!(raw.contains("rate_limits"));
        }
        other => panic!("expected Unknown, got {other:?}"),
    }

    match recv_inbound(&mut events).await {
        ConnectionEvent::Malformed { raw, .. } => assert_eq!(raw, "this is not json"),
        other => panic!("expected Malformed, got {other:?}"),
    }

    let _ = hold_tx.send(());
    server.await.unwrap();
}

#[tokio::test]
async fn test_server_close_reports_reason_and_drops_late_sends() {
    let (listener, config) = local_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.next().await.unwrap().unwrap(); // session.update

        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "server going away".into(),
        })))
        .await
        .unwrap();
    });

    let (connection, mut events) = RealtimeConnection::connect(&config).await.unwrap();
    server.await.unwrap();

    loop {
        match recv_event(&mut events).await {
            ConnectionEvent::Closed { reason } => {
                assert_eq!(reason.as_deref(), Some("server going away"));
                break;
            }
            ConnectionEvent::Open { .. } => {}
            other => panic!("expected Open or Closed, got {other:?}"),
        }
    }

    assert_eq!(connection.state(), ConnectionState::Disconnected);

    // sends after closure degrade to no-ops instead of failing
    connection.send_text("too late").await.unwrap();
}

#[tokio::test]
async fn test_client_disconnect_sends_normal_closure() {
    let (listener, config) = local_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.next().await.unwrap().unwrap(); // session.update

        // next frame is the client's close
        match ws.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason, "client disconnect");
            }
            other => panic!("expected a close frame, got {other:?}"),
        }
        // one more poll flushes the close acknowledgement
        let _ = ws.next().await;
    });

    let (connection, mut events) = RealtimeConnection::connect(&config).await.unwrap();

    connection.disconnect().await;
    // repeated disconnects are no-ops
    connection.disconnect().await;
    assert!(!connection.is_connected());

    server.await.unwrap();

    loop {
        match recv_event(&mut events).await {
            ConnectionEvent::Closed { .. } => break,
            // a torn-down socket may surface a transport error first
            ConnectionEvent::Open { .. } | ConnectionEvent::TransportError { .. } => {}
            other => panic!("expected Open or Closed, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_connect_rejects_bad_config() {
    let config = SessionConfig::new("");
    assert!(RealtimeConnection::connect(&config).await.is_err());

    let config = SessionConfig::new("sk-test").with_endpoint("https://not-a-socket");
    assert!(RealtimeConnection::connect(&config).await.is_err());
}
