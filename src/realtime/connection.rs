//! Duplex connection to the realtime voice service
//!
//! `connect` performs the WebSocket handshake, spawns a writer task draining
//! an outbound channel into the socket and a reader task parsing inbound text
//! frames into [`ConnectionEvent`]s, and sends the session configuration
//! before the consumer sees `Open`. Outbound operations serialize one command
//! each and degrade to a warning when the connection is down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::realtime::protocol::{
    ClientCommand, ConversationItem, ResponseSpec, ServerEvent, SessionProperties,
};

/// Delivery guidance attached to every response request
const RESPONSE_INSTRUCTIONS: &str = "Speak with energy and warmth while staying strictly \
    professional. Use clear business language; no slang, roleplay, or character voices. \
    Keep answers focused and helpful.";

/// Connection lifecycle state
///
/// Terminal on `Disconnected`; reconnecting means a fresh [`connect`].
///
/// [`connect`]: RealtimeConnection::connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ConnectionState {
        Self::decode(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn swap(&self, state: ConnectionState) -> ConnectionState {
        Self::decode(self.0.swap(state as u8, Ordering::AcqRel))
    }

    const fn decode(value: u8) -> ConnectionState {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Connected,
        }
    }
}

/// Event delivered to the connection consumer
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Handshake completed and session configuration sent
    Open {
        /// HTTP status of the upgrade response
        status: u16,
    },
    /// Connection closed; emitted exactly once per connection
    Closed { reason: Option<String> },
    /// Socket-level read/write failure
    TransportError { message: String },
    /// Frame was not valid JSON
    Malformed { error: String, raw: String },
    /// Typed event, with the raw frame kept for trace passthrough
    Event { event: ServerEvent, raw: String },
    /// Valid JSON without a typed variant; forwarded rather than dropped
    Unknown { event_type: String, raw: String },
}

/// Handle to an open realtime connection
///
/// Cheap to clone; all clones share the outbound channel and state.
#[derive(Debug, Clone)]
pub struct RealtimeConnection {
    state: Arc<StateCell>,
    outbound: mpsc::Sender<Message>,
}

impl RealtimeConnection {
    /// Open the socket and start the reader and writer tasks
    ///
    /// The session configuration command is enqueued before `Open` is
    /// delivered; a configuration failure is reported as a transport error
    /// without tearing the connection down. Returns the handle plus the
    /// inbound event receiver.
    pub async fn connect(
        config: &SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<ConnectionEvent>)> {
        config.validate()?;
        let state = Arc::new(StateCell::new(ConnectionState::Connecting));

        let mut request = config.connection_url().into_client_request()?;
        let auth = format!("Bearer {}", config.api_key)
            .parse::<HeaderValue>()
            .map_err(|_| Error::Config("API key is not a valid header value".to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        tracing::info!(
            url = %config.connection_url(),
            model = %config.model,
            "connecting to realtime service"
        );
        let (stream, response) = connect_async(request).await?;
        let status = response.status().as_u16();
        let (mut sink, mut source) = stream.split();

        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(256);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);

        // Writer: drain the outbound channel into the socket
        let writer_events = event_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::error!(error = %e, "websocket send failed");
                    let _ = writer_events
                        .send(ConnectionEvent::TransportError {
                            message: e.to_string(),
                        })
                        .await;
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // Reader: parse inbound frames until close or failure
        let reader_state = Arc::clone(&state);
        let reader_events = event_tx.clone();
        tokio::spawn(async move {
            let mut close_reason = None;
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if reader_events.send(parse_inbound(&text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        close_reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    // ping/pong are answered by the protocol layer
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "websocket read failed");
                        let _ = reader_events
                            .send(ConnectionEvent::TransportError {
                                message: e.to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }
            reader_state.store(ConnectionState::Disconnected);
            let _ = reader_events
                .send(ConnectionEvent::Closed {
                    reason: close_reason,
                })
                .await;
            tracing::info!("realtime connection closed");
        });

        let connection = Self {
            state: Arc::clone(&state),
            outbound: outbound_tx,
        };

        // Configure the session before the consumer sees Open
        let update = ClientCommand::SessionUpdate {
            session: SessionProperties::from(config),
        };
        if let Err(e) = connection.send_unchecked(&update).await {
            tracing::error!(error = %e, "failed to send session configuration");
            let _ = event_tx
                .send(ConnectionEvent::TransportError {
                    message: format!("session configuration failed: {e}"),
                })
                .await;
        }

        state.store(ConnectionState::Connected);
        let _ = event_tx.send(ConnectionEvent::Open { status }).await;
        tracing::info!(status, "realtime connection established");

        Ok((connection, event_rx))
    }

    /// Append captured PCM to the remote input buffer, base64-encoded
    pub async fn send_audio(&self, pcm: &[u8]) -> Result<()> {
        let audio = BASE64.encode(pcm);
        self.send_command(&ClientCommand::AppendAudio { audio })
            .await
    }

    /// Finalize the remote input buffer
    pub async fn commit_audio(&self) -> Result<()> {
        self.send_command(&ClientCommand::CommitAudio).await
    }

    /// Create a user conversation item
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_command(&ClientCommand::CreateItem {
            item: ConversationItem::user_text(text),
        })
        .await
    }

    /// Create an assistant conversation item without requesting a response
    pub async fn inject_assistant_text(&self, text: &str) -> Result<()> {
        self.send_command(&ClientCommand::CreateItem {
            item: ConversationItem::assistant_text(text),
        })
        .await
    }

    /// Ask the model to generate a text + audio response
    pub async fn request_response(&self) -> Result<()> {
        self.send_command(&ClientCommand::CreateResponse {
            response: ResponseSpec::text_and_audio(RESPONSE_INSTRUCTIONS),
        })
        .await
    }

    /// Re-send the session configuration
    pub async fn update_session(&self, config: &SessionConfig) -> Result<()> {
        self.send_command(&ClientCommand::SessionUpdate {
            session: SessionProperties::from(config),
        })
        .await
    }

    /// Enqueue a normal-closure frame; safe to call repeatedly
    pub async fn disconnect(&self) {
        if self.state.swap(ConnectionState::Disconnected) == ConnectionState::Disconnected {
            return;
        }
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };
        if self.outbound.send(Message::Close(Some(frame))).await.is_err() {
            tracing::debug!("writer already gone during disconnect");
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.load() == ConnectionState::Connected
    }

    async fn send_command(&self, command: &ClientCommand) -> Result<()> {
        if !self.is_connected() {
            tracing::warn!("not connected, dropping outbound command");
            return Ok(());
        }
        self.send_unchecked(command).await
    }

    async fn send_unchecked(&self, command: &ClientCommand) -> Result<()> {
        let json = serde_json::to_string(command)?;
        self.outbound
            .send(Message::Text(json))
            .await
            .map_err(|_| Error::Connection("writer task is gone".to_string()))
    }
}

/// Parse one inbound text frame into a connection event
///
/// A known type with a readable payload becomes a typed event. Valid JSON
/// that does not match any variant is forwarded opaquely with its `type`
/// string. Anything else is malformed.
fn parse_inbound(text: &str) -> ConnectionEvent {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => ConnectionEvent::Event {
            event,
            raw: text.to_string(),
        },
        Err(typed_err) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => {
                let event_type = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                tracing::debug!(event_type = %event_type, "unhandled event type");
                ConnectionEvent::Unknown {
                    event_type,
                    raw: text.to_string(),
                }
            }
            Err(_) => ConnectionEvent::Malformed {
                error: typed_err.to_string(),
                raw: text.to_string(),
            },
        },
    }
}
