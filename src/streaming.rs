//! WebSocket client for the live transcription service.
//!
//! Outbound traffic is raw binary PCM16 frames; inbound traffic is JSON
//! events. Events are forwarded in arrival order on an unbounded channel and
//! never batched or reordered. Sends while the connection is closed are
//! silently dropped — the live view prefers bounded latency over
//! completeness, and the batch recorder is the completeness fallback.

use crate::error::SessionError;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// One inbound event from the streaming service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Transcript {
        text: String,
        speaker: Option<String>,
        is_final: bool,
    },
    /// Service-reported error on an otherwise-open connection; recoverable.
    ServiceError { message: String },
    /// Terminal: the connection closed, intentionally or not.
    Closed,
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    is_final: bool,
}

/// Parse one inbound text frame. Unknown event kinds and malformed frames
/// yield `None` and are skipped by the reader.
fn parse_event(raw: &str) -> Option<StreamEvent> {
    let wire: WireEvent = match serde_json::from_str(raw) {
        Ok(wire) => wire,
        Err(e) => {
            warn!("skipping malformed streaming event: {e}");
            return None;
        }
    };
    match wire.kind.as_str() {
        "transcript" => Some(StreamEvent::Transcript {
            text: wire.text,
            speaker: wire.speaker,
            is_final: wire.is_final,
        }),
        "error" => Some(StreamEvent::ServiceError { message: wire.text }),
        other => {
            warn!("skipping unknown streaming event kind '{other}'");
            None
        }
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct StreamingClient {
    sink: WsSink,
    open: bool,
    reader: Option<JoinHandle<()>>,
}

impl StreamingClient {
    /// Open the persistent duplex connection. Inbound events arrive on the
    /// returned channel; `StreamEvent::Closed` is always the last event.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StreamEvent>), SessionError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        debug!("streaming connection established to {url}");

        let (sink, mut stream) = ws.split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(raw)) => {
                        if let Some(event) = parse_event(&raw) {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {} // ping/pong/binary: nothing to do
                    Err(e) => {
                        warn!("streaming connection dropped: {e}");
                        break;
                    }
                }
            }
            let _ = event_tx.send(StreamEvent::Closed);
        });

        Ok((
            Self {
                sink,
                open: true,
                reader: Some(reader),
            },
            event_rx,
        ))
    }

    /// Transmit one PCM packet. Dropped silently when the connection is not
    /// open — no buffering, no retry.
    pub async fn send(&mut self, packet: Vec<u8>) {
        if !self.open {
            return;
        }
        if let Err(e) = self.sink.send(Message::Binary(packet)).await {
            debug!("dropping PCM packet, connection no longer open: {e}");
            self.open = false;
        }
    }

    /// Record a close observed on the inbound side so later sends drop.
    pub fn mark_closed(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Send a close frame and wait for the reader to finish.
    pub async fn close(&mut self) {
        if self.open {
            let _ = self.sink.send(Message::Close(None)).await;
            self.open = false;
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
    }
}
