//! Connection establishment and the live WebSocket
//!
//! A [`Connection`] owns the write half of one negotiated WebSocket. It is
//! created by the connection manager, never mutated after the handshake,
//! and replaced wholesale on reconnect. The read half is handed to the
//! read loop bound to it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt as _};
use midclt_wire::{Frame, FrameCodec};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// The underlying WebSocket stream
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// WebSocket write half
pub(crate) type WsWriter = SplitSink<WsStream, Message>;
/// WebSocket read half
pub(crate) type WsReader = SplitStream<WsStream>;

/// Upper bound on the polite close exchange during teardown
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Opaque session token returned by the handshake
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session(String);

impl Session {
    /// Token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One live, negotiated WebSocket
pub struct Connection {
    generation: u64,
    session: Session,
    writer: Mutex<WsWriter>,
    codec: FrameCodec,
    trace_frames: bool,
    /// Closed on purpose by the client
    closed: CancellationToken,
    /// Found dead by its read loop
    lost: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .field("session", &self.session)
            .field("closed", &self.closed.is_cancelled())
            .field("lost", &self.lost.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Dial the endpoint and negotiate a session
    ///
    /// Sends `{msg:"connect"}` and requires exactly one `connected` reply
    /// with a non-empty session. No retries; on failure the socket is
    /// closed before returning.
    pub(crate) async fn open(
        config: &ClientConfig,
        generation: u64,
    ) -> Result<(Arc<Self>, WsReader)> {
        let timeout = config.connect_timeout();
        match tokio::time::timeout(timeout, Self::dial_and_negotiate(config, generation)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Transport(format!(
                "connecting to {} timed out after {:?}",
                config.endpoint, timeout
            ))),
        }
    }

    async fn dial_and_negotiate(
        config: &ClientConfig,
        generation: u64,
    ) -> Result<(Arc<Self>, WsReader)> {
        debug!("Dialing {} for connection {}", config.endpoint, generation);

        let (stream, _response) = connect_async(config.endpoint.as_str())
            .await
            .map_err(|e| {
                ClientError::Transport(format!(
                    "WebSocket connection to {} failed: {}",
                    config.endpoint, e
                ))
            })?;
        let (mut writer, mut reader) = stream.split();
        let codec = FrameCodec::new();

        let hello = codec.encode(&Frame::connect())?;
        trace_frame(config.trace_frames, generation, "send", &hello);
        if let Err(e) = writer.send(Message::text(hello)).await {
            return Err(ClientError::Transport(format!(
                "sending handshake failed: {}",
                e
            )));
        }

        let session = match read_handshake_reply(&mut reader, codec, config.trace_frames, generation)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                let _ = tokio::time::timeout(CLOSE_GRACE, writer.close()).await;
                return Err(e);
            }
        };

        info!(
            "Connection {} to {} established (session {})",
            generation, config.endpoint, session
        );

        let connection = Arc::new(Self {
            generation,
            session,
            writer: Mutex::new(writer),
            codec,
            trace_frames: config.trace_frames,
            closed: CancellationToken::new(),
            lost: CancellationToken::new(),
        });
        Ok((connection, reader))
    }

    /// Monotonic generation number assigned by the manager
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Session negotiated for this connection
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// True once the client closed this connection
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// True once the read loop found the transport gone
    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    pub(crate) fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    pub(crate) fn lost_token(&self) -> &CancellationToken {
        &self.lost
    }

    pub(crate) fn mark_lost(&self) {
        self.lost.cancel();
    }

    pub(crate) fn codec(&self) -> FrameCodec {
        self.codec
    }

    pub(crate) fn trace_inbound(&self, text: &str) {
        trace_frame(self.trace_frames, self.generation, "recv", text);
    }

    /// Encode and write one frame
    ///
    /// Writers are serialized; a frame is never interleaved with another.
    pub(crate) async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let text = self.codec.encode(frame)?;
        trace_frame(self.trace_frames, self.generation, "send", &text);
        self.send_message(Message::text(text)).await
    }

    /// Write a raw WebSocket message through the exclusive writer section
    pub(crate) async fn send_message(&self, message: Message) -> Result<()> {
        if self.is_closed() || self.is_lost() {
            return Err(ClientError::Transport(format!(
                "connection {} is gone",
                self.generation
            )));
        }
        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(|e| {
            ClientError::Transport(format!(
                "write on connection {} failed: {}",
                self.generation, e
            ))
        })
    }

    /// Close the connection: unblock its read loop, then close the socket
    ///
    /// Idempotent.
    pub(crate) async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        let shutdown = async {
            let mut writer = self.writer.lock().await;
            let _ = writer.send(Message::Close(None)).await;
            let _ = writer.close().await;
        };
        if tokio::time::timeout(CLOSE_GRACE, shutdown).await.is_err() {
            warn!(
                "Connection {} did not close within {:?}, dropping it",
                self.generation, CLOSE_GRACE
            );
        }
        debug!("Connection {} closed", self.generation);
    }

    /// Send WebSocket pings every `interval` until the connection is closed
    /// or lost, or the client shuts down
    pub(crate) async fn keep_alive(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;
        let mut ping_count = 0u64;

        debug!(
            "Keep-alive task started for connection {} with interval {:?}",
            self.generation, interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.closed.cancelled() => break,
                _ = self.lost.cancelled() => break,
                _ = ticker.tick() => {
                    ping_count += 1;
                    let payload = format!("ping-{}-{}", self.generation, ping_count);
                    match self.send_message(Message::Ping(payload.into_bytes().into())).await {
                        Ok(()) => trace!(
                            "Keep-alive ping {} sent on connection {}",
                            ping_count, self.generation
                        ),
                        // the read loop notices a dead socket and reconnects
                        Err(e) => debug!("Keep-alive ping failed: {}", e),
                    }
                }
            }
        }

        debug!("Keep-alive task terminated for connection {}", self.generation);
    }
}

/// Wait for the single handshake reply, skipping control frames
async fn read_handshake_reply(
    reader: &mut WsReader,
    codec: FrameCodec,
    trace_frames: bool,
    generation: u64,
) -> Result<Session> {
    loop {
        let message = match reader.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                return Err(ClientError::Transport(format!(
                    "reading handshake reply failed: {}",
                    e
                )));
            }
            None => {
                return Err(ClientError::Handshake(
                    "connection closed before handshake reply".to_string(),
                ));
            }
        };

        let reply = match &message {
            Message::Text(text) => {
                trace_frame(trace_frames, generation, "recv", text.as_str());
                codec.decode_str(text.as_str())
            }
            Message::Binary(data) => codec.decode(data),
            Message::Close(_) => {
                return Err(ClientError::Handshake(
                    "server closed the connection during handshake".to_string(),
                ));
            }
            _ => continue,
        };

        let reply = reply
            .map_err(|e| ClientError::Handshake(format!("malformed handshake reply: {}", e)))?;

        if !reply.is_connected() {
            return Err(ClientError::Handshake(match (reply.msg, reply.session_token()) {
                (Some(msg), _) if msg != midclt_wire::Disposition::Connected => {
                    format!("unexpected reply disposition '{}'", msg)
                }
                (None, _) => "reply carries no disposition".to_string(),
                _ => "reply carries no session".to_string(),
            }));
        }

        let session = reply.session_token().unwrap_or_default().to_string();
        return Ok(Session(session));
    }
}

fn trace_frame(enabled: bool, generation: u64, direction: &str, text: &str) {
    if enabled {
        debug!(target: "midclt::frames", generation, direction, "{}", text);
    }
}
