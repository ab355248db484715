//! Read loop bound to one connection
//!
//! Decodes inbound frames and routes replies to the correlator. Exactly one
//! read loop runs per connection; it never survives a reconnect. When the
//! transport is found gone the loop arms a reconnect and exits; other read
//! failures are published on the shared error channel and reading resumes.

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;

use futures::StreamExt as _;
use midclt_wire::{Disposition, Frame};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, WsReader};
use crate::correlator::Correlator;
use crate::error::ClientError;
use crate::signal::ReconnectSignal;

/// How a read failure affects the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadFailure {
    /// The transport is gone; reconnect
    Gone,
    /// Report and keep reading
    Transient,
}

/// Classify a WebSocket read error
pub(crate) fn classify(err: &WsError) -> ReadFailure {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ReadFailure::Gone,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => ReadFailure::Gone,
        WsError::Io(io_err) => match io_err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected => ReadFailure::Gone,
            _ => ReadFailure::Transient,
        },
        _ => ReadFailure::Transient,
    }
}

pub(crate) struct ReadLoop {
    conn: Arc<Connection>,
    stream: WsReader,
    correlator: Arc<Correlator>,
    errors: mpsc::Sender<ClientError>,
    reconnect: ReconnectSignal,
    shutdown: CancellationToken,
}

impl ReadLoop {
    pub(crate) fn new(
        conn: Arc<Connection>,
        stream: WsReader,
        correlator: Arc<Correlator>,
        errors: mpsc::Sender<ClientError>,
        reconnect: ReconnectSignal,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            conn,
            stream,
            correlator,
            errors,
            reconnect,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let generation = self.conn.generation();
        debug!("Read loop started for connection {}", generation);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.conn.closed_token().cancelled() => break,
                next = self.stream.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    if self.handle_message(message).await.is_break() {
                        self.connection_gone("peer sent close");
                        break;
                    }
                }
                Some(Err(e)) => match classify(&e) {
                    ReadFailure::Gone => {
                        self.connection_gone(&e.to_string());
                        break;
                    }
                    ReadFailure::Transient => {
                        if self.is_stopping() {
                            break;
                        }
                        warn!("Read error on connection {}: {}", generation, e);
                        if self
                            .errors
                            .try_send(ClientError::Transport(e.to_string()))
                            .is_err()
                        {
                            trace!("Error channel full, dropping read error");
                        }
                    }
                },
                None => {
                    self.connection_gone("stream ended");
                    break;
                }
            }
        }

        debug!("Read loop terminated for connection {}", generation);
    }

    fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled() || self.conn.is_closed()
    }

    /// Mark the connection lost and arm a reconnect, unless the loss was
    /// caused by our own shutdown or close
    fn connection_gone(&self, reason: &str) {
        if self.is_stopping() {
            return;
        }
        info!(
            "Connection {} lost ({}), requesting reconnect",
            self.conn.generation(),
            reason
        );
        self.conn.mark_lost();
        self.reconnect.notify(self.conn.generation());
    }

    async fn handle_message(&self, message: Message) -> ControlFlow<()> {
        match message {
            Message::Text(text) => {
                self.conn.trace_inbound(text.as_str());
                self.dispatch(text.as_bytes()).await;
            }
            Message::Binary(data) => self.dispatch(&data).await,
            Message::Ping(data) => {
                trace!("Received ping on connection {}", self.conn.generation());
                if let Err(e) = self.conn.send_message(Message::Pong(data)).await {
                    debug!("Failed to answer ping: {}", e);
                }
            }
            Message::Pong(_) => {
                trace!("Received pong on connection {}", self.conn.generation());
            }
            Message::Close(frame) => {
                debug!(
                    "Close frame on connection {}: {:?}",
                    self.conn.generation(),
                    frame
                );
                return ControlFlow::Break(());
            }
            Message::Frame(_) => {}
        }
        ControlFlow::Continue(())
    }

    async fn dispatch(&self, bytes: &[u8]) {
        let frame = match self.conn.codec().decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    "Dropping malformed frame on connection {}: {}",
                    self.conn.generation(),
                    e
                );
                return;
            }
        };

        if frame.msg == Some(Disposition::Ping) {
            if let Err(e) = self.conn.write_frame(&Frame::pong(frame.id.clone())).await {
                debug!("Failed to answer protocol ping: {}", e);
            }
            return;
        }

        match frame.correlation_id() {
            Some(id) => {
                let id = id.to_string();
                self.correlator.deliver(&id, frame);
            }
            None => {
                // events and collection updates are not subscribed to
                debug!(
                    "Ignoring uncorrelated frame (msg {:?}, collection {:?})",
                    frame.msg, frame.collection
                );
            }
        }
    }
}
