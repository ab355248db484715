//! Shared test infrastructure: a real WebSocket peer speaking the
//! middleware protocol
//!
//! NO MOCKS: the client under test dials a real listener on 127.0.0.1.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use midclt::ClientConfig;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::Frame as WsFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_util::sync::CancellationToken;

/// How the peer answers one method call
#[derive(Debug, Clone)]
pub enum Reply {
    /// `{id, msg:"result", result}`
    Result(Value),
    /// `{id, msg:"result", error}`
    Error(Value),
    /// Send these raw texts instead of a reply
    Raw(Vec<String>),
    /// Send a text message whose payload is not valid UTF-8, no reply
    InvalidUtf8,
    /// Never answer
    Silent,
    /// Drop the TCP connection without a close handshake
    Drop,
}

/// One call as seen by the peer
#[derive(Debug, Clone)]
pub struct Call {
    pub id: String,
    pub method: String,
    pub params: Vec<Value>,
}

type Responder = Arc<dyn Fn(&Call) -> Reply + Send + Sync>;

struct PeerState {
    handshake_reply: Value,
    responder: Responder,
    shuffle_batch: Option<usize>,
    connections: AtomicUsize,
    rejections: AtomicUsize,
    calls: Mutex<Vec<Call>>,
    frames: Mutex<Vec<Value>>,
    kill: Mutex<CancellationToken>,
}

/// Builder for [`TestPeer`]
pub struct PeerBuilder {
    handshake_reply: Value,
    responder: Responder,
    shuffle_batch: Option<usize>,
}

impl PeerBuilder {
    /// Reply to the handshake with `reply` instead of a valid session
    pub fn handshake(mut self, reply: Value) -> Self {
        self.handshake_reply = reply;
        self
    }

    /// Answer calls with `responder`
    pub fn respond<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Call) -> Reply + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// Hold replies until `batch` are ready, then send them shuffled
    pub fn shuffle(mut self, batch: usize) -> Self {
        self.shuffle_batch = Some(batch);
        self
    }

    pub async fn start(self) -> TestPeer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let state = Arc::new(PeerState {
            handshake_reply: self.handshake_reply,
            responder: self.responder,
            shuffle_batch: self.shuffle_batch,
            connections: AtomicUsize::new(0),
            rejections: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            kill: Mutex::new(CancellationToken::new()),
        });

        let accept_state = Arc::clone(&state);
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let kill = accept_state.kill.lock().unwrap().clone();
                        let conn_state = Arc::clone(&accept_state);
                        let conn_shutdown = accept_shutdown.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = conn_shutdown.cancelled() => {}
                                _ = kill.cancelled() => {}
                                _ = serve(stream, conn_state) => {}
                            }
                        });
                    }
                }
            }
        });

        TestPeer {
            endpoint: format!("ws://{}/websocket", addr),
            state,
            shutdown,
        }
    }
}

/// In-process middleware peer
pub struct TestPeer {
    pub endpoint: String,
    state: Arc<PeerState>,
    shutdown: CancellationToken,
}

impl TestPeer {
    pub fn builder() -> PeerBuilder {
        PeerBuilder {
            handshake_reply: json!({"msg": "connected", "session": "abc"}),
            responder: Arc::new(|_: &Call| Reply::Result(Value::Null)),
            shuffle_batch: None,
        }
    }

    /// Peer answering every call with `responder`
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Call) -> Reply + Send + Sync + 'static,
    {
        Self::builder().respond(responder).start().await
    }

    /// Client configuration pointing at this peer
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.endpoint.clone())
            .with_connect_timeout(Duration::from_secs(5))
            .with_auth_timeout(Duration::from_secs(5))
            .with_reconnect_delay(Duration::from_millis(50))
    }

    /// Completed protocol handshakes so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Calls received so far, in arrival order
    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Every frame received so far, handshakes included
    pub fn frames(&self) -> Vec<Value> {
        self.state.frames.lock().unwrap().clone()
    }

    /// Answer the next `count` handshakes with `{msg:"failed"}`
    pub fn reject_next_handshakes(&self, count: usize) {
        self.state.rejections.store(count, Ordering::SeqCst);
    }

    /// Drop every live connection without a close handshake
    pub fn drop_connections(&self) {
        let mut kill = self.state.kill.lock().unwrap();
        kill.cancel();
        *kill = CancellationToken::new();
    }

    /// Wait until at least `count` handshakes completed
    pub async fn wait_for_connections(&self, count: usize) {
        wait_until(|| self.connections() >= count).await;
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll `condition` every 10ms for up to 5s
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

async fn serve(stream: TcpStream, state: Arc<PeerState>) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    match ws.next().await {
        Some(Ok(Message::Text(hello))) => {
            if let Ok(frame) = serde_json::from_str::<Value>(hello.as_str()) {
                state.frames.lock().unwrap().push(frame);
            }
        }
        _ => return,
    }
    let rejected = state
        .rejections
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok();
    if rejected {
        let failed = json!({"msg": "failed", "version": "1"}).to_string();
        let _ = ws.send(Message::text(failed)).await;
        return;
    }
    if ws
        .send(Message::text(state.handshake_reply.to_string()))
        .await
        .is_err()
    {
        return;
    }
    state.connections.fetch_add(1, Ordering::SeqCst);

    let mut held: Vec<String> = Vec::new();
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            if matches!(message, Message::Close(_)) {
                return;
            }
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        state.frames.lock().unwrap().push(frame.clone());
        if frame["msg"] != "method" {
            continue;
        }

        let call = Call {
            id: frame["id"].as_str().unwrap_or_default().to_string(),
            method: frame["method"].as_str().unwrap_or_default().to_string(),
            params: frame["params"].as_array().cloned().unwrap_or_default(),
        };
        state.calls.lock().unwrap().push(call.clone());

        let outgoing = match (state.responder)(&call) {
            Reply::Result(result) => {
                vec![json!({"id": call.id, "msg": "result", "result": result}).to_string()]
            }
            Reply::Error(error) => {
                vec![json!({"id": call.id, "msg": "result", "error": error}).to_string()]
            }
            Reply::Raw(texts) => texts,
            Reply::InvalidUtf8 => {
                let frame = WsFrame::message(vec![0xff, 0xfe], OpCode::Data(Data::Text), true);
                if ws.send(Message::Frame(frame)).await.is_err() {
                    return;
                }
                continue;
            }
            Reply::Silent => continue,
            Reply::Drop => return,
        };

        match state.shuffle_batch {
            Some(batch) => {
                held.extend(outgoing);
                if held.len() >= batch {
                    fastrand::shuffle(&mut held);
                    for text in held.drain(..) {
                        if ws.send(Message::text(text)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            None => {
                for text in outgoing {
                    if ws.send(Message::text(text)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
