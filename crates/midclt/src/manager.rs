//! Connection manager
//!
//! Owns the current connection, its lifecycle state and every background
//! task. The current connection is swapped atomically: readers take a
//! snapshot and never observe a half-built one. A single supervisor task
//! consumes reconnect signals, so at most one reconnect runs at a time.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::auth::authenticate;
use crate::caller::Caller;
use crate::config::{ClientConfig, Credentials};
use crate::connection::{Connection, WsReader};
use crate::context::CallContext;
use crate::correlator::Correlator;
use crate::error::{ClientError, Result};
use crate::reader::ReadLoop;
use crate::signal::{ReconnectSignal, ReconnectSignals};
use crate::state::ConnectionState;

pub(crate) struct ConnectionManager {
    config: ClientConfig,
    credentials: Credentials,
    caller: Caller,
    correlator: Arc<Correlator>,
    current: ArcSwapOption<Connection>,
    state: watch::Sender<ConnectionState>,
    errors: mpsc::Sender<ClientError>,
    reconnect: ReconnectSignal,
    shutdown: CancellationToken,
    workers: TaskTracker,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.config.endpoint)
            .field("state", &*self.state.borrow())
            .field("current", &self.current.load_full())
            .field("caller", &self.caller)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Validate `config`, establish the first connection and start the
    /// reconnect supervisor
    ///
    /// A handshake or authentication failure here is fatal; nothing is left
    /// running.
    pub(crate) async fn start(config: ClientConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let (errors, errors_rx) = mpsc::channel(1);
        let (reconnect, signals) = ReconnectSignal::channel();
        let shutdown = CancellationToken::new();
        let correlator = Correlator::new();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let manager = Arc::new(Self {
            credentials: config.credentials(),
            caller: Caller::new(Arc::clone(&correlator), errors_rx, shutdown.clone()),
            config,
            correlator,
            current: ArcSwapOption::empty(),
            state,
            errors,
            reconnect,
            shutdown,
            workers: TaskTracker::new(),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        manager.transition(ConnectionState::Connecting);
        match manager.establish().await {
            Ok(conn) => manager.install(conn).await,
            Err(e) => {
                warn!("Initial connection to {} failed: {}", manager.config.endpoint, e);
                manager.close().await;
                return Err(e);
            }
        }

        let supervisor = Self::supervise(
            Arc::downgrade(&manager),
            signals,
            manager.shutdown.clone(),
        );
        manager.workers.spawn(supervisor);
        Ok(manager)
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn caller(&self) -> &Caller {
        &self.caller
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn current(&self) -> Option<Arc<Connection>> {
        self.current.load_full()
    }

    pub(crate) fn pending_calls(&self) -> usize {
        self.correlator.len()
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Publish `next` unless the state is already terminal
    fn transition(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next || current.is_terminal() {
                return false;
            }
            debug!("Connection state {} -> {}", current, next);
            *current = next;
            true
        });
    }

    /// Wait until a usable connection is installed
    ///
    /// Bounded by `ctx`; fails with [`ClientError::Closed`] once the client
    /// is closed.
    pub(crate) async fn ready_connection(&self, ctx: &CallContext) -> Result<Arc<Connection>> {
        let mut state = self.state.subscribe();
        loop {
            let observed = *state.borrow_and_update();
            match observed {
                ConnectionState::Closed => return Err(ClientError::Closed),
                ConnectionState::Ready => {
                    if let Some(conn) = self.current.load_full()
                        && !conn.is_lost()
                    {
                        return Ok(conn);
                    }
                }
                _ => {}
            }

            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::Closed);
                    }
                }
                err = ctx.done() => return Err(err),
            }
        }
    }

    /// Dial, negotiate and authenticate a new connection
    async fn establish(&self) -> Result<Arc<Connection>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (conn, stream) = Connection::open(&self.config, generation).await?;
        self.spawn_read_loop(&conn, stream);

        if !matches!(self.credentials, Credentials::None) {
            self.transition(ConnectionState::Authenticating);
        }
        let login = authenticate(
            &self.caller,
            &conn,
            &self.credentials,
            self.config.auth_timeout(),
        );
        let outcome = tokio::select! {
            outcome = login => outcome,
            _ = conn.lost_token().cancelled() => Err(ClientError::Auth(format!(
                "connection {} lost during login",
                generation
            ))),
        };
        if let Err(e) = outcome {
            conn.close().await;
            return Err(e);
        }

        if let Some(interval) = self.config.keepalive_interval() {
            self.workers
                .spawn(Arc::clone(&conn).keep_alive(interval, self.shutdown.clone()));
        }
        Ok(conn)
    }

    fn spawn_read_loop(&self, conn: &Arc<Connection>, stream: WsReader) {
        let read_loop = ReadLoop::new(
            Arc::clone(conn),
            stream,
            Arc::clone(&self.correlator),
            self.errors.clone(),
            self.reconnect.clone(),
            self.shutdown.clone(),
        );
        self.workers.spawn(read_loop.run());
    }

    /// Make `conn` the current connection and publish `Ready`
    async fn install(&self, conn: Arc<Connection>) {
        let generation = conn.generation();
        let previous = self.current.swap(Some(conn));

        // lost a race with close(): take the connection back down
        if self.shutdown.is_cancelled() {
            if let Some(conn) = self.current.swap(None) {
                conn.close().await;
            }
        } else {
            self.transition(ConnectionState::Ready);
            info!(
                "Client ready on connection {} to {}",
                generation, self.config.endpoint
            );
        }

        if let Some(previous) = previous {
            previous.close().await;
        }
    }

    /// True unless the installed connection is still healthy
    fn needs_reconnect(&self) -> bool {
        self.current.load_full().is_none_or(|conn| conn.is_lost())
    }

    /// Reconnect supervisor
    ///
    /// Holds only a weak reference so that dropping every client handle
    /// tears the manager down.
    async fn supervise(
        manager: Weak<Self>,
        mut signals: ReconnectSignals,
        shutdown: CancellationToken,
    ) {
        debug!("Reconnect supervisor started");

        loop {
            let generation = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                signal = signals.recv() => match signal {
                    Some(generation) => generation,
                    None => break,
                },
            };
            let Some(manager) = manager.upgrade() else {
                break;
            };

            // signals from replaced connections arrive late
            if !manager.needs_reconnect() {
                debug!("Ignoring stale reconnect signal for connection {}", generation);
                continue;
            }

            manager.transition(ConnectionState::Connecting);
            info!(
                "Reconnecting to {} after losing connection {}",
                manager.config.endpoint, generation
            );

            let attempt = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                attempt = manager.establish() => attempt,
            };

            match attempt {
                Ok(conn) => manager.install(conn).await,
                Err(e) => {
                    manager.transition(ConnectionState::Connecting);
                    let delay = manager.config.reconnect_delay();
                    warn!("Reconnect attempt failed: {}; retrying in {:?}", e, delay);
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    manager.reconnect.notify(generation);
                }
            }
        }

        signals.close();
        debug!("Reconnect supervisor terminated");
    }

    /// Shut everything down and join every background task
    ///
    /// Idempotent; a second call returns immediately.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing client for {}", self.config.endpoint);

        self.transition(ConnectionState::Closed);
        self.shutdown.cancel();
        self.correlator.cancel_all();
        if let Some(conn) = self.current.swap(None) {
            conn.close().await;
        }

        self.workers.close();
        self.workers.wait().await;
        debug!("Client for {} closed, all workers joined", self.config.endpoint);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // background tasks observe the token and exit on their own
        self.shutdown.cancel();
    }
}
