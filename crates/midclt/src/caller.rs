//! Single request/response exchange on a connection
//!
//! Allocates a correlation id, registers it, writes the method frame, then
//! waits for the first of: the correlated reply, a transport error
//! published by a read loop, or the caller's context finishing.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use midclt_wire::{Frame, Value};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::connection::Connection;
use crate::context::CallContext;
use crate::correlator::Correlator;
use crate::error::{ClientError, RemoteError, Result};

pub(crate) struct Caller {
    correlator: Arc<Correlator>,
    next_id: AtomicU64,
    errors: Mutex<mpsc::Receiver<ClientError>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("pending", &self.correlator.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Caller {
    pub(crate) fn new(
        correlator: Arc<Correlator>,
        errors: mpsc::Receiver<ClientError>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            correlator,
            next_id: AtomicU64::new(1),
            errors: Mutex::new(errors),
            shutdown,
        }
    }

    /// Next correlation id; unique for the lifetime of the client
    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Perform one call on `conn`
    pub(crate) async fn call_on(
        &self,
        conn: &Connection,
        ctx: &CallContext,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let id = self.next_id();
        let mut pending = self.correlator.register(id.clone())?;
        // registered before the check, so a concurrent close either sees the
        // entry and fails it, or this check sees the close
        if self.shutdown.is_cancelled() {
            return Err(ClientError::Closed);
        }

        trace!(
            "Calling {} as {} on connection {}",
            method,
            id,
            conn.generation()
        );
        let frame = Frame::method_call(id, method, params);
        tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            written = conn.write_frame(&frame) => written?,
        }

        let reply = tokio::select! {
            biased;
            delivered = pending.recv() => delivered?,
            err = self.next_transport_error() => return Err(err),
            err = ctx.done() => return Err(err),
        };

        reply.into_outcome().map_err(|payload| {
            ClientError::Remote(RemoteError {
                method: method.to_string(),
                payload,
            })
        })
    }

    /// Next error published on the shared error channel
    ///
    /// Each published error is observed by exactly one waiting caller.
    async fn next_transport_error(&self) -> ClientError {
        let mut errors = self.errors.lock().await;
        match errors.recv().await {
            Some(err) => err,
            None => std::future::pending().await,
        }
    }
}
