//! Request/response correlation table
//!
//! Maps each outstanding correlation id to a single-use delivery slot. The
//! read loop delivers replies by id; callers hold a [`PendingCall`] guard
//! that removes their entry when dropped, whether the call completed,
//! timed out, or its future was abandoned.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use midclt_wire::Frame;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{ClientError, Result};

type Slot = oneshot::Sender<Result<Frame>>;

/// Concurrency-safe table of outstanding requests
#[derive(Debug, Default)]
pub struct Correlator {
    pending: DashMap<String, Slot>,
}

impl Correlator {
    /// Create an empty table
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `id`, returning the guard that owns its delivery slot
    ///
    /// # Errors
    ///
    /// Fails if `id` is already outstanding.
    pub fn register(self: &Arc<Self>, id: impl Into<String>) -> Result<PendingCall> {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(ClientError::Transport(format!(
                    "correlation id {} already in flight",
                    id
                )));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(tx);
            }
        }
        trace!("Registered pending call {}", id);
        Ok(PendingCall {
            id,
            rx: Some(rx),
            correlator: Arc::clone(self),
        })
    }

    /// Hand `frame` to the caller waiting on `id`
    ///
    /// Returns false for a stray or late frame with no matching entry.
    pub fn deliver(&self, id: &str, frame: Frame) -> bool {
        match self.pending.remove(id) {
            Some((_, slot)) => {
                if slot.send(Ok(frame)).is_err() {
                    // caller stopped waiting between lookup and send
                    debug!("Caller for {} went away before delivery", id);
                }
                true
            }
            None => {
                debug!("Dropping frame for unknown or expired id {}", id);
                false
            }
        }
    }

    /// Remove `id` without delivering
    pub fn remove(&self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Fail every outstanding entry with [`ClientError::Closed`] and clear the table
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.send(Err(ClientError::Closed));
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!("Cancelled {} pending calls", cancelled);
        }
        cancelled
    }

    /// Number of outstanding entries
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True when `id` is outstanding
    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

/// An outstanding registration; dropping it removes the table entry
#[derive(Debug)]
pub struct PendingCall {
    id: String,
    rx: Option<oneshot::Receiver<Result<Frame>>>,
    correlator: Arc<Correlator>,
}

impl PendingCall {
    /// Correlation id of this call
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the delivery (or the shutdown cancellation) of this call
    ///
    /// Cancel safe: dropping the future keeps the guard usable.
    pub async fn recv(&mut self) -> Result<Frame> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(ClientError::Closed);
        };
        let outcome = match rx.await {
            Ok(outcome) => outcome,
            // slot dropped without a send: the table was torn down
            Err(_) => Err(ClientError::Closed),
        };
        self.rx = None;
        outcome
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.correlator.remove(&self.id) {
            trace!("Abandoned pending call {}", self.id);
        }
    }
}
