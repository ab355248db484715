//! Coalescing reconnect signal
//!
//! A one-slot channel carrying the generation of the connection that was
//! found dead. Any number of concurrent notifications collapse into at most
//! one pending reconnect; producers never block.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Producer half, held by read loops and the supervisor
#[derive(Debug, Clone)]
pub(crate) struct ReconnectSignal {
    tx: mpsc::Sender<u64>,
}

/// Consumer half, owned by the supervisor
pub(crate) type ReconnectSignals = mpsc::Receiver<u64>;

impl ReconnectSignal {
    pub(crate) fn channel() -> (Self, ReconnectSignals) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Arm a reconnect for `generation`
    ///
    /// Returns false if a reconnect is already pending or the supervisor is
    /// gone.
    pub(crate) fn notify(&self, generation: u64) -> bool {
        match self.tx.try_send(generation) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Reconnect already pending, coalescing signal for {}", generation);
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!("Reconnect supervisor gone, ignoring signal for {}", generation);
                false
            }
        }
    }
}
