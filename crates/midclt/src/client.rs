//! Client handle

use std::sync::Arc;

use midclt_wire::Value;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{CoreApi, SystemApi};
use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::error::{ClientError, Result};
use crate::job::JobWaiter;
use crate::manager::ConnectionManager;
use crate::state::ConnectionState;

/// Handle to a persistent, self-healing RPC connection
///
/// Cheap to clone; all clones share one connection. The connection is torn
/// down by [`Client::close`] or once the last clone is dropped.
///
/// # Examples
///
/// ```no_run
/// use midclt::{CallContext, Client, ClientConfig};
///
/// # async fn example() -> midclt::Result<()> {
/// let config = ClientConfig::new("ws://127.0.0.1:6000/websocket").with_api_key("1-abc");
/// let client = Client::connect(config).await?;
///
/// let info = client.system().info(&CallContext::new()).await?;
/// println!("running {}", info.version);
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    manager: Arc<ConnectionManager>,
}

impl Client {
    /// Connect, negotiate a session and log in
    ///
    /// # Errors
    ///
    /// Invalid configuration, dial failure, a handshake failure or rejected
    /// credentials. Nothing keeps running after an error.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let manager = ConnectionManager::start(config).await?;
        Ok(Self { manager })
    }

    /// Call `method` and decode its result into `T`
    pub async fn call<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T> {
        let value = self.call_value(ctx, method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Decode(format!("result of {}: {}", method, e)))
    }

    /// Call `method` and return its raw result
    ///
    /// Without a deadline on `ctx`, the configured call timeout applies.
    pub async fn call_value(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value> {
        let ctx = ctx.or_timeout(self.manager.config().call_timeout());
        let conn = self.manager.ready_connection(&ctx).await?;
        self.manager.caller().call_on(&conn, &ctx, method, params).await
    }

    /// Start a job with `method`, wait for it through `waiter` and decode
    /// its final payload into `T`
    pub async fn call_job<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Vec<Value>,
        waiter: &dyn JobWaiter,
    ) -> Result<T> {
        let job_id: i64 = self.call(ctx, method, params).await?;
        debug!("{} started job {}", method, job_id);

        let payload = waiter.wait(ctx, job_id).await?;
        serde_json::from_value(payload)
            .map_err(|e| ClientError::Decode(format!("result of job {}: {}", job_id, e)))
    }

    /// Wait until the client is ready to accept calls
    pub async fn wait_ready(&self, ctx: &CallContext) -> Result<()> {
        self.manager.ready_connection(ctx).await.map(|_| ())
    }

    /// Shut down and join every background task
    ///
    /// Pending calls fail with [`ClientError::Closed`]. Idempotent.
    pub async fn close(&self) {
        self.manager.close().await;
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// True once [`Client::close`] was called
    pub fn is_closed(&self) -> bool {
        self.manager.is_closed()
    }

    /// Session token of the current connection
    pub fn session(&self) -> Option<String> {
        self.manager
            .current()
            .map(|conn| conn.session().as_str().to_string())
    }

    /// Generation of the current connection; increases on every reconnect
    pub fn connection_generation(&self) -> Option<u64> {
        self.manager.current().map(|conn| conn.generation())
    }

    /// Calls waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.manager.pending_calls()
    }

    /// Background tasks still running
    pub fn worker_count(&self) -> usize {
        self.manager.worker_count()
    }

    /// `system.*` methods
    pub fn system(&self) -> SystemApi<'_> {
        SystemApi::new(self)
    }

    /// `core.*` methods
    pub fn core(&self) -> CoreApi<'_> {
        CoreApi::new(self)
    }
}
