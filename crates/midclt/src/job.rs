//! Long-running server jobs
//!
//! A job-starting method returns an integer id; the final payload is then
//! obtained from a [`JobWaiter`]. The client treats the waiter as a black
//! box and propagates its failures unchanged.

use std::time::Duration;

use async_trait::async_trait;
use midclt_wire::Value;
use tracing::{debug, trace};

use crate::api::JobState;
use crate::client::Client;
use crate::context::CallContext;
use crate::error::{ClientError, Result};

/// Observes the completion of a server-side job
#[async_trait]
pub trait JobWaiter: Send + Sync {
    /// Wait for job `job_id` to finish and return its result payload
    async fn wait(&self, ctx: &CallContext, job_id: i64) -> Result<Value>;
}

/// Default poll interval of [`PollingJobWaiter`]
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Waits for a job by polling `core.get_jobs` at a fixed interval
#[derive(Debug, Clone)]
pub struct PollingJobWaiter {
    client: Client,
    interval: Duration,
}

impl PollingJobWaiter {
    /// Poll through `client` every [`DEFAULT_POLL_INTERVAL`]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the poll interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl JobWaiter for PollingJobWaiter {
    async fn wait(&self, ctx: &CallContext, job_id: i64) -> Result<Value> {
        debug!("Waiting for job {} (poll every {:?})", job_id, self.interval);

        loop {
            let job = self
                .client
                .core()
                .get_job(ctx, job_id)
                .await?
                .ok_or_else(|| ClientError::Job {
                    id: job_id,
                    message: "job not found".to_string(),
                })?;

            match job.state {
                JobState::Success => return Ok(job.result.unwrap_or(Value::Null)),
                JobState::Failed | JobState::Aborted => {
                    return Err(ClientError::Job {
                        id: job_id,
                        message: job.error.unwrap_or_else(|| job.state.to_string()),
                    });
                }
                state => trace!("Job {} is {}", job_id, state),
            }

            tokio::select! {
                err = ctx.done() => return Err(err),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
