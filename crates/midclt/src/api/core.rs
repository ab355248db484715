use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::client::Client;
use crate::context::CallContext;
use crate::error::Result;

/// Server-side job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Queued
    Waiting,
    /// Executing
    Running,
    /// Finished with a result
    Success,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Aborted,
    /// Any state this client does not know
    #[serde(other)]
    Unknown,
}

impl JobState {
    /// True once the job can no longer change state
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Success | JobState::Failed | JobState::Aborted)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Waiting => "WAITING",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failed => "FAILED",
            JobState::Aborted => "ABORTED",
            JobState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// One entry of `core.get_jobs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job id
    pub id: i64,
    /// Method that started the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Current state
    pub state: JobState,
    /// Progress report as sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
    /// Final result once `SUCCESS`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure text once `FAILED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `core.*` methods
#[derive(Debug, Clone, Copy)]
pub struct CoreApi<'a> {
    client: &'a Client,
}

impl<'a> CoreApi<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// `core.ping`
    pub async fn ping(&self, ctx: &CallContext) -> Result<String> {
        self.client.call(ctx, "core.ping", Vec::new()).await
    }

    /// `core.get_jobs` with a query filter list
    pub async fn get_jobs(&self, ctx: &CallContext, filters: Value) -> Result<Vec<Job>> {
        self.client.call(ctx, "core.get_jobs", vec![filters]).await
    }

    /// The job with `id`, if the server knows it
    pub async fn get_job(&self, ctx: &CallContext, id: i64) -> Result<Option<Job>> {
        let jobs = self.get_jobs(ctx, json!([["id", "=", id]])).await?;
        Ok(jobs.into_iter().find(|job| job.id == id))
    }
}
