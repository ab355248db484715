use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::Client;
use crate::context::CallContext;
use crate::error::Result;

/// Subset of `system.info`; unknown fields land in `extra`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Software version string
    pub version: String,
    /// Host name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Seconds since boot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
    /// Remaining fields as sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `system.*` methods
#[derive(Debug, Clone, Copy)]
pub struct SystemApi<'a> {
    client: &'a Client,
}

impl<'a> SystemApi<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// `system.info`
    pub async fn info(&self, ctx: &CallContext) -> Result<SystemInfo> {
        self.client.call(ctx, "system.info", Vec::new()).await
    }

    /// `system.version`
    pub async fn version(&self, ctx: &CallContext) -> Result<String> {
        self.client.call(ctx, "system.version", Vec::new()).await
    }
}
