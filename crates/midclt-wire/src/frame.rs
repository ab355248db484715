//! Frame types exchanged with the middleware
//!
//! A [`Frame`] is one field-tagged JSON object on the WebSocket. The same
//! shape covers every disposition: the opening `connect`/`connected`
//! handshake, `method` calls, and their replies (which carry either a
//! `result` or an `error`, never both).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Protocol version offered during the handshake
pub const PROTOCOL_VERSION: &str = "1";

/// The `msg` tag of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Client negotiation request
    Connect,
    /// Server negotiation reply
    Connected,
    /// Method call
    Method,
    /// Method result
    Result,
    /// Negotiation rejected by the server
    Failed,
    /// Protocol-level ping
    Ping,
    /// Protocol-level pong
    Pong,
    /// Any other tag (collection events and the like)
    #[serde(other)]
    Unknown,
}

impl Disposition {
    /// Wire name of this disposition
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Connect => "connect",
            Disposition::Connected => "connected",
            Disposition::Method => "method",
            Disposition::Result => "result",
            Disposition::Failed => "failed",
            Disposition::Ping => "ping",
            Disposition::Pong => "pong",
            Disposition::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error returned by the middleware for a failed call
///
/// Every field is optional; whatever the server sent is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteErrorPayload {
    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Numeric error code (errno style)
    #[serde(default, rename = "error", skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// Symbolic error name, e.g. `EINVAL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errname: Option<String>,

    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Error class, e.g. `VALIDATION`; encoded as `errorType`
    #[serde(
        default,
        rename = "errorType",
        alias = "type",
        alias = "errortype",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_type: Option<String>,

    /// Server-side traceback, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,

    /// Extra error detail (validation errors list), kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl RemoteErrorPayload {
    /// Create a payload carrying only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Set the numeric code
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Set the reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the error class
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

impl fmt::Display for RemoteErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(error_type) = &self.error_type {
            parts.push(format!("[{}]", error_type));
        }
        if let Some(code) = self.code {
            match &self.errname {
                Some(name) => parts.push(format!("{} ({})", name, code)),
                None => parts.push(format!("code {}", code)),
            }
        }
        if let Some(message) = &self.message {
            parts.push(message.clone());
        }
        if let Some(reason) = &self.reason
            && self.message.as_deref() != Some(reason.as_str())
        {
            parts.push(reason.clone());
        }
        if parts.is_empty() {
            f.write_str("unspecified remote error")
        } else {
            f.write_str(&parts.join(": "))
        }
    }
}

/// One protocol message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Correlation token
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_id"
    )]
    pub id: Option<String>,

    /// Disposition tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Disposition>,

    /// Method name (calls only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Positional call parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,

    /// Successful result; `Some(Value::Null)` when the server sent `null`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub result: Option<Value>,

    /// Failure payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteErrorPayload>,

    /// Offered protocol version (handshake request)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Supported protocol versions (handshake request)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support: Option<Vec<String>>,

    /// Session token (handshake reply)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    /// Collection name on event frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    /// Event fields on event frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

impl Frame {
    /// The handshake request: `{msg:"connect", version:"1", support:["1"]}`
    pub fn connect() -> Self {
        Self {
            msg: Some(Disposition::Connect),
            version: Some(PROTOCOL_VERSION.to_string()),
            support: Some(vec![PROTOCOL_VERSION.to_string()]),
            ..Self::default()
        }
    }

    /// The handshake reply a server sends on success
    pub fn connected(session: impl Into<String>) -> Self {
        Self {
            msg: Some(Disposition::Connected),
            session: Some(session.into()),
            ..Self::default()
        }
    }

    /// A method call expecting a reply under `id`
    pub fn method_call(id: impl Into<String>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: Some(id.into()),
            msg: Some(Disposition::Method),
            method: Some(method.into()),
            params: Some(params),
            ..Self::default()
        }
    }

    /// A successful reply to `id`
    pub fn result(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            msg: Some(Disposition::Result),
            result: Some(result),
            ..Self::default()
        }
    }

    /// A failed reply to `id`
    pub fn failure(id: impl Into<String>, error: RemoteErrorPayload) -> Self {
        Self {
            id: Some(id.into()),
            msg: Some(Disposition::Result),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Protocol-level pong answering a ping with the same id
    pub fn pong(id: Option<String>) -> Self {
        Self {
            id,
            msg: Some(Disposition::Pong),
            ..Self::default()
        }
    }

    /// Correlation id, if non-empty
    pub fn correlation_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Non-empty session token, if present
    pub fn session_token(&self) -> Option<&str> {
        self.session.as_deref().filter(|s| !s.is_empty())
    }

    /// True for a handshake reply carrying `connected` and a non-empty session
    pub fn is_connected(&self) -> bool {
        self.msg == Some(Disposition::Connected) && self.session_token().is_some()
    }

    /// True when the frame carries an error payload
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split a reply into its outcome, treating a missing result as `null`
    pub fn into_outcome(self) -> Result<Value, RemoteErrorPayload> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Accept string or integer ids; integers are kept as their decimal text
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(text) => text,
        RawId::Signed(n) => n.to_string(),
        RawId::Unsigned(n) => n.to_string(),
    }))
}

/// A present field deserializes to `Some`, even when its value is `null`
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
