//! Client configuration
//!
//! [`ClientConfig`] can be built programmatically or loaded from a TOML,
//! YAML or JSON file. Environment variables prefixed with `MIDCLT_`
//! override file settings, e.g. `MIDCLT_API_KEY` or `MIDCLT_RECONNECT_DELAY_MS`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "MIDCLT";

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] config::ConfigError),

    /// Endpoint is not a ws:// or wss:// URL
    #[error("Invalid endpoint '{0}': expected a ws:// or wss:// URL")]
    InvalidEndpoint(String),

    /// Username given without password, or the reverse
    #[error("Incomplete credentials: {0}")]
    IncompleteCredentials(&'static str),
}

/// Connection configuration for the client
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `wss://nas.local/websocket`
    pub endpoint: String,

    /// Username for password login
    pub username: Option<String>,

    /// Password for password login
    pub password: Option<String>,

    /// API key; takes precedence over username/password
    pub api_key: Option<String>,

    /// Log every raw frame at debug level under `midclt::frames`
    pub trace_frames: bool,

    /// Dial + handshake timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Login call timeout in milliseconds
    pub auth_timeout_ms: u64,

    /// Fixed delay between failed reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,

    /// Deadline applied to calls whose context has none (`None` or 0 disables)
    pub call_timeout_ms: Option<u64>,

    /// WebSocket ping interval in milliseconds (`None` disables keep-alive)
    pub keepalive_interval_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1/websocket".to_string(),
            username: None,
            password: None,
            api_key: None,
            trace_frames: false,
            connect_timeout_ms: 10_000,     // 10 seconds
            auth_timeout_ms: 60_000,        // 1 minute
            reconnect_delay_ms: 1_000,      // 1 second
            call_timeout_ms: Some(60_000),  // 1 minute
            keepalive_interval_ms: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("trace_frames", &self.trace_frames)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("auth_timeout_ms", &self.auth_timeout_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("call_timeout_ms", &self.call_timeout_ms)
            .field("keepalive_interval_ms", &self.keepalive_interval_ms)
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration for `endpoint` with default values
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The format is picked from the file extension. Environment variables
    /// with the `MIDCLT_` prefix override file settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist
    /// - The file format is unsupported
    /// - The file contains invalid configuration
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(path.as_ref(), None)
    }

    /// Load configuration from a file, taking overrides from `env` instead
    /// of the process environment
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
        env: config::Map<String, String>,
    ) -> Result<Self, ConfigError> {
        Self::load(path.as_ref(), Some(env))
    }

    /// Load configuration from `MIDCLT_` environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(environment(None))
            .build()?;
        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn load(path: &Path, env: Option<config::Map<String, String>>) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(environment(env))
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Check the endpoint and credential fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.endpoint)
            .map_err(|_| ConfigError::InvalidEndpoint(self.endpoint.clone()))?;
        if !matches!(url.scheme(), "ws" | "wss") || url.host_str().is_none() {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }

        if self.api_key.is_none() {
            match (&self.username, &self.password) {
                (Some(_), None) => {
                    return Err(ConfigError::IncompleteCredentials("username without password"));
                }
                (None, Some(_)) => {
                    return Err(ConfigError::IncompleteCredentials("password without username"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolve the configured login method; an API key wins over a password
    pub fn credentials(&self) -> Credentials {
        if let Some(key) = &self.api_key {
            return Credentials::ApiKey(key.clone());
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Credentials::UserPassword {
                username: username.clone(),
                password: password.clone(),
            },
            _ => Credentials::None,
        }
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set username and password
    pub fn with_user_password(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Enable raw frame tracing
    pub fn with_trace_frames(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    /// Set the dial + handshake timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the login timeout
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the fixed reconnect backoff
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the default call deadline (`None` waits without bound)
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Set the WebSocket keep-alive interval
    pub fn with_keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval_ms = interval.map(|i| i.as_millis() as u64);
        self
    }

    /// Dial + handshake timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Login timeout
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Fixed reconnect backoff
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Default call deadline
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Keep-alive interval
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

fn environment(source: Option<config::Map<String, String>>) -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .source(source)
}

/// How the client logs in after the handshake
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Unauthenticated mode; no login call is made
    None,
    /// `auth.login_with_api_key [key]`
    ApiKey(String),
    /// `auth.login [username, password]`
    UserPassword {
        /// Account name
        username: String,
        /// Account password
        password: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credentials::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_api_key_wins() {
        let config = ClientConfig::new("ws://nas/websocket")
            .with_user_password("root", "secret")
            .with_api_key("1-abc");
        assert_eq!(config.credentials(), Credentials::ApiKey("1-abc".into()));
    }

    #[test]
    fn test_no_credentials_is_unauthenticated() {
        let config = ClientConfig::new("ws://nas/websocket");
        assert_eq!(config.credentials(), Credentials::None);
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(ClientConfig::new("wss://nas.local/websocket").validate().is_ok());
        assert!(matches!(
            ClientConfig::new("http://nas.local/websocket").validate(),
            Err(ConfigError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            ClientConfig::new("not a url").validate(),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_validate_incomplete_credentials() {
        let mut config = ClientConfig::new("ws://nas/websocket");
        config.username = Some("root".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompleteCredentials(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ClientConfig::new("ws://nas/websocket")
            .with_user_password("root", "hunter2")
            .with_api_key("1-topsecret");
        let rendered = format!("{:?} {:?}", config, config.credentials());
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("root"));
    }

    #[test]
    fn test_zero_call_timeout_disables() {
        let mut config = ClientConfig::default();
        assert_eq!(config.call_timeout(), Some(Duration::from_secs(60)));
        config.call_timeout_ms = Some(0);
        assert_eq!(config.call_timeout(), None);
        config = config.with_call_timeout(None);
        assert_eq!(config.call_timeout(), None);
    }

    #[test]
    fn test_from_file_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "endpoint = \"wss://nas.local/websocket\"\nusername = \"root\"\npassword = \"pw\"\nreconnect_delay_ms = 250"
        )
        .unwrap();

        let mut env = config::Map::new();
        env.insert("MIDCLT_API_KEY".to_string(), "9-key".to_string());
        env.insert("MIDCLT_TRACE_FRAMES".to_string(), "true".to_string());

        let config = ClientConfig::from_file_with_env(file.path(), env).unwrap();
        assert_eq!(config.endpoint, "wss://nas.local/websocket");
        assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
        assert!(config.trace_frames);
        assert_eq!(config.credentials(), Credentials::ApiKey("9-key".into()));
        // untouched fields keep their defaults
        assert_eq!(config.auth_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_file_missing_and_unsupported() {
        assert!(matches!(
            ClientConfig::from_file("/nonexistent/midclt.toml"),
            Err(ConfigError::FileNotFound(_))
        ));

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            ClientConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat)
        ));
    }
}
