//! Login on a freshly negotiated connection

use std::time::Duration;

use midclt_wire::Value;
use tracing::{debug, info};

use crate::caller::Caller;
use crate::config::Credentials;
use crate::connection::Connection;
use crate::context::CallContext;
use crate::error::{ClientError, Result};

/// Login by API key
pub const LOGIN_WITH_API_KEY: &str = "auth.login_with_api_key";
/// Login by username and password
pub const LOGIN: &str = "auth.login";

/// Authenticate `conn` with `credentials`, bounded by `timeout`
///
/// The login result must be the boolean `true`. Without credentials this is
/// a no-op.
pub(crate) async fn authenticate(
    caller: &Caller,
    conn: &Connection,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<()> {
    let (method, params) = match credentials {
        Credentials::None => {
            debug!("No credentials configured, skipping login");
            return Ok(());
        }
        Credentials::ApiKey(key) => (LOGIN_WITH_API_KEY, vec![Value::String(key.clone())]),
        Credentials::UserPassword { username, password } => (
            LOGIN,
            vec![
                Value::String(username.clone()),
                Value::String(password.clone()),
            ],
        ),
    };

    let ctx = CallContext::with_timeout(timeout);
    let result = caller
        .call_on(conn, &ctx, method, params)
        .await
        .map_err(|e| ClientError::Auth(format!("{} failed: {}", method, e)))?;

    match result {
        Value::Bool(true) => {
            info!("Authenticated connection {} via {}", conn.generation(), method);
            Ok(())
        }
        Value::Bool(false) => Err(ClientError::Auth(format!(
            "{} rejected the credentials",
            method
        ))),
        other => Err(ClientError::Auth(format!(
            "{} returned {} instead of a boolean",
            method, other
        ))),
    }
}
