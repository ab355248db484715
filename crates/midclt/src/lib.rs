//! # midclt
//!
//! Persistent-connection RPC client for the middleware WebSocket API.
//!
//! Many concurrent calls are multiplexed over one WebSocket and correlated
//! back to their callers by id. A lost connection is re-established and
//! re-authenticated in the background; callers only notice the extra
//! latency. Long-running server jobs are started with
//! [`Client::call_job`] and observed through a [`JobWaiter`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use midclt::{CallContext, Client, ClientConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> midclt::Result<()> {
//! let config = ClientConfig::from_file("midclt.toml")?;
//! let client = Client::connect(config).await?;
//!
//! let ctx = CallContext::with_timeout(Duration::from_secs(5));
//! let hostname: String = client.call(&ctx, "system.hostname", vec![]).await?;
//! println!("connected to {hostname}");
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! midclt/
//! ├── config.rs      # ClientConfig loading and validation
//! ├── context.rs     # Per-call deadline and cancellation
//! ├── connection.rs  # Dial, handshake and the serialized writer
//! ├── auth.rs        # Login after the handshake
//! ├── correlator.rs  # Pending-call table
//! ├── reader.rs      # Per-connection read loop
//! ├── signal.rs      # Coalescing reconnect signal
//! ├── manager.rs     # State machine, reconnect supervisor, shutdown
//! ├── caller.rs      # One request/response exchange
//! ├── client.rs      # Public handle
//! ├── job.rs         # Job waiting
//! └── api/           # Typed namespace wrappers
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod api;
pub mod auth;
pub mod config;
pub mod connection;
pub mod context;
pub mod correlator;
pub mod error;
pub mod job;
pub mod state;

mod caller;
mod client;
mod manager;
mod reader;
mod signal;

// Re-export main types for convenience
pub use client::Client;
pub use config::{ClientConfig, ConfigError, Credentials};
pub use connection::Session;
pub use context::CallContext;
pub use error::{ClientError, RemoteError, Result};
pub use job::{JobWaiter, PollingJobWaiter};
pub use midclt_wire::{Frame, RemoteErrorPayload, Value};
pub use state::ConnectionState;
pub use tokio_util::sync::CancellationToken;
