//! # tornet-core
//!
//! Client library for routing traffic through a local Tor daemon.
//!
//! It speaks the Tor control protocol to authenticate and manage circuits,
//! opens SOCKS5 tunnels through the proxy port, and wraps both in
//! [`TorNetworkClient`], which tracks the connection lifecycle and runs a
//! background health monitor.
//!
//! ## Guarantees
//!
//! - Tunnels and HTTP requests only ever go through the SOCKS proxy
//! - With `enforce_tor_only`, hostnames are resolved by Tor, not locally
//! - Credentials never appear in logs or `Debug` output
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            TorNetworkClient             │
//! ├────────────────────┬────────────────────┤
//! │   ControlSession   │  Socks5Connector   │
//! ├────────────────────┤                    │
//! │ protocol │ status  │                    │
//! └────────────────────┴────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use tornet_core::{TorConfig, TorNetworkClient};
//!
//! # async fn run() -> tornet_core::Result<()> {
//! let client = TorNetworkClient::new(TorConfig::from_env()?);
//! if client.connect().await {
//!     let stream = client.create_connection("example.com", 80, None).await?;
//!     drop(stream);
//!     client.disconnect().await;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod error;
pub mod logging;
pub mod tor;

pub use config::TorConfig;
pub use error::{Error, ErrorKind, Result};
pub use tor::{ConnectionState, TorNetworkClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
