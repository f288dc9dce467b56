//! Negotiate IdP Library
//!
//! Password-less SPNEGO/Kerberos login for an identity provider, with a
//! fallback authentication source for clients that cannot negotiate.
//!
//! # Features
//!
//! - **Kerberos Negotiate**: `Authorization: Negotiate` tickets checked against a keytab
//! - **Channel Binding**: optional `tls-server-end-point` binding to configured certificates
//! - **Multi-Realm**: principals routed to per-realm directories
//! - **Fallback**: any other source takes over when negotiation is not possible
//! - **Opt-Out**: per SP, per session and per browser
//!
//! # Example
//!
//! ```no_run
//! use negotiate_idp::config::Config;
//! use negotiate_idp::negotiate::engine::UnavailableAcceptor;
//! use negotiate_idp::server::{AppState, NegotiateServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let app = AppState::from_config(config, Arc::new(UnavailableAcceptor))?;
//!     let server = NegotiateServer::new(app).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod metrics;
pub mod negotiate;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use server::{AppState, NegotiateServer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
