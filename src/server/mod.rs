//! HTTP server module
//!
//! Serves the login, retry, fallback, opt-out and logout endpoints on top of
//! `hyper`. Each connection is handled in its own tokio task.

pub mod handlers;
pub mod views;

use crate::auth::static_source::StaticSource;
use crate::auth::{MemoryStateStore, SourceRegistry, StateStore};
use crate::config::{Config, ConfigError, SourceConfig};
use crate::negotiate::engine::Acceptor;
use crate::negotiate::NegotiateSource;
use crate::session::{MemorySessionStore, SessionStore};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything a request handler needs, shared by all connections.
pub struct AppState {
    pub config: Config,
    pub registry: SourceRegistry,
    pub sessions: Arc<dyn SessionStore>,
    pub states: Arc<dyn StateStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: SourceRegistry,
        sessions: Arc<dyn SessionStore>,
        states: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            registry,
            sessions,
            states,
        }
    }

    /// Build every configured source and in-memory stores.
    pub fn from_config(config: Config, acceptor: Arc<dyn Acceptor>) -> Result<Self, ConfigError> {
        let mut registry = SourceRegistry::new();

        for (id, source) in &config.sources {
            match source {
                SourceConfig::Negotiate(negotiate) => {
                    let source = NegotiateSource::new(
                        id.as_str(),
                        negotiate,
                        config.server.cert_dir.as_deref(),
                        Arc::clone(&acceptor),
                    )?;
                    registry.register(Arc::new(source));
                }
                SourceConfig::Static(directory) => {
                    registry.register(Arc::new(StaticSource::new(id.as_str(), directory)));
                }
            }
            info!(source = %id, "Registered authentication source");
        }

        let states = MemoryStateStore::new(Duration::from_secs(config.server.state_ttl_seconds));

        Ok(Self::new(
            config,
            registry,
            Arc::new(MemorySessionStore::new()),
            Arc::new(states),
        ))
    }

    /// Drop expired states and session entries.
    pub fn purge_expired(&self) {
        self.states.purge_expired();
        self.sessions.purge_expired();
    }
}

/// Background purge of the in-memory stores, aborted when dropped.
struct PurgeTask(JoinHandle<()>);

impl PurgeTask {
    fn spawn(app: Arc<AppState>, period: Duration) -> Self {
        Self(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip the immediate tick

            loop {
                interval.tick().await;
                app.purge_expired();
                debug!("Purged expired authentication states and session entries");
            }
        }))
    }
}

impl Drop for PurgeTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// HTTP server for the identity provider
pub struct NegotiateServer {
    app: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl NegotiateServer {
    /// Bind to the configured address.
    ///
    /// If port 0 is specified, the OS will assign an available port.
    pub async fn new(app: AppState) -> Result<Self, ServerError> {
        let addr: SocketAddr = app
            .config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        // Get actual bound address (important for port 0)
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            app: Arc::new(app),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the task is dropped.
    ///
    /// Connection errors are logged but don't stop the server. Expired
    /// states and session entries are purged in the background meanwhile.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Starting server on {}", self.local_addr);

        let period = Duration::from_secs(self.app.config.server.purge_interval_seconds);
        let _purge = PurgeTask::spawn(Arc::clone(&self.app), period);

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let app = Arc::clone(&self.app);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let app = Arc::clone(&app);
                    async move {
                        let response = handlers::handle_request(req, &app, Some(peer_addr)).await;
                        Ok::<_, Infallible>(response)
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}
