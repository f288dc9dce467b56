//! Negotiate IdP - Kerberos login with fallback authentication
//!
//! Serves the login endpoints of the identity provider.

use clap::{Parser, ValueEnum};
use negotiate_idp::metrics::server::MetricsServer;
use negotiate_idp::negotiate::engine::Acceptor;
use negotiate_idp::{AppState, Config, NegotiateServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Negotiate IdP - SPNEGO/Kerberos login with fallback sources
#[derive(Parser, Debug)]
#[command(name = "negotiate-idp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

#[cfg(feature = "gssapi")]
fn acceptor(config: &Config) -> Arc<dyn Acceptor> {
    match config.keytab() {
        Some(keytab) => Arc::new(negotiate_idp::negotiate::gssapi::GssapiAcceptor::new(keytab)),
        None => Arc::new(negotiate_idp::negotiate::engine::UnavailableAcceptor),
    }
}

#[cfg(not(feature = "gssapi"))]
fn acceptor(_config: &Config) -> Arc<dyn Acceptor> {
    tracing::warn!("Built without the gssapi feature; every login goes to the fallback source");
    Arc::new(negotiate_idp::negotiate::engine::UnavailableAcceptor)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(args.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match args.log_format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    info!("Starting Negotiate IdP v{}", negotiate_idp::VERSION);

    // Load configuration
    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    // Built before the runtime starts any worker thread
    let acceptor = acceptor(&config);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(config, acceptor))
}

async fn serve(config: Config, acceptor: Arc<dyn Acceptor>) -> anyhow::Result<()> {
    let mut metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::new(&config.metrics);
        let addr = server.start().await?;
        info!("Metrics server listening on {}", addr);
        Some(server)
    } else {
        None
    };

    let app = AppState::from_config(config, acceptor)?;
    let server = NegotiateServer::new(app).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down server"),
    }

    if let Some(ref mut metrics_server) = metrics_server {
        metrics_server.shutdown().await;
    }

    Ok(())
}
