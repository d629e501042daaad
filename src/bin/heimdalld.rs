//! heimdalld: the Heimdall daemon.
//!
//! Serves the caching gateway and the authorization webhook over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use heimdall::HeimdallError;
use heimdall::router;
use heimdall::server::config::{Config, Secrets};

/// Heimdall daemon: GraphQL caching and authorization gateway.
#[derive(Parser)]
#[command(name = "heimdalld")]
#[command(version = heimdall::PKG_VERSION)]
#[command(about = "Heimdall GraphQL gateway daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "HEIMDALL_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    let gateway = Arc::new(config.build_gateway(&secrets)?);

    // Parse address
    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .map_err(|e| HeimdallError::Configuration(format!("Invalid address: {e}")))?;

    info!(
        version = heimdall::PKG_VERSION,
        %addr,
        backend = %gateway.backend().endpoint(),
        mode = ?config.auth.mode,
        "heimdalld starting"
    );

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router(Arc::clone(&gateway)).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!(pending = gateway.writes().pending(), "draining cache writes");
    gateway.drain_writes().await;
    info!("heimdalld stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
