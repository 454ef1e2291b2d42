//! Broker HTTP server: bind, background sweeper, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use super::{create_router, Broker};
use crate::session::{spawn_sweeper, SWEEP_INTERVAL};
use crate::{Error, Result};

/// Run the broker until a shutdown signal arrives.
///
/// # Errors
///
/// [`Error::Config`] for an unparseable bind address, [`Error::Internal`]
/// for bind or serve failures (fatal runtime errors, exit code 2).
pub async fn run(broker: Arc<Broker>) -> Result<()> {
    let addr = parse_bind(&broker.config.server.bind)?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    spawn_sweeper(
        Arc::clone(&broker.sessions),
        SWEEP_INTERVAL,
        shutdown_tx.subscribe(),
    );

    let app = create_router(Arc::clone(&broker));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Cannot bind {addr}: {e}")))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        issuer = %broker.config.broker.issuer,
        idp = %broker.config.idp.issuer_url,
        vault = %broker.config.vault.addr,
        teams = broker.config.teams.teams.len(),
        "Vault auth broker listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    info!("Broker shutdown complete");
    Ok(())
}

/// Accept `host:port` or the `:port` shorthand binding all interfaces.
fn parse_bind(bind: &str) -> Result<SocketAddr> {
    let full = if bind.starts_with(':') {
        format!("0.0.0.0{bind}")
    } else {
        bind.to_string()
    };
    full.parse()
        .map_err(|e| Error::Config(format!("Invalid bind address {bind}: {e}")))
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_shorthand_expands_to_all_interfaces() {
        let addr = parse_bind(":8081").unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:8081");
    }

    #[test]
    fn bind_full_form_parses() {
        let addr = parse_bind("127.0.0.1:9000").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn bind_garbage_is_a_config_error() {
        assert!(matches!(
            parse_bind("not-an-address").unwrap_err(),
            Error::Config(_)
        ));
    }
}
