//! dvlink M17 Gateway Daemon

mod args;

use std::sync::Arc;

use clap::Parser;
use dvlink_gateway::{Gateway, InMemoryRouteTable};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use args::Args;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("dvgatewayd {}", env!("CARGO_PKG_VERSION"));

    let config = args.to_config();
    let routes = Arc::new(InMemoryRouteTable::from_routes(args.routes.iter().copied()));
    if !routes.is_empty() {
        info!(count = routes.len(), "loaded static routes");
    }

    let gateway = match Gateway::bind(config, routes) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = gateway.run(setup_shutdown_signal()).await {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("gateway stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl-C elsewhere)
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
            }
            _ => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
