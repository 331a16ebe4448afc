use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use checkpoint_mcp_agent::config::ConfigLoader;
use checkpoint_mcp_agent::context::AppContext;
use checkpoint_mcp_agent::dispatch::Dispatcher;
use checkpoint_mcp_agent::server::{find_available_port, ServerManager};
use checkpoint_mcp_agent::transport::stdio::run_stdio_transport;
use checkpoint_mcp_agent::transport::TransportKind;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "A loopback MCP checkpoint server for pausing coding agents until a human confirms.",
    long_about = "Exposes confirmation, prompt-optimization and input-fill tools over JSON-RPC, \
                  reachable via newline-delimited stdio or loopback HTTP with SSE fan-out. \
                  Designed to be embedded next to an editor integration that presents the \
                  confirmation dialog."
)]
struct Args {
    /// Start the HTTP transport. If not set, the configured transport is used.
    #[arg(short, long)]
    server: bool,

    /// Force the stdio transport regardless of configuration.
    #[arg(long, conflicts_with = "server")]
    stdio: bool,

    /// Override the HTTP port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Explicit configuration file path.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config = loader.into_config();

    // Diagnostics go to stderr only; stdout is reserved for protocol frames.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.directive())),
        )
        .with_writer(std::io::stderr)
        .init();

    let ctx = AppContext::new(config.tools.rotate_names, config.session.timeout());
    let manager = Arc::new(
        ServerManager::new(ctx.clone(), config.server.transport, config.server.port)
            .with_settle_delay(config.server.settle_delay())
            .with_process_stdio(),
    );

    let transport = if args.stdio {
        TransportKind::Stdio
    } else if args.server {
        TransportKind::Http
    } else {
        config.server.transport
    };
    let port = args.port.unwrap_or(config.server.port);

    match transport {
        TransportKind::Stdio => {
            info!("starting stdio transport");
            run_stdio_until_shutdown(Dispatcher::new(ctx.clone())).await?;
        }
        TransportKind::Http => {
            manager.start(port).await?;
            shutdown_signal().await;
        }
        TransportKind::Auto => {
            let candidates: Vec<u16> = (0..10u16).filter_map(|i| port.checked_add(i)).collect();
            match find_available_port(&candidates).await {
                Some(open) => {
                    manager.start(open).await?;
                    shutdown_signal().await;
                }
                None => {
                    info!("no available port among candidates; falling back to stdio");
                    run_stdio_until_shutdown(Dispatcher::new(ctx.clone())).await?;
                }
            }
        }
    }

    // Never leave a caller's wait hanging across shutdown.
    ctx.sessions.dispose_all();
    manager.shutdown().await;
    Ok(())
}

async fn run_stdio_until_shutdown(dispatcher: Dispatcher) -> std::io::Result<()> {
    tokio::select! {
        result = run_stdio_transport(dispatcher) => result,
        _ = shutdown_signal() => Ok(()),
    }
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}
