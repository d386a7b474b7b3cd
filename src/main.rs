use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

use trellis_server::config;
use trellis_server::error::Result;
use trellis_server::plugins;
use trellis_server::server;
use trellis_server::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "trellis-server")]
#[command(about = "An extensible, plugin-driven web application server", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (TOML/JSON/YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the server (default)
    Run,
    /// Validate configuration and plugin requirements, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("trellis_server={log_level}").parse().unwrap()),
        )
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match config::load_from_path(path).await {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration from {}: {}", path.display(), e);
                    return Err(e);
                }
            }
        }
        None => {
            info!("Loading configuration from default locations");
            match config::load_from_env_or_file().await {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {}", e);
                    return Err(e);
                }
            }
        }
    };

    let builtin = plugins::builtin_plugins(&config.builtins)?;
    let (state, _shutdown_rx) = match AppState::build(config, builtin) {
        Ok(built) => built,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e);
        }
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Check => {
            info!(
                "Configuration OK: {} plugins registered, {} load handlers in {} namespaces",
                state.registry.len(),
                state.load_pool.handler_count(),
                state.load_pool.namespace_count()
            );
            for (namespace, group) in state.load_pool.debug_info() {
                info!(
                    namespace = %namespace,
                    filter = %group.combined_filter,
                    handlers = group.handlers.len(),
                    "load namespace"
                );
            }
            return Ok(());
        }
        Command::Run => {
            info!("Starting Trellis server");
            info!("{} plugins registered", state.registry.len());
        }
    }

    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::start_server(server_state).await {
            error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;

    info!("Shutting down Trellis server");
    state.shutdown();
    let _ = server_handle.await;

    info!("Shutdown complete");
    Ok(())
}

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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
