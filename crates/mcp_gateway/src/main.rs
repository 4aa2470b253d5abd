use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use mcp_manager::Manager;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mcp_gateway::{router, AppState};

/// Supervisor and multiplexing gateway for MCP servers.
#[derive(Debug, Parser)]
#[command(name = "mcp-gateway", version, about)]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1", env = "MCP_GATEWAY_HOST")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000, env = "MCP_GATEWAY_PORT")]
    port: u16,

    /// Path to the server configuration document.
    #[arg(long, default_value = "./mcp_config.json", env = "MCP_GATEWAY_CONFIG")]
    config: PathBuf,

    /// Re-apply the configuration when the file changes on disk.
    #[arg(long)]
    reload: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let (bus, events) = gateway_events::bounded(gateway_events::DEFAULT_CAPACITY);
    let manager = Manager::new(&args.config, bus);

    if let Err(err) = manager.load_config().await {
        warn!(%err, "initial configuration load failed");
    }
    let started = manager.auto_start().await;
    if !started.is_empty() {
        info!(?started, "auto-started servers");
    }

    if args.reload {
        tokio::spawn(watch_config(manager.clone(), args.config.clone()));
    }

    let state = AppState::new(manager.clone(), events);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!(host = %args.host, port = args.port, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down managed servers");
    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Poll the config file's mtime and reload on change.
async fn watch_config(manager: Arc<Manager>, path: PathBuf) {
    let mut last_modified = modified_at(&path).await;
    loop {
        time::sleep(Duration::from_secs(2)).await;
        let modified = modified_at(&path).await;
        if modified != last_modified {
            last_modified = modified;
            info!(path = %path.display(), "configuration changed, reloading");
            if let Err(err) = manager.load_config().await {
                warn!(%err, "reload failed, previous state retained");
            }
        }
    }
}

async fn modified_at(path: &PathBuf) -> Option<std::time::SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|metadata| metadata.modified().ok())
}
