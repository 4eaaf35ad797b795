use anyhow::Context;
use clap::Parser;
use p2p_file_server::engine::{FanOutObserver, JsonLinesObserver, TracingObserver};
use p2p_file_server::platform::SystemIpDiscovery;
use p2p_file_server::{EventObserver, FileServer, ServerSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "p2p-file-server", version, about = "Peer-to-peer file server node")]
struct Cli {
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port (overrides the settings file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Folder served to peers and used for downloads
    #[arg(short, long)]
    folder: Option<PathBuf>,

    /// Also write every server event to stdout as a JSON line
    #[arg(long)]
    json_events: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let mut settings =
        ServerSettings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(folder) = cli.folder {
        settings.local_server_folder_path = folder;
    }

    let mut observers: Vec<Arc<dyn EventObserver>> = vec![Arc::new(TracingObserver)];
    if cli.json_events {
        observers.push(Arc::new(JsonLinesObserver::new(std::io::stdout())));
    }
    let discovery = Arc::new(SystemIpDiscovery::new(
        settings.public_ip_lookup_url.clone(),
        settings.connect_timeout(),
    ));

    let server = FileServer::bind_with(settings, discovery, Arc::new(FanOutObserver::new(observers)))
        .await
        .context("Failed to start file server")?;

    let info = server.info();
    tracing::info!(
        "Listening on {} (local {}, public {}, {}), serving {}",
        server.local_addr(),
        info.local_ip,
        info.public_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".into()),
        info.platform,
        info.transfer_folder
    );

    let accept_loop = server.start();

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown requested");
            if let Err(e) = server.shutdown().await {
                tracing::warn!("Shutdown command failed: {}", e);
            }
        }
        _ = server.wait_stopped() => {}
    }

    accept_loop.await.context("Accept loop panicked")??;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
