use anyhow::Context;
use clap::Parser;
use ferrumring::config::Config;
use ferrumring::database::{Database, StandaloneDatabase};
use ferrumring::{server, web, ClusterDatabase};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "ferrumring.toml";

/// Redis compatible key/value store with consistent hash clustering
#[derive(Debug, Parser)]
#[command(name = "ferrumring", version, about)]
struct Cli {
    /// Configuration file [default: ferrumring.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.port`
    #[arg(short, long)]
    port: Option<u16>,

    /// Override `server.bind`
    #[arg(short, long)]
    bind: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = load_config(&cli)?;
    info!("FerrumRing starting...");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    let local = StandaloneDatabase::open(config.server.databases, &config.aof)
        .context("failed to initialize the database")?;

    if config.cluster.is_active() {
        let cluster = ClusterDatabase::new(config.cluster.to_cluster_config(), local);
        serve_with(&config, Arc::new(cluster), shutdown).await
    } else {
        info!("Running in standalone mode");
        serve_with(&config, Arc::new(local), shutdown).await
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => Config::load(Path::new(DEFAULT_CONFIG))?,
        None => {
            warn!("{} not found, using default configuration", DEFAULT_CONFIG);
            Config::default()
        }
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Run the RESP server, and the web API when enabled, until shutdown
async fn serve_with<D: Database>(
    config: &Config,
    db: Arc<D>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let web_handle = config.web.enabled.then(|| {
        let addr = config.web.addr.clone();
        let db = Arc::clone(&db);
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = web::run_web(&addr, db, token).await {
                error!("Web server error: {:#}", e);
            }
        })
    });

    let result = server::run(&config.server, db, shutdown.clone()).await;

    // a failed RESP server takes the web API down with it
    shutdown.cancel();
    if let Some(handle) = web_handle {
        let _ = handle.await;
    }
    result
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
