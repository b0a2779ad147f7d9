use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::net::TcpListener;

use rpc_gateway::config::{load_config, ConfigWatcher};
use rpc_gateway::gateway::GatewayBuilder;
use rpc_gateway::lifecycle::{signals, Shutdown};
use rpc_gateway::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "rpc-gateway", version, about = "Schema-driven HTTP to gRPC gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Do not reload services when the config file changes.
    #[arg(long)]
    no_watch: bool,

    /// Load the config and every configured service, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?cli.config, "rpc-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let config_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let gateway = GatewayBuilder::from_config(&config)
        .config_dir(config_dir)
        .build();

    let report = gateway.reconcile(&config.services);
    tracing::info!(
        registered = report.registered,
        failed = report.failed,
        "Configured services loaded"
    );
    if cli.check {
        if report.failed > 0 {
            return Err(format!("{} service(s) failed to load", report.failed).into());
        }
        println!("{}: ok, {} service(s)", cli.config.display(), report.registered);
        return Ok(());
    }

    let (watcher, updates) = ConfigWatcher::new(&cli.config);
    // Dropping the handle stops the watch.
    let _watch = if cli.no_watch {
        None
    } else {
        match watcher.run() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                None
            }
        }
    };

    let http_listener = TcpListener::bind(&config.listener.http_address).await?;
    let grpc_listener = TcpListener::bind(&config.listener.grpc_address).await?;

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            signals::wait_for_signal().await;
            tracing::info!("Shutdown requested, draining connections");
            shutdown.trigger();
        });
    }

    std::sync::Arc::new(gateway)
        .run(http_listener, grpc_listener, updates, shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
