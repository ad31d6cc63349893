//! BFS crawl sink main entry point
//!
//! This is the HTTP server binary for the sink: it loads configuration,
//! builds the coordinator and Axum router, and serves the HTTP surface
//! described in the crate's top-level documentation.

use bfs_crawl_sink::config::load_config_with_hash;
use bfs_crawl_sink::http::router;
use bfs_crawl_sink::Coordinator;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// bfs-sink: local coordination & storage service for a semi-automatic BFS web crawl
#[derive(Parser, Debug)]
#[command(name = "bfs-sink")]
#[command(version = "1.0.0")]
#[command(about = "Local coordination and storage sink for a BFS web crawl", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Override the bind address from the configuration file
    #[arg(long)]
    bind_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!(config_hash = %hash, "configuration loaded successfully");
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(bind_addr) = cli.bind_addr {
        config.server.bind_addr = bind_addr;
    }

    let project_root = config.storage.root.clone();
    let bind_addr = config.server.bind_addr.clone();

    let coordinator = Arc::new(Coordinator::new(config, project_root).with_config_hash(config_hash));
    coordinator.clone().spawn_watchdog();

    let app = router(coordinator);

    tracing::info!(bind_addr = %bind_addr, "binding sink HTTP server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("bfs_crawl_sink=info,warn"),
            1 => EnvFilter::new("bfs_crawl_sink=debug,info"),
            2 => EnvFilter::new("bfs_crawl_sink=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}
