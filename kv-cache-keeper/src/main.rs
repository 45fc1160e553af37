//! KV Cache Keeper - Main entry point
//!
//! Snapshots llama.cpp slot KV caches on a schedule and restores them.

use anyhow::{Context as _, Result};
use clap::Parser;
use kv_cache_keeper::{
    client::LlamaClient,
    config::Config,
    control::{Console, Runner},
    coordinator::SnapshotCoordinator,
    daemon::ShutdownCoordinator,
    utils,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Inference server URL (overrides config and LLAMA_URL)
    #[arg(long)]
    server_url: Option<String>,

    /// Snapshot directory; must be the server's slot save path
    #[arg(long, value_name = "DIR")]
    storage_dir: Option<PathBuf>,

    /// Session name; skips the interactive picker
    #[arg(short, long)]
    session: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration: file, then environment, then flags
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };
    config.apply_env()?;
    if let Some(url) = args.server_url {
        config.server.url = url;
    }
    if let Some(dir) = args.storage_dir {
        config.storage.dir = dir;
    }
    if let Some(session) = args.session {
        config.session.name = Some(session);
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    config.validate()?;

    std::fs::create_dir_all(&config.storage.dir)
        .with_context(|| format!("creating {}", config.storage.dir.display()))?;

    // Initialize logging
    let log_file = config.log.to_file.then(|| config.log_file_path());
    utils::logger::init(&config.log.level, log_file.as_deref())?;

    tracing::info!("Starting kv-cache-keeper v{}", env!("CARGO_PKG_VERSION"));

    let shutdown_coordinator = ShutdownCoordinator::new();
    let _signals = shutdown_coordinator.listen();

    let client = LlamaClient::new(&config.server)?;
    let coordinator = SnapshotCoordinator::new(client, &config);
    let console = Console::spawn_stdin();

    let mut runner = Runner::new(config, coordinator, console, shutdown_coordinator.handle());
    if let Err(e) = runner.run().await {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    Ok(())
}
