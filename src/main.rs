use anyhow::{Context as _, Result};
use clap::Parser;
use std::sync::Arc;
use taskd::{config::DaemonConfig, store::TaskStore, AppContext};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "taskd",
    about = "taskd — lightweight task-tracking daemon",
    version
)]
struct Args {
    /// REST API server port
    #[arg(long, env = "TASKD_PORT")]
    port: Option<u16>,

    /// Data directory for the task snapshot and config.toml
    #[arg(long, env = "TASKD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKD_LOG")]
    log: Option<String>,

    /// Bind address for the REST server (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "TASKD_BIND")]
    bind_address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Arc::new(DaemonConfig::new(
        args.port,
        args.data_dir,
        args.log,
        args.bind_address,
    ));

    setup_logging(&config.log);

    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        "starting taskd v{}",
        env!("CARGO_PKG_VERSION")
    );

    // A corrupt snapshot fails startup on purpose: starting empty would
    // overwrite the damaged file on the first mutation.
    let tasks_file = config.tasks_file();
    let store = Arc::new(
        TaskStore::open(&tasks_file)
            .await
            .with_context(|| format!("opening task store at {}", tasks_file.display()))?,
    );

    let ctx = Arc::new(AppContext {
        config: config.clone(),
        store: store.clone(),
        started_at: std::time::Instant::now(),
    });

    let server = tokio::spawn(taskd::rest::start_rest_server(ctx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received — flushing task store");

    // Final save is best-effort: every mutation already persisted itself, so
    // a failure here costs nothing that was not already on disk.
    if let Err(e) = store.flush().await {
        warn!(err = %e, "final task store flush failed");
    }

    server.abort();
    Ok(())
}

fn setup_logging(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .init();
}
