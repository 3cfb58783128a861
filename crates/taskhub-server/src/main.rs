//! # taskhub
//!
//! Notification server binary: loads settings, opens the store, wires the
//! notification components and serves HTTP/WebSocket until a shutdown signal.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use taskhub_core::logging::init_subscriber;
use taskhub_notify::ShutdownCoordinator;
use taskhub_server::metrics::install_recorder;
use taskhub_server::{Services, TaskhubServer};
use taskhub_settings::{TaskhubSettings, load_settings, load_settings_from_path, resolve_db_path};
use taskhub_store::{ConnectionConfig, SqliteStore, new_file};
use tracing::{info, warn};

/// Real-time notification server.
#[derive(Parser, Debug)]
#[command(name = "taskhub", about = "Real-time notification server")]
struct Cli {
    /// Settings file (default `~/.taskhub/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Flags win over the settings file and environment.
    fn apply(&self, settings: &mut TaskhubSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }

    fn db_path(&self, settings: &TaskhubSettings) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| resolve_db_path(&settings.database.path))
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                let _ = sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;
    cli.apply(&mut settings);
    init_subscriber(&settings.logging.level, settings.logging.json);

    let db_path = cli.db_path(&settings);
    ensure_parent_dir(&db_path)?;
    let pool = new_file(
        &db_path,
        &ConnectionConfig {
            pool_size: settings.database.pool_size,
            ..ConnectionConfig::default()
        },
    )
    .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    let store = SqliteStore::open(pool).context("Failed to migrate database")?;
    info!(path = %db_path.display(), "database ready");

    let prometheus = install_recorder().context("Failed to install metrics recorder")?;

    let coordinator = ShutdownCoordinator::with_grace(settings.server.shutdown_timeout());
    let services =
        Services::build(settings.clone(), store).context("Failed to build notification services")?;
    services
        .start(&coordinator.token())
        .context("Failed to start due scheduler")?;

    let server = TaskhubServer::new(
        settings.server.clone(),
        services.hub().clone(),
        Some(prometheus),
    );
    let handle = server
        .listen(coordinator.token())
        .await
        .context("Failed to bind server")?;
    info!(addr = %handle.local_addr(), "taskhub ready");

    shutdown_signal().await;
    info!("Shutting down...");

    // Cancelling the token stops the listener and the scheduler loop.
    let drain = tokio::spawn(async move {
        if let Err(e) = handle.stopped().await {
            warn!(error = %e, "http server stopped with an error");
        }
        services.shutdown().await;
    });
    let _ = coordinator.stop(vec![drain]).await;

    info!("Shutdown complete");
    Ok(())
}
