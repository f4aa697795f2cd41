//! sriovd - SR-IOV network driver daemon.
//!
//! Serves the container engine's remote network driver protocol on a Unix
//! socket and hands out SR-IOV virtual functions or passthrough devices.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sriov_common::SriovPaths;
use sriov_common::paths::DEFAULT_PLUGIN_SOCKET;
use sriov_network::{IpLink, NetworkRegistry, NetworkStore, SysfsDevices};
use tokio::net::UnixListener;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod api;
mod engine;

#[derive(Parser, Debug)]
#[command(name = "sriovd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, env = "SRIOV_DEBUG")]
    debug: bool,

    /// Unix socket the container engine connects to
    #[arg(long, env = "SRIOV_PLUGIN_SOCKET", default_value = DEFAULT_PLUGIN_SOCKET)]
    socket: PathBuf,

    /// Directory holding persisted network records
    #[arg(long, env = "SRIOV_CONFIG_ROOT")]
    config_root: Option<PathBuf>,

    /// Sysfs mount point
    #[arg(long, env = "SRIOV_SYSFS_ROOT")]
    sysfs_root: Option<PathBuf>,

    /// Driver name networks are created with (`docker network create -d`)
    #[arg(long, env = "SRIOV_DRIVER_NAME", default_value = "sriov")]
    driver_name: String,

    /// `ip` binary used for VF settings
    #[arg(long, default_value = "ip")]
    ip_program: String,
}

impl Args {
    fn paths(&self) -> SriovPaths {
        let mut paths = SriovPaths::new();
        if let Some(root) = &self.config_root {
            paths = paths.with_config_root(root);
        }
        if let Some(sysfs) = &self.sysfs_root {
            paths = paths.with_sysfs(sysfs);
        }
        paths
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Bind the plugin socket, replacing a stale one left by a previous run.
fn bind_socket(path: &Path) -> anyhow::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(socket = %path.display(), "Removed stale socket"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("removing {}", path.display()));
        }
    }
    UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let paths = args.paths();
    let devices = SysfsDevices::new(paths.clone()).with_link(IpLink::with_program(&args.ip_program));
    let engine = engine::DockerNetworks::connect(tokio::runtime::Handle::current())
        .context("connecting to the container engine")?;
    let registry = Arc::new(NetworkRegistry::new(
        Arc::new(devices),
        NetworkStore::new(&paths.config_root),
        Arc::new(engine),
        &args.driver_name,
    ));

    // Restore networks eagerly; if the engine is not up yet the first
    // lifecycle call retries.
    let startup = Arc::clone(&registry);
    if let Some(report) = tokio::task::spawn_blocking(move || startup.reconcile()).await? {
        tracing::info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            "Restored networks from engine"
        );
    }

    let listener = bind_socket(&args.socket)?;
    let app = api::server::app(api::server::AppState::new(registry));

    tracing::info!(
        socket = %args.socket.display(),
        driver = %args.driver_name,
        config_root = %paths.config_root.display(),
        sysfs = %paths.sysfs.display(),
        "sriovd started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving plugin API")?;

    if let Err(e) = std::fs::remove_file(&args.socket) {
        tracing::warn!(error = %e, "Failed to remove plugin socket");
    }
    Ok(())
}
