//! tunnelgrid - reverse SSH tunnel fleet manager
//!
//! Loads the YAML configuration, waits for the database, restores the tunnel
//! fleet from the persisted hosts and service-ports, then serves the REST
//! control plane until SIGINT/SIGTERM.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunnelgrid_api::{ApiServer, ApiServerConfig};
use tunnelgrid_core::TunnelManager;
use tunnelgrid_db::Store;

use crate::config::{Config, DatabaseConfig, LoggingConfig};

/// tunnelgrid - maintain a fleet of reverse SSH tunnels from a REST control plane
#[derive(Parser, Debug)]
#[command(name = "tunnelgrid")]
#[command(about = "Maintains a fleet of reverse SSH tunnels between remote hosts and this manager")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config/config.yaml")]
    config: PathBuf,
}

/// Set up stdout plus rolling-file logging per the logging section.
fn setup_logging(cfg: &LoggingConfig) -> Result<WorkerGuard> {
    let path = std::path::Path::new(&cfg.file.path);
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tunnelgrid.log".to_string());

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::daily(dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_new(cfg.tracing_level()).unwrap_or_else(|_| EnvFilter::new("info"));

    match cfg.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(file_writer))
            .with(fmt::layer().json())
            .init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false).with_writer(file_writer))
            .with(fmt::layer())
            .init(),
    }

    Ok(guard)
}

/// Raise RLIMIT_NOFILE toward 65535; each forwarded connection costs two
/// descriptors.
fn raise_nofile_limit() {
    const DESIRED: libc::rlim_t = 65_535;

    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        warn!("failed to read RLIMIT_NOFILE");
        return;
    }

    info!(
        soft = limit.rlim_cur,
        hard = limit.rlim_max,
        "file descriptor limit"
    );

    if limit.rlim_max < DESIRED {
        warn!(
            hard = limit.rlim_max,
            "hard file descriptor limit is below 65535; raise it for reliable connection handling"
        );
    }
    if limit.rlim_cur >= DESIRED && limit.rlim_max >= DESIRED {
        return;
    }

    let target = if limit.rlim_max > DESIRED {
        limit.rlim_max
    } else {
        DESIRED.min(limit.rlim_max)
    };
    let new_limit = libc::rlimit {
        rlim_cur: target,
        rlim_max: limit.rlim_max,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &new_limit) } != 0 {
        warn!(
            soft = limit.rlim_cur,
            hard = limit.rlim_max,
            "failed to raise file descriptor limit"
        );
        return;
    }

    info!(
        old = limit.rlim_cur,
        new = target,
        "raised file descriptor limit"
    );
}

/// Connect to the database, retrying once per second until the configured
/// timeout, then run migrations.
async fn connect_database(cfg: &DatabaseConfig) -> Result<Store> {
    let url = format!(
        "mysql://{}:{}@{}:{}/{}",
        cfg.user, cfg.password, cfg.host, cfg.port, cfg.name
    );
    let deadline = Instant::now() + Duration::from_secs(cfg.timeout_sec);

    loop {
        match tunnelgrid_db::connect(&url).await {
            Ok(db) => {
                info!("connected to database");
                tunnelgrid_db::migrate(&db)
                    .await
                    .context("failed to run database migrations")?;
                return Ok(Store::new(db));
            }
            Err(err) => {
                if Instant::now() >= deadline {
                    anyhow::bail!(
                        "timeout waiting for database connection after {}s: {err}",
                        cfg.timeout_sec
                    );
                }
                info!(host = %cfg.host, port = cfg.port, "attempting to connect to database...");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if unsafe { libc::geteuid() } != 0 {
        anyhow::bail!("tunnelgrid must be run as root");
    }

    let cfg = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    let _log_guard = setup_logging(&cfg.logging).context("failed to initialize logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting tunnelgrid");

    raise_nofile_limit();

    let store = Arc::new(connect_database(&cfg.database).await?);
    let manager = Arc::new(TunnelManager::new(
        Arc::clone(&store),
        Duration::from_secs(cfg.monitoring.interval_sec),
    ));

    info!("restoring all tunnels");
    if let Err(err) = manager.restore_all_tunnels().await {
        error!(error = %err, "failed to restore tunnels");
    }

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], cfg.api.port)),
            enable_cors: true,
        },
        Arc::clone(&manager),
        store,
    );

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received interrupt"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        result = server.start() => result.context("API server failed")?,
    }

    info!("stopping all tunnels");
    manager.stop_all_tunnels().await;

    info!("exiting tunnelgrid");
    Ok(())
}
