use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use guild_roster::config::{LogFormat, LoggingConfig, RosterConfig, StoreBackend};
use guild_roster::http::{AppState, HttpServer};
use guild_roster::ratelimit::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore};

/// Guild roster API server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "GUILD_CONFIG")]
    config: Option<PathBuf>,

    /// Address to serve HTTP on (overrides configuration)
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Counter store backend (overrides configuration)
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = RosterConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(backend) = cli.store {
        config.store.backend = backend;
    }

    init_tracing(&config.logging);

    info!("Starting Guild Roster service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        store = ?config.store.backend,
        requests_per_window = config.rate_limiting.requests_per_window,
        window_secs = config.rate_limiting.window_secs,
        "Configuration loaded"
    );

    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisCounterStore::connect(&config.redis).await?),
        StoreBackend::Memory => {
            let store = Arc::new(MemoryCounterStore::new());
            spawn_purge_task(store.clone(), config.rate_limiting.window());
            store
        }
    };

    let rate_limiter = Arc::new(RateLimiter::from_config(store, &config.rate_limiting));
    info!("Rate limiter initialized");

    let state = AppState::new(rate_limiter, &config.rate_limiting);
    let server = HttpServer::bind(config.server.http_addr, state).await?;

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Guild Roster service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Periodically drop expired counters from the in-process store.
fn spawn_purge_task(store: Arc<MemoryCounterStore>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                debug!(purged = purged, remaining = store.len(), "Purged expired counters");
            }
        }
    });
}

/// Resolves once the process is asked to stop. The server then stops
/// accepting connections and drains in-flight requests.
///
/// If a signal handler cannot be installed, that signal is ignored rather
/// than stopping the server immediately.
async fn shutdown_signal() {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => "Ctrl+C",
            Err(e) => {
                warn!(error = %e, "Cannot listen for Ctrl+C");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let received = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };
    info!(signal = received, "Draining in-flight HTTP requests before exit");
}
