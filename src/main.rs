use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tablebook::auth::JwtVerifier;
use tablebook::config::Config;
use tablebook::engine::Engine;
use tablebook::http::{AppState, router};
use tablebook::reaper::{run_compactor, run_reaper};
use tablebook::store::WalStore;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tablebook::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(WalStore::open(config.wal_path())?);
    info!(
        "loaded {} tables and {} reservations",
        store.table_count(),
        store.reservation_count()
    );
    let engine = Arc::new(Engine::new(store.clone()));
    if config.seed_tables {
        let created = engine.seed_tables().await?;
        info!("seeded {created} missing default tables");
    }
    let verifier = Arc::new(JwtVerifier::new(
        config.jwt_secret.as_bytes(),
        config.jwt_issuer.as_deref(),
    ));

    let reaper = tokio::spawn(run_reaper(engine.clone(), config.reaper_poll));
    let compactor = tokio::spawn(run_compactor(
        store.clone(),
        config.compact_threshold,
        COMPACT_CHECK_INTERVAL,
    ));

    let app = router(AppState { engine, verifier }, config.max_connections);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("tablebook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  reaper poll: {}s", config.reaper_poll.as_secs());
    info!("  seed tables: {}", config.seed_tables);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received, draining requests");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    reaper.abort();
    compactor.abort();
    if let Err(e) = store.compact().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("tablebook stopped");
    Ok(())
}
