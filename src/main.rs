use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use tablehold::clock::Clock;
use tablehold::config::{Config, Seed};
use tablehold::engine::Engine;
use tablehold::reconcile::{ReconciliationQueue, ReservationLinker};
use tablehold::store::Store;
use tablehold::{reaper, wire};

/// How often the compactor checks the journal size.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tablehold::observability::init_tracing();

    let config = Config::from_env()?;
    tablehold::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Store::open(&config.journal_path())?);
    let clock = Clock::System;
    let engine = Arc::new(Engine::new(
        store.clone(),
        clock.clone(),
        config.engine_settings(),
    ));

    if let Some(path) = &config.seed {
        Seed::load(path)?.apply(&engine).await?;
    }

    let linker = Arc::new(ReservationLinker::new(store.clone()));
    let queue = Arc::new(ReconciliationQueue::new(
        store.clone(),
        linker,
        config.retry_policy(),
        clock,
    ));

    tokio::spawn(reaper::run_reaper(engine.clone(), config.reaper_interval));
    tokio::spawn(reaper::run_queue_worker(queue.clone(), config.queue_interval));
    tokio::spawn(reaper::run_compactor(
        store.clone(),
        config.compact_threshold,
        COMPACT_CHECK_INTERVAL,
    ));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("tablehold listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  cache: {}", if config.cache_enabled { "enabled" } else { "disabled" });
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
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
                    tracing::warn!("no SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };

    let handler = Arc::new(wire::Handler::new(engine, queue));
    wire::serve(listener, handler, config.max_connections, DRAIN_TIMEOUT, shutdown).await;

    info!("tablehold stopped");
    Ok(())
}
