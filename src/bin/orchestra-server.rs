//! Binary entry point: wires the connection pool, router, event store, and
//! shutdown manager into the HTTP gateway, then serves until a shutdown
//! signal arrives.
//!
//! Exit codes (for the process launcher, out of core scope but listed for
//! completeness): 0 success, 1 startup/port failure, 2 dependency missing.

use orchestra::config::Config;
use orchestra::event_store::EventStore;
use orchestra::gateway::{build_router, AppState};
use orchestra::lifecycle::ShutdownManager;
use orchestra::router::{ModelRegistry, ModelRouter};
use orchestra::pool::ConnectionPool;
use std::sync::{Arc, RwLock};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env();

    let pool = ConnectionPool::new(config.pool.clone());
    let registry = Arc::new(RwLock::new(ModelRegistry::default()));
    let router = Arc::new(ModelRouter::new(registry, config.router.clone()));
    if let Err(e) = router.refresh(&pool).await {
        log::warn!("initial model registry refresh failed: {e}; starting with an empty registry");
    }

    let event_store = EventStore::new(config.event_store.clone());
    let _cleanup_handle = event_store.spawn_cleanup_task();

    let shutdown = ShutdownManager::new(config.gateway.drain_timeout);

    let state = AppState {
        event_store: event_store.clone(),
        router: router.clone(),
        pool: pool.clone(),
        shutdown: shutdown.clone(),
    };

    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.gateway.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {}: {e}", config.gateway.bind_addr);
            std::process::exit(1);
        }
    };

    log::info!("listening on {}", config.gateway.bind_addr);

    let shutdown_for_signal = shutdown.clone();
    let pool_for_shutdown = pool.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_for_signal.request_shutdown();
            shutdown_for_signal.wait_for_active_requests().await;
            shutdown_for_signal
                .cleanup_with_timeout("connection pool close", std::time::Duration::from_secs(5), || {
                    let pool = pool_for_shutdown.clone();
                    async move { pool.close().await }
                })
                .await;
        })
        .await
        .expect("server error");
}
