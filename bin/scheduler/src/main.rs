use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tempo_api::{AppState, build_router};
use tempo_core::{Clock, SystemClock};
use tempo_network::HttpDispatcher;
use tempo_observability::init_tracing;
use tempo_scheduler::Scheduler;
use tempo_storage::{SqliteTaskStore, TaskStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;

mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info,tower_http=debug");

    // explicit TEMPO_CONFIG path > ./tempo.toml > defaults; a missing file
    // means defaults, a broken one is fatal
    let config_path = std::env::var("TEMPO_CONFIG").ok();
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db_path = &config.database.path;
    ensure_parent_dir(db_path)?;
    info!(path = %db_path, "opening task store");
    let store: Arc<dyn TaskStore> = Arc::new(
        SqliteTaskStore::open(db_path, clock.clone())
            .with_context(|| format!("opening task store at {db_path}"))?,
    );

    let dispatcher =
        HttpDispatcher::new(config.dispatch_config()).context("building http client")?;
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        Arc::new(dispatcher),
        clock.clone(),
        config.scheduler_config(),
    ));

    let shutdown = CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    let router = build_router(Arc::new(AppState::new(store, clock)));
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "task api listening");

    let signal = shutdown.clone();
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => error!(error = %e, "cannot listen for ctrl-c, shutting down"),
            }
            signal.cancel();
        })
        .await;

    // stop polling and let in-flight dispatches record their results
    shutdown.cancel();
    scheduler_task.await.context("scheduler loop panicked")?;
    served.context("api server failed")?;

    info!("tempo stopped");
    Ok(())
}

fn ensure_parent_dir(path: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}
