use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::CacheConfig;
use crate::engine::stats::StatsSnapshot;
use crate::lifecycle::{CacheWorker, LifecycleController};
use crate::network::http_network::HttpNetwork;
use crate::server::handler::{CacheServer, Controller};
use crate::store::CacheStore;

static INIT_TRACING: Once = Once::new();

/// Install the global fmt subscriber once; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("cache engine tracing initialized");
    });
}

/// A warmed, activated cache with its HTTP front end.
pub struct RunningCache {
    controller: Controller,
    server: CacheServer,
}

impl RunningCache {
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn url_for(&self, path: &str) -> String {
        self.server.url_for(path)
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.controller.handler().stats()
    }

    pub fn shutdown(self) {
        self.server.shutdown();
    }
}

/// Build the standard worker: HTTP network, disk store when `cache_dir` is set.
pub async fn build_worker(config: &CacheConfig) -> Result<CacheWorker> {
    let scope = config.scope_url()?;
    let network = HttpNetwork::with_timeout(
        scope,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    let store = match &config.cache_dir {
        Some(dir) => CacheStore::on_disk(Path::new(dir))
            .await
            .with_context(|| format!("failed to open cache dir {}", dir))?,
        None => CacheStore::in_memory(),
    };

    Ok(CacheWorker::new(config, Arc::new(network), store)?)
}

/// Install and activate `worker`, then serve requests through it.
pub async fn launch(config: &CacheConfig, worker: CacheWorker) -> Result<RunningCache> {
    let controller: Controller = Arc::new(LifecycleController::new(worker));

    match controller.install().await {
        Ok(report) => info!(
            "installed generation {} ({} assets)",
            report.generation, report.cached
        ),
        Err(e) => {
            // A generation completed by an earlier run keeps serving while offline.
            let worker = controller.handler();
            let warm = worker
                .has_warm_generation()
                .await
                .context("failed to inspect existing generation")?;
            if !warm {
                return Err(e).context("install did not complete");
            }
            warn!(
                "install failed, serving existing generation {}: {}",
                worker.version(),
                e
            );
            controller.adopt_installed()?;
        }
    }

    let deleted = controller
        .activate()
        .await
        .context("activate did not complete")?;
    info!("activated, removed {} stale generations", deleted.len());

    let server =
        CacheServer::start(Arc::clone(&controller), config.scope_url()?, &config.listen_addr)
            .await?;

    Ok(RunningCache { controller, server })
}

/// Validate `config`, build the worker and launch it.
pub async fn start(config: CacheConfig) -> Result<RunningCache> {
    config.validate()?;
    let worker = build_worker(&config).await?;
    launch(&config, worker).await
}
