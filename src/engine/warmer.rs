// Asset warmer: primes the current generation with every manifest asset during install.

use std::collections::BTreeSet;
use std::sync::Arc;

use reqwest::Url;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::resolver::FetchResolver;
use crate::config::AssetManifest;
use crate::error::{CacheError, CacheResult};
use crate::model::{CacheRequest, RequestKey};
use crate::store::{CacheStore, Generation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Standard fetch with opaque downgrade.
    Universal,
    /// Opaque fetch only.
    Opaque,
}

/// Outcome of a successful warm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmReport {
    pub generation: String,
    pub cached: usize,
}

pub struct AssetWarmer {
    resolver: Arc<FetchResolver>,
    store: CacheStore,
    scope: Url,
}

fn plan(manifest: &AssetManifest) -> Vec<(String, Strategy)> {
    manifest
        .trusted
        .iter()
        .chain(&manifest.dynamic)
        .map(|url| (url.clone(), Strategy::Universal))
        .chain(manifest.cors.iter().map(|url| (url.clone(), Strategy::Opaque)))
        .collect()
}

impl AssetWarmer {
    pub fn new(resolver: Arc<FetchResolver>, store: CacheStore, scope: Url) -> Self {
        Self {
            resolver,
            store,
            scope,
        }
    }

    /// Fetch and store every manifest asset into `version`.
    ///
    /// All assets are attempted concurrently and all are awaited; when any
    /// fails, the first failure in manifest order is returned. Dropping the
    /// returned future aborts the outstanding fetches.
    pub async fn warm(&self, manifest: &AssetManifest, version: &str) -> CacheResult<WarmReport> {
        let generation = self.store.open(version).await?;
        let plan = plan(manifest);
        let total = plan.len();

        info!("warming {} assets into generation {}", total, version);

        let mut join_set = JoinSet::new();
        for (index, (url, strategy)) in plan.iter().cloned().enumerate() {
            let resolver = Arc::clone(&self.resolver);
            let generation = generation.clone();
            let scope = self.scope.clone();
            join_set.spawn(async move {
                let result = warm_one(&resolver, &generation, &scope, &url, strategy).await;
                (index, result)
            });
        }

        let mut outcomes: Vec<Option<CacheResult<()>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => outcomes[index] = Some(result),
                Err(e) => warn!("warm task did not finish: {}", e),
            }
        }

        let mut first_err: Option<CacheError> = None;
        let mut failed = 0usize;
        for ((url, _), outcome) in plan.iter().zip(outcomes) {
            let err = match outcome {
                Some(Ok(())) => continue,
                Some(Err(e)) => e,
                None => CacheError::store(format!("warm task for {} did not finish", url)),
            };
            warn!("failed to cache asset {}: {}", url, err);
            failed += 1;
            first_err.get_or_insert(err);
        }

        if let Some(e) = first_err {
            warn!(
                "warming generation {} failed: {}/{} assets failed",
                version, failed, total
            );
            return Err(e);
        }

        info!("warmed generation {} with {} assets", version, total);
        Ok(WarmReport {
            generation: version.to_string(),
            cached: total,
        })
    }

    /// Whether `version` exists and already holds every manifest asset.
    pub async fn is_warm(&self, manifest: &AssetManifest, version: &str) -> CacheResult<bool> {
        if !self.store.generation_names().await?.contains(version) {
            return Ok(false);
        }
        let generation = self.store.open(version).await?;
        let stored: BTreeSet<RequestKey> = generation.keys().await?.into_iter().collect();
        for (url, _) in plan(manifest) {
            let key = CacheRequest::resolve(&self.scope, &url)?.key();
            if !stored.contains(&key) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

async fn warm_one(
    resolver: &FetchResolver,
    generation: &Generation,
    scope: &Url,
    url: &str,
    strategy: Strategy,
) -> CacheResult<()> {
    let request = CacheRequest::resolve(scope, url)?;
    let response = match strategy {
        Strategy::Universal => resolver.fetch_universal(&request).await?,
        Strategy::Opaque => resolver.fetch_opaque(&request).await?,
    };
    generation.put(request.key(), response).await
}
