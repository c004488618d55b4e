// Request interceptor: cache-first serving with opportunistic population from the network.

use std::sync::Arc;

use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::resolver::FetchResolver;
use super::stats::StatsCollector;
use crate::error::{CacheError, CacheResult};
use crate::model::{CacheRequest, CachedResponse, RequestKey};
use crate::store::CacheStore;

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// The network failed and the configured fallback asset was served.
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Cache => "HIT",
            ResponseSource::Network => "MISS",
            ResponseSource::Fallback => "FALLBACK",
        }
    }
}

/// Detached background write of a network response into the current generation.
///
/// The serving path never awaits it; dropping the handle leaves the write running.
pub struct PersistHandle {
    handle: JoinHandle<CacheResult<()>>,
}

impl PersistHandle {
    /// Wait for the write to finish and return its outcome.
    pub async fn settled(self) -> CacheResult<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(CacheError::store(format!("persist task failed: {}", e))),
        }
    }
}

pub struct Interception {
    pub response: CachedResponse,
    pub source: ResponseSource,
    pub persist: Option<PersistHandle>,
}

pub struct RequestInterceptor {
    resolver: Arc<FetchResolver>,
    store: CacheStore,
    version: String,
    stats: Arc<StatsCollector>,
    fallback: Option<RequestKey>,
}

impl RequestInterceptor {
    pub fn new(
        resolver: Arc<FetchResolver>,
        store: CacheStore,
        version: impl Into<String>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            resolver,
            store,
            version: version.into(),
            stats,
            fallback: None,
        }
    }

    /// Serve the cached `url` whenever the network cannot answer.
    pub fn with_fallback(mut self, url: &Url) -> Self {
        self.fallback = Some(RequestKey::new("GET", url));
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Answer `request` from the current generation, or from the network while
    /// caching a copy in the background.
    pub async fn intercept(&self, request: &CacheRequest) -> CacheResult<Interception> {
        if request.is_cacheable() {
            let key = request.key();
            let cached = match self.store.match_in(&self.version, &key).await {
                Ok(cached) => cached,
                Err(e) => {
                    warn!("cache lookup failed for {}, going to network: {}", key, e);
                    None
                }
            };
            if let Some(cached) = cached {
                debug!("cache hit {}", key);
                self.stats.record_hit();
                self.stats.record_served(cached.body.len() as u64);
                return Ok(Interception {
                    response: cached,
                    source: ResponseSource::Cache,
                    persist: None,
                });
            }
            debug!("cache miss {}", key);
            self.stats.record_miss();
        }

        let response = match self.resolver.fetch_universal(request).await {
            Ok(response) => response,
            Err(e) => return self.serve_fallback(request, e).await,
        };

        let persist = if request.is_cacheable() {
            Some(self.spawn_persist(request.key(), response.clone()))
        } else {
            debug!("not caching {} {}", request.method, request.url);
            None
        };

        self.stats.record_served(response.body.len() as u64);
        Ok(Interception {
            response,
            source: ResponseSource::Network,
            persist,
        })
    }

    fn spawn_persist(&self, key: RequestKey, response: CachedResponse) -> PersistHandle {
        let store = self.store.clone();
        let version = self.version.clone();
        let stats = Arc::clone(&self.stats);

        let handle = tokio::spawn(async move {
            let result = async {
                let generation = store.open(&version).await?;
                generation.put(key.clone(), response).await
            }
            .await;

            if let Err(e) = &result {
                warn!("failed to cache {} in generation {}: {}", key, version, e);
                stats.record_persist_failure();
            }
            result
        });

        PersistHandle { handle }
    }

    async fn serve_fallback(
        &self,
        request: &CacheRequest,
        err: CacheError,
    ) -> CacheResult<Interception> {
        let Some(key) = &self.fallback else {
            return Err(err);
        };

        match self.store.match_in(&self.version, key).await {
            Ok(Some(response)) => {
                warn!(
                    "serving fallback {} for {}: {}",
                    key.url(),
                    request.url,
                    err
                );
                self.stats.record_served(response.body.len() as u64);
                Ok(Interception {
                    response,
                    source: ResponseSource::Fallback,
                    persist: None,
                })
            }
            Ok(None) => Err(err),
            Err(store_err) => {
                warn!("fallback lookup failed: {}", store_err);
                Err(err)
            }
        }
    }
}
