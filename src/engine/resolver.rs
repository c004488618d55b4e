// Fetch resolver: turns raw network replies into responses that are safe to cache.

use std::sync::Arc;

use tracing::{debug, warn};

use super::stats::StatsCollector;
use crate::config::OPAQUE_STATUS;
use crate::error::{CacheError, CacheResult};
use crate::model::{CacheRequest, CachedResponse};
use crate::network::traits::{FetchMode, Network};

pub struct FetchResolver {
    network: Arc<dyn Network>,
    stats: Arc<StatsCollector>,
}

impl FetchResolver {
    pub fn new(network: Arc<dyn Network>, stats: Arc<StatsCollector>) -> Self {
        Self { network, stats }
    }

    /// Usable response or `FetchFailure`.
    pub async fn resolve(&self, request: &CacheRequest) -> CacheResult<CachedResponse> {
        self.fetch_universal(request).await
    }

    /// Standard fetch; anything but a final 2xx is `NonOkStatus`.
    pub async fn fetch_standard(&self, request: &CacheRequest) -> CacheResult<CachedResponse> {
        let response = self.network.fetch(request, FetchMode::Cors).await?;
        self.stats.record_network(response.body.len() as u64);
        if !response.is_ok() {
            return Err(CacheError::NonOkStatus {
                url: request.url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }

    /// No-cors fetch; only the opaque sentinel status is accepted.
    pub async fn fetch_opaque(&self, request: &CacheRequest) -> CacheResult<CachedResponse> {
        let response = self.network.fetch(request, FetchMode::NoCors).await?;
        self.stats.record_network(response.body.len() as u64);
        if response.status != OPAQUE_STATUS {
            return Err(CacheError::UnexpectedOpaqueStatus {
                url: request.url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Standard fetch, downgrading to an opaque fetch on any failure.
    pub async fn fetch_universal(&self, request: &CacheRequest) -> CacheResult<CachedResponse> {
        let standard_err = match self.fetch_standard(request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        warn!(
            "standard fetch failed for {} ({}), requesting an opaque response instead",
            request.url, standard_err
        );
        self.stats.record_opaque_fallback();

        match self.fetch_opaque(request).await {
            Ok(response) => {
                debug!("opaque fallback succeeded for {}", request.url);
                Ok(response)
            }
            Err(opaque_err) => Err(CacheError::FetchFailure {
                url: request.url.to_string(),
                reason: format!("standard: {}; opaque: {}", standard_err, opaque_err),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::scripted::ScriptedNetwork;
    use reqwest::Url;

    fn setup() -> (Arc<ScriptedNetwork>, FetchResolver, Arc<StatsCollector>) {
        let net = Arc::new(ScriptedNetwork::new(Url::parse("http://app.local/").unwrap()));
        let stats = Arc::new(StatsCollector::new());
        let resolver = FetchResolver::new(net.clone(), stats.clone());
        (net, resolver, stats)
    }

    #[tokio::test]
    async fn test_standard_rejects_non_ok() {
        let (net, resolver, _) = setup();
        net.serve("/gone", 404, "not found");
        let req = CacheRequest::parse("http://app.local/gone").unwrap();

        assert!(matches!(
            resolver.fetch_standard(&req).await,
            Err(CacheError::NonOkStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_opaque_rejects_readable_status() {
        let (net, resolver, _) = setup();
        net.serve("/a", 200, "a");
        let req = CacheRequest::parse("http://app.local/a").unwrap();

        assert!(matches!(
            resolver.fetch_opaque(&req).await,
            Err(CacheError::UnexpectedOpaqueStatus { status: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_universal_falls_back_to_opaque() {
        let (net, resolver, stats) = setup();
        net.serve_without_cors("http://cdn.example/img.png", 200, "png");
        let req = CacheRequest::parse("http://cdn.example/img.png").unwrap();

        let resp = resolver.fetch_universal(&req).await.unwrap();
        assert!(resp.is_opaque());
        assert_eq!(&resp.body[..], b"png");
        assert_eq!(stats.snapshot().opaque_fallbacks, 1);

        let modes: Vec<FetchMode> = net.calls().into_iter().map(|c| c.mode).collect();
        assert_eq!(modes, vec![FetchMode::Cors, FetchMode::NoCors]);
    }

    #[tokio::test]
    async fn test_universal_falls_back_when_standard_is_non_ok() {
        let (net, resolver, _) = setup();
        // Cross-origin 500: standard sees NonOkStatus, the opaque reply masks it to 0.
        net.serve("http://cdn.example/flaky.js", 500, "err");
        let req = CacheRequest::parse("http://cdn.example/flaky.js").unwrap();

        let resp = resolver.fetch_universal(&req).await.unwrap();
        assert_eq!(resp.status, OPAQUE_STATUS);
    }

    #[tokio::test]
    async fn test_universal_same_origin_error_is_fetch_failure() {
        let (net, resolver, _) = setup();
        net.serve("/missing", 404, "not found");
        let req = CacheRequest::parse("http://app.local/missing").unwrap();

        let err = resolver.fetch_universal(&req).await.unwrap_err();
        assert!(matches!(err, CacheError::FetchFailure { .. }));
        assert_eq!(net.call_count("/missing"), 2);
    }

    #[tokio::test]
    async fn test_universal_ok_makes_single_call() {
        let (net, resolver, stats) = setup();
        net.serve("/a", 200, "hello");
        let req = CacheRequest::parse("http://app.local/a").unwrap();

        let resp = resolver.resolve(&req).await.unwrap();
        assert_eq!(&resp.body[..], b"hello");
        assert_eq!(net.total_calls(), 1);
        assert_eq!(stats.total_network_bytes(), 5);
    }
}
