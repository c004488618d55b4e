use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use tracing::{debug, warn};

use super::traits::{same_origin, FetchMode, Network};
use crate::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::error::{CacheError, CacheResult};
use crate::model::{CacheRequest, CachedResponse, ResponseKind};

/// `reqwest`-backed network primitive emulating platform CORS semantics relative to `origin`.
pub struct HttpNetwork {
    client: Client,
    origin: Url,
}

impl HttpNetwork {
    pub fn new(origin: Url) -> CacheResult<Self> {
        Self::with_timeout(origin, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(origin: Url, timeout: Duration) -> CacheResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Config {
                message: format!("failed to build http client: {}", e),
            })?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn build_request(&self, request: &CacheRequest) -> CacheResult<RequestBuilder> {
        let method =
            Method::from_bytes(request.method.as_bytes()).map_err(|e| CacheError::InvalidUrl {
                url: request.url.to_string(),
                reason: format!("invalid method {}: {}", request.method, e),
            })?;

        let mut req = self.client.request(method, request.url.clone());
        for (k, v) in &request.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        Ok(req)
    }

    fn cors_granted(&self, headers: &[(String, String)]) -> bool {
        let origin = self.origin.origin().ascii_serialization();
        headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("access-control-allow-origin"))
            .any(|(_, v)| v.trim() == "*" || v.trim() == origin)
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &CacheRequest, mode: FetchMode) -> CacheResult<CachedResponse> {
        let url = request.url.to_string();
        let resp = self
            .build_request(request)?
            .send()
            .await
            .map_err(|e| CacheError::Network {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        let final_url = resp.url().clone();
        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = resp.bytes().await.map_err(|e| CacheError::Network {
            url: url.clone(),
            message: e.to_string(),
        })?;
        debug!(
            "http fetch {} mode={:?} status={} bytes={}",
            url,
            mode,
            status,
            body.len()
        );

        let response = CachedResponse {
            url: final_url.to_string(),
            status,
            headers,
            body,
            kind: ResponseKind::Basic,
        };

        if same_origin(&self.origin, &final_url) {
            return Ok(response);
        }

        match mode {
            FetchMode::NoCors => Ok(response.into_opaque()),
            FetchMode::Cors => {
                if !self.cors_granted(&response.headers) {
                    warn!("cors rejected for {}: no allow-origin grant", url);
                    return Err(CacheError::Network {
                        url,
                        message: "cross-origin response without access-control-allow-origin"
                            .to_string(),
                    });
                }
                Ok(CachedResponse {
                    kind: ResponseKind::Cors,
                    ..response
                })
            }
        }
    }
}
