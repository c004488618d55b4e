use async_trait::async_trait;

use crate::error::CacheResult;
use crate::model::{CacheRequest, CachedResponse};

/// Request mode for a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMode {
    /// Standard fetch; cross-origin responses need an allow-origin grant.
    Cors,
    /// No-introspection fetch; cross-origin responses come back opaque.
    NoCors,
}

#[async_trait]
pub trait Network: Send + Sync {
    /// Perform one fetch. Transport failures are errors; any HTTP status is a response.
    async fn fetch(&self, request: &CacheRequest, mode: FetchMode) -> CacheResult<CachedResponse>;
}

/// Whether `url` shares scheme, host and port with `origin`.
pub fn same_origin(origin: &reqwest::Url, url: &reqwest::Url) -> bool {
    origin.origin() == url.origin()
}
