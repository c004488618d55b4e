// Request and response values shared by the resolver, store and interceptor.

use std::fmt;

use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::OPAQUE_STATUS;
use crate::error::{CacheError, CacheResult};

/// How the platform exposed a response to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Same-origin response, fully inspectable.
    Basic,
    /// Cross-origin response the origin granted access to.
    Cors,
    /// Cross-origin no-cors response: status 0, no headers, body kept for replay.
    Opaque,
}

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl CacheRequest {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url,
            headers: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// Parse `url` as an absolute URL and build a GET request.
    pub fn parse(url: &str) -> CacheResult<Self> {
        let parsed = Url::parse(url).map_err(|e| CacheError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::get(parsed))
    }

    /// Resolve a possibly relative URL against `base` and build a GET request.
    pub fn resolve(base: &Url, url: &str) -> CacheResult<Self> {
        let joined = base.join(url).map_err(|e| CacheError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::get(joined))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Only GET requests are looked up in or written to the cache.
    pub fn is_cacheable(&self) -> bool {
        self.method == "GET"
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// Identity of a cache entry: method plus absolute URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.to_ascii_uppercase(),
            url: url.into(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stable hex SHA-256 of the key, used for on-disk entry names.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An immutable, replayable response. Cloning shares the body buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub kind: ResponseKind,
}

impl CachedResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
        }
    }

    /// Mask a response the way the platform does for cross-origin no-cors fetches.
    pub fn into_opaque(self) -> Self {
        Self {
            status: OPAQUE_STATUS,
            headers: Vec::new(),
            kind: ResponseKind::Opaque,
            ..self
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 2xx status.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_opaque(&self) -> bool {
        self.kind == ResponseKind::Opaque
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_strips_fragment_and_normalizes_method() {
        let a = RequestKey::new("get", &Url::parse("http://app.local/a#top").unwrap());
        let b = RequestKey::new("GET", &Url::parse("http://app.local/a").unwrap());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "GET http://app.local/a");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_key_keeps_query() {
        let a = RequestKey::new("GET", &Url::parse("http://app.local/a?x=1").unwrap());
        let b = RequestKey::new("GET", &Url::parse("http://app.local/a?x=2").unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_relative_against_scope() {
        let scope = Url::parse("http://app.local/app/").unwrap();
        let req = CacheRequest::resolve(&scope, "./index.html").unwrap();
        assert_eq!(req.url.as_str(), "http://app.local/app/index.html");
        let req = CacheRequest::resolve(&scope, "http://x/img.png").unwrap();
        assert_eq!(req.url.as_str(), "http://x/img.png");
    }

    #[test]
    fn test_opaque_masks_status_and_headers() {
        let resp = CachedResponse::new("http://x/img.png", 200, "png")
            .with_header("Content-Type", "image/png")
            .into_opaque();
        assert_eq!(resp.status, OPAQUE_STATUS);
        assert!(resp.is_opaque());
        assert!(!resp.is_ok());
        assert!(resp.header("content-type").is_none());
        assert_eq!(&resp.body[..], b"png");
    }

    #[test]
    fn test_clone_shares_body() {
        let resp = CachedResponse::new("http://app.local/a", 200, vec![1u8, 2, 3]);
        let copy = resp.clone();
        drop(resp);
        assert_eq!(&copy.body[..], &[1, 2, 3]);
    }
}
