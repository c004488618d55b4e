use std::collections::HashSet;
use std::path::Path;

use reqwest::Url;
use serde::Deserialize;

use crate::error::{CacheError, CacheResult};

/// Status reported by the platform for an opaque (no-cors, cross-origin) response.
pub const OPAQUE_STATUS: u16 = 0;

/// Default timeout for a single network attempt.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default address for the HTTP front end (random port on loopback).
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:0";

/// Response header tagging where the front end got a response from.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Asset URLs to warm during install. The three lists must be disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AssetManifest {
    /// First-party assets, fetched with the standard-then-opaque resolver.
    pub trusted: Vec<String>,
    /// Assets declared at runtime by the backend, fetched like trusted ones.
    pub dynamic: Vec<String>,
    /// Cross-origin assets known to fail standard validation; fetched opaque only.
    pub cors: Vec<String>,
}

impl AssetManifest {
    pub fn len(&self) -> usize {
        self.trusted.len() + self.dynamic.len() + self.cors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn first_overlap(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.trusted
            .iter()
            .chain(&self.dynamic)
            .chain(&self.cors)
            .find(|url| !seen.insert(url.as_str()))
            .map(String::as_str)
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

/// Top-level configuration for the cache engine.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Name of the current cache generation. Changing it invalidates all others.
    pub version: String,
    /// Base URL that relative manifest entries resolve against; its origin is "same-origin".
    pub scope: String,
    /// Directory for the durable store. In-memory store when absent.
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Cached asset served when the network fails. Disabled when absent.
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default)]
    pub manifest: AssetManifest,
}

impl CacheConfig {
    pub fn new(version: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            scope: scope.into(),
            cache_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            listen_addr: default_listen_addr(),
            fallback_url: None,
            manifest: AssetManifest::default(),
        }
    }

    pub fn from_json_str(json: &str) -> CacheResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| CacheError::Config {
            message: format!("invalid config json: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> CacheResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| CacheError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }

    /// Parsed scope URL.
    pub fn scope_url(&self) -> CacheResult<Url> {
        Url::parse(&self.scope).map_err(|e| CacheError::InvalidUrl {
            url: self.scope.clone(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.version.trim().is_empty() {
            return Err(CacheError::Config {
                message: "version must not be empty".to_string(),
            });
        }
        self.scope_url()?;
        if let Some(url) = self.manifest.first_overlap() {
            return Err(CacheError::Config {
                message: format!("manifest lists must be disjoint, {} appears twice", url),
            });
        }
        Ok(())
    }
}
