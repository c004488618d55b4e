// Versioned cache store.
//
// The store owns every cache generation. A generation is a named
// key→response map; the current generation is named by the configured
// version identifier and all others are stale until the reaper removes them.
//
// Two backends implement CacheStorage: memory::MemoryStorage and the
// durable disk::DiskStorage.

pub mod disk;
pub mod memory;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CacheResult;
use crate::model::{CachedResponse, RequestKey};

/// Backend primitives. Every operation is atomic per key or per generation.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the generation if missing. Idempotent.
    async fn open(&self, generation: &str) -> CacheResult<()>;

    /// Insert or overwrite an entry. Fails if the generation was never opened.
    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        response: &CachedResponse,
    ) -> CacheResult<()>;

    /// Look up an entry. A missing generation is a miss, not an error.
    async fn get(&self, generation: &str, key: &RequestKey)
        -> CacheResult<Option<CachedResponse>>;

    async fn keys(&self, generation: &str) -> CacheResult<Vec<RequestKey>>;

    async fn generation_names(&self) -> CacheResult<BTreeSet<String>>;

    /// Remove a whole generation. Returns whether it existed.
    async fn delete(&self, generation: &str) -> CacheResult<bool>;
}

/// Handle to the set of generations.
#[derive(Clone)]
pub struct CacheStore {
    storage: Arc<dyn CacheStorage>,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self { storage }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(memory::MemoryStorage::new()))
    }

    /// Durable store rooted at `root`, reusing any generations already there.
    pub async fn on_disk(root: &Path) -> CacheResult<Self> {
        let storage = disk::DiskStorage::open_root(root).await?;
        Ok(Self::new(Arc::new(storage)))
    }

    pub async fn open(&self, version: &str) -> CacheResult<Generation> {
        self.storage.open(version).await?;
        Ok(Generation {
            name: version.to_string(),
            storage: Arc::clone(&self.storage),
        })
    }

    /// Look up `key` in one generation only.
    pub async fn match_in(
        &self,
        version: &str,
        key: &RequestKey,
    ) -> CacheResult<Option<CachedResponse>> {
        self.storage.get(version, key).await
    }

    /// Look up `key` across all generations in name order; first hit wins.
    pub async fn match_any(&self, key: &RequestKey) -> CacheResult<Option<CachedResponse>> {
        for name in self.storage.generation_names().await? {
            if let Some(resp) = self.storage.get(&name, key).await? {
                return Ok(Some(resp));
            }
        }
        Ok(None)
    }

    pub async fn generation_names(&self) -> CacheResult<BTreeSet<String>> {
        self.storage.generation_names().await
    }

    pub async fn delete(&self, version: &str) -> CacheResult<bool> {
        let existed = self.storage.delete(version).await?;
        debug!("delete generation {} existed={}", version, existed);
        Ok(existed)
    }
}

/// An opened generation.
#[derive(Clone)]
pub struct Generation {
    name: String,
    storage: Arc<dyn CacheStorage>,
}

impl Generation {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `response` under `key`, replacing any previous entry.
    pub async fn put(&self, key: RequestKey, response: CachedResponse) -> CacheResult<()> {
        self.storage.put(&self.name, &key, &response).await?;
        debug!(
            "cached {} in generation {} ({} bytes)",
            key,
            self.name,
            response.body.len()
        );
        Ok(())
    }

    pub async fn lookup(&self, key: &RequestKey) -> CacheResult<Option<CachedResponse>> {
        self.storage.get(&self.name, key).await
    }

    pub async fn keys(&self) -> CacheResult<Vec<RequestKey>> {
        self.storage.keys(&self.name).await
    }
}
