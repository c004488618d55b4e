// In-process storage backend. Not durable across restarts.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::CacheStorage;
use crate::error::{CacheError, CacheResult};
use crate::model::{CachedResponse, RequestKey};

type Entries = HashMap<RequestKey, CachedResponse>;

#[derive(Default)]
pub struct MemoryStorage {
    generations: RwLock<HashMap<String, Entries>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, generation: &str) -> CacheResult<()> {
        self.generations
            .write()
            .entry(generation.to_string())
            .or_default();
        Ok(())
    }

    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        response: &CachedResponse,
    ) -> CacheResult<()> {
        let mut generations = self.generations.write();
        let entries = generations
            .get_mut(generation)
            .ok_or_else(|| CacheError::store(format!("generation {} is not open", generation)))?;
        entries.insert(key.clone(), response.clone());
        Ok(())
    }

    async fn get(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> CacheResult<Option<CachedResponse>> {
        Ok(self
            .generations
            .read()
            .get(generation)
            .and_then(|entries| entries.get(key).cloned()))
    }

    async fn keys(&self, generation: &str) -> CacheResult<Vec<RequestKey>> {
        let mut keys: Vec<RequestKey> = self
            .generations
            .read()
            .get(generation)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn generation_names(&self) -> CacheResult<BTreeSet<String>> {
        Ok(self.generations.read().keys().cloned().collect())
    }

    async fn delete(&self, generation: &str) -> CacheResult<bool> {
        Ok(self.generations.write().remove(generation).is_some())
    }
}
