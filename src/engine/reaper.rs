// Generation reaper: deletes every generation except the current one.

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::{CacheError, CacheResult};
use crate::store::CacheStore;

pub struct GenerationReaper {
    store: CacheStore,
}

impl GenerationReaper {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    /// Delete all generations not named `current_version`; returns the deleted names.
    ///
    /// Deletions run concurrently and all are awaited. A partial failure leaves
    /// the remaining stale generations for the next activation.
    pub async fn reap(&self, current_version: &str) -> CacheResult<Vec<String>> {
        let stale: Vec<String> = self
            .store
            .generation_names()
            .await?
            .into_iter()
            .filter(|name| name != current_version)
            .collect();

        if stale.is_empty() {
            info!("no stale generations besides {}", current_version);
            return Ok(stale);
        }

        let mut join_set = JoinSet::new();
        for (index, name) in stale.iter().cloned().enumerate() {
            let store = self.store.clone();
            join_set.spawn(async move { (index, store.delete(&name).await) });
        }

        let mut outcomes: Vec<Option<CacheResult<bool>>> = stale.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => outcomes[index] = Some(result),
                Err(e) => warn!("delete task did not finish: {}", e),
            }
        }

        let mut deleted = Vec::with_capacity(stale.len());
        let mut first_err: Option<CacheError> = None;
        for (name, outcome) in stale.into_iter().zip(outcomes) {
            let err = match outcome {
                Some(Ok(_)) => {
                    deleted.push(name);
                    continue;
                }
                Some(Err(e)) => e,
                None => CacheError::store(format!("delete of generation {} did not finish", name)),
            };
            warn!("failed to delete generation {}: {}", name, err);
            first_err.get_or_insert(err);
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        info!(
            "deleted {} stale generations, keeping {}",
            deleted.len(),
            current_version
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reap_keeps_only_current() {
        let store = CacheStore::in_memory();
        for v in ["v0", "v1", "v2"] {
            store.open(v).await.unwrap();
        }
        let reaper = GenerationReaper::new(store.clone());

        let deleted = reaper.reap("v2").await.unwrap();
        assert_eq!(deleted, vec!["v0".to_string(), "v1".to_string()]);
        assert_eq!(store.generation_names().await.unwrap(), names(&["v2"]));
    }

    #[tokio::test]
    async fn test_reap_when_current_is_absent() {
        let store = CacheStore::in_memory();
        store.open("v1").await.unwrap();
        let reaper = GenerationReaper::new(store.clone());

        reaper.reap("v2").await.unwrap();
        assert!(store.generation_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reap_on_empty_store_is_noop() {
        let store = CacheStore::in_memory();
        let deleted = GenerationReaper::new(store).reap("v1").await.unwrap();
        assert!(deleted.is_empty());
    }
}
