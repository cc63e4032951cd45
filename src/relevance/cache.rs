//! Append-only keyword embedding cache

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::embeddings::{EmbeddingProvider, EmbeddingVector};

type Slot = Arc<OnceCell<EmbeddingVector>>;

/// Keyword to embedding map. Entries are written once and never evicted.
#[derive(Debug, Default)]
pub struct KeywordEmbeddingCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl KeywordEmbeddingCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, keyword: &str) -> Slot {
        Arc::clone(self.lock_slots().entry(keyword.to_string()).or_default())
    }

    /// Embed every keyword not cached yet.
    ///
    /// Does nothing unless `provider` is ready. Keywords that fail to embed
    /// are logged and left out so a later call retries them. Concurrent
    /// callers asking for the same keyword share one computation.
    #[inline]
    pub async fn precompute<S: AsRef<str>>(&self, provider: &EmbeddingProvider, keywords: &[S]) {
        if !provider.is_ready() {
            debug!("Skipping keyword precompute, provider is not ready");
            return;
        }

        let pending = keywords
            .iter()
            .map(AsRef::as_ref)
            .filter(|keyword| !self.contains(keyword))
            .map(|keyword| {
                let slot = self.slot(keyword);
                async move {
                    let result = slot
                        .get_or_try_init(|| provider.compute_embedding(keyword))
                        .await;
                    if let Err(e) = result {
                        warn!("Failed to embed keyword '{}': {}", keyword, e);
                    }
                }
            });

        join_all(pending).await;
    }

    #[inline]
    pub fn contains(&self, keyword: &str) -> bool {
        self.lock_slots()
            .get(keyword)
            .is_some_and(|slot| slot.initialized())
    }

    #[inline]
    pub fn get(&self, keyword: &str) -> Option<EmbeddingVector> {
        self.lock_slots()
            .get(keyword)
            .and_then(|slot| slot.get().cloned())
    }

    /// Embeddings of the cached keywords among `keywords`, in order
    #[inline]
    pub fn lookup<S: AsRef<str>>(&self, keywords: &[S]) -> Vec<EmbeddingVector> {
        let slots = self.lock_slots();
        keywords
            .iter()
            .filter_map(|keyword| slots.get(keyword.as_ref()))
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }

    /// Number of keywords with a stored embedding
    #[inline]
    pub fn len(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
