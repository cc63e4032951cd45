// Relevance module
// Keyword cache, window aggregation and the block decision behind one engine

pub mod aggregator;
pub mod cache;
pub mod decision;


use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{BackendKind, Config};
use crate::embeddings::windowing::WindowingConfig;
use crate::embeddings::{
    EmbeddingBackend, EmbeddingError, EmbeddingProvider, HashingBackend, OllamaBackend,
    ProgressSink, ProviderStatus, create_sliding_windows, logging_progress,
};

pub use aggregator::{AggregatedScores, aggregate, pool_scores};
pub use cache::KeywordEmbeddingCache;
pub use decision::{ALLOW_THRESHOLD, BLOCK_THRESHOLD, SimilarityResult, should_block};

/// Snapshot of the engine for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    #[serde(flatten)]
    pub state: ProviderStatus,
    pub model_id: String,
    pub cached_keywords: usize,
    pub ready_since: Option<DateTime<Utc>>,
}

/// Owns the embedding provider and keyword cache for one host process.
///
/// Similarity requests never fail: any error is logged and answered with
/// [`SimilarityResult::neutral`].
pub struct RelevanceEngine {
    provider: Arc<EmbeddingProvider>,
    cache: KeywordEmbeddingCache,
    windowing: WindowingConfig,
}

impl RelevanceEngine {
    /// Rejects window configurations that cannot advance
    #[inline]
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        windowing: WindowingConfig,
    ) -> Result<Self, EmbeddingError> {
        windowing.stride()?;

        Ok(Self {
            provider: Arc::new(EmbeddingProvider::new(backend)),
            cache: KeywordEmbeddingCache::new(),
            windowing,
        })
    }

    /// Build the engine with the backend selected in `config`
    #[inline]
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let backend: Arc<dyn EmbeddingBackend> = match config.backend.kind {
            BackendKind::Ollama => Arc::new(OllamaBackend::new(&config.ollama)?),
            BackendKind::Hashing => Arc::new(HashingBackend::new(config.hashing.dimension)),
        };

        info!(
            "Using {} embedding backend ({})",
            match config.backend.kind {
                BackendKind::Ollama => "ollama",
                BackendKind::Hashing => "hashing",
            },
            backend.model_id()
        );

        Ok(Self::new(backend, config.windowing)?)
    }

    #[inline]
    pub fn provider(&self) -> &Arc<EmbeddingProvider> {
        &self.provider
    }

    #[inline]
    pub fn windowing(&self) -> WindowingConfig {
        self.windowing
    }

    #[inline]
    pub async fn initialize(&self, progress: ProgressSink) -> Result<(), EmbeddingError> {
        self.provider.initialize(progress).await
    }

    /// Embed and cache keywords ahead of classification.
    ///
    /// Keywords are canonicalized first. No-op until the provider is ready.
    #[inline]
    pub async fn precompute_keyword_embeddings<S: AsRef<str>>(&self, keywords: &[S]) {
        let keywords = normalize_keywords(keywords);
        self.cache.precompute(&self.provider, &keywords).await;
        debug!("{} keyword embeddings cached", self.cache.len());
    }

    /// Compare `text` against both keyword lists and decide whether to block.
    ///
    /// Loads the model and embeds missing keywords on demand. Falls back to
    /// the neutral result on any failure.
    #[inline]
    pub async fn compute_aggregated_similarity<B, A>(
        &self,
        text: &str,
        blocked_keywords: &[B],
        allowed_keywords: &[A],
    ) -> SimilarityResult
    where
        B: AsRef<str>,
        A: AsRef<str>,
    {
        match self
            .try_compute_similarity(text, blocked_keywords, allowed_keywords)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!("Similarity computation failed, not blocking: {}", e);
                SimilarityResult::neutral()
            }
        }
    }

    async fn try_compute_similarity<B, A>(
        &self,
        text: &str,
        blocked_keywords: &[B],
        allowed_keywords: &[A],
    ) -> Result<SimilarityResult, EmbeddingError>
    where
        B: AsRef<str>,
        A: AsRef<str>,
    {
        self.provider.initialize(logging_progress()).await?;

        let blocked_keywords = normalize_keywords(blocked_keywords);
        let allowed_keywords = normalize_keywords(allowed_keywords);

        let all_keywords = blocked_keywords
            .iter()
            .chain(&allowed_keywords)
            .collect_vec();
        self.cache.precompute(&self.provider, &all_keywords).await;

        let windows = create_sliding_windows(
            text,
            self.windowing.window_size,
            self.windowing.overlap,
        )?;
        if windows.is_empty() {
            debug!("No tokens to classify");
            return Ok(SimilarityResult::neutral());
        }

        let blocked_vectors = self.cache.lookup(&blocked_keywords);
        let allowed_vectors = self.cache.lookup(&allowed_keywords);

        let scores = aggregate(
            &self.provider,
            &windows,
            &blocked_vectors,
            &allowed_vectors,
        )
        .await?;

        let result = SimilarityResult::from_scores(scores.blocked, scores.allowed);
        info!(
            "Classified {} windows ({} processed): blocked {:.3}, allowed {:.3}, block = {}",
            scores.windows_total,
            scores.windows_processed,
            result.blocked_similarity,
            result.allowed_similarity,
            result.should_block
        );

        Ok(result)
    }

    #[inline]
    pub fn cached_keyword_count(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.provider.status(),
            model_id: self.provider.model_id().to_string(),
            cached_keywords: self.cache.len(),
            ready_since: self.provider.ready_since(),
        }
    }
}

/// Trim and lower-case keywords, dropping blanks and repeats while keeping order
#[inline]
pub fn normalize_keywords<S: AsRef<str>>(keywords: &[S]) -> Vec<String> {
    keywords
        .iter()
        .map(|keyword| keyword.as_ref().trim().to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .unique()
        .collect()
}
