// Embeddings module
// Text windowing, embedding backends and the provider lifecycle around them

pub mod hashing;
pub mod ollama;
pub mod provider;
pub mod similarity;
pub mod windowing;


use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use hashing::HashingBackend;
pub use ollama::OllamaBackend;
pub use provider::{EmbeddingProvider, ProviderStatus};
pub use similarity::cosine_similarity;
pub use windowing::{TextWindow, create_sliding_windows, tokenize};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    #[error("Model failed to load: {0}")]
    ModelLoad(String),
    #[error("Embedding model is not initialized")]
    ModelNotInitialized,
    #[error("Cannot embed empty input")]
    EmptyInput,
    #[error("Embedding backend returned a zero vector")]
    ZeroVector,
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Invalid window configuration: window size {window_size}, overlap {overlap}")]
    InvalidWindowConfig { window_size: usize, overlap: usize },
    #[error("Embedding backend failed: {0}")]
    Backend(String),
}

/// A unit-length embedding. Only constructible through [`EmbeddingVector::normalized`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// L2-normalizes `values`. Returns `None` for empty or zero-norm input.
    #[inline]
    pub fn normalized(mut values: Vec<f32>) -> Option<Self> {
        let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if values.is_empty() || !norm.is_finite() || norm < f32::EPSILON {
            return None;
        }

        for value in &mut values {
            *value /= norm;
        }

        Some(Self(values))
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.0.len()
    }
}

/// Progress reported while an embedding backend loads its resources
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum LoadProgress {
    Connecting {
        model: String,
    },
    Downloading {
        status: String,
        completed: Option<u64>,
        total: Option<u64>,
    },
    WarmingUp,
    Ready {
        dimension: usize,
    },
}

impl fmt::Display for LoadProgress {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { model } => write!(f, "connecting to backend for {}", model),
            Self::Downloading {
                status,
                completed: Some(completed),
                total: Some(total),
            } => write!(f, "{} ({}/{} bytes)", status, completed, total),
            Self::Downloading { status, .. } => write!(f, "{}", status),
            Self::WarmingUp => write!(f, "warming up model"),
            Self::Ready { dimension } => write!(f, "model ready ({} dimensions)", dimension),
        }
    }
}

/// Callback receiving [`LoadProgress`] events. Shared with the background load task.
pub type ProgressSink = Arc<dyn Fn(LoadProgress) + Send + Sync>;

/// A sink that discards every event
#[inline]
pub fn silent_progress() -> ProgressSink {
    Arc::new(|_| {})
}

/// A sink that forwards every event to `tracing`
#[inline]
pub fn logging_progress() -> ProgressSink {
    Arc::new(|progress| tracing::info!("Model load: {}", progress))
}

/// Something that turns text into raw (not necessarily normalized) vectors.
///
/// Backends are wrapped by [`EmbeddingProvider`], which owns the lifecycle,
/// normalization and dimension checks.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Identifier of the model this backend serves
    fn model_id(&self) -> &str;

    /// Whether `embed` may be called concurrently
    fn is_reentrant(&self) -> bool {
        true
    }

    /// Acquire whatever the backend needs before the first `embed` call
    async fn load(&self, progress: ProgressSink) -> Result<()>;

    /// Mean-pooled embedding for `text`
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
