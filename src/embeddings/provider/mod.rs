//! Embedding provider lifecycle
//!
//! Wraps an [`EmbeddingBackend`] behind an explicit state machine:
//! `Uninitialized → Loading → Ready`, `Loading → Error`, `Error → Loading`.
//! Loading is single-flight: the first caller spawns the load task and every
//! concurrent caller awaits the same shared future.

#[cfg(test)]
mod tests;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::embeddings::{
    EmbeddingBackend, EmbeddingError, EmbeddingVector, LoadProgress, ProgressSink,
};

/// Text embedded once after loading to force lazy initialization in the backend
const WARMUP_TEXT: &str = "warm up";

type SharedLoad = Shared<BoxFuture<'static, Result<usize, String>>>;

enum LifecycleState {
    Uninitialized,
    Loading(SharedLoad),
    Ready {
        dimension: usize,
        ready_at: DateTime<Utc>,
    },
    Error(String),
}

/// Snapshot of the provider lifecycle for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ProviderStatus {
    Uninitialized,
    Loading,
    Ready,
    Error(String),
}

impl ProviderStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error(_) => "error",
        }
    }
}

pub struct EmbeddingProvider {
    backend: Arc<dyn EmbeddingBackend>,
    state: Arc<Mutex<LifecycleState>>,
    /// Held around backend calls when the backend is not reentrant
    serial: Option<tokio::sync::Mutex<()>>,
}

impl EmbeddingProvider {
    #[inline]
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        let serial = (!backend.is_reentrant()).then(|| tokio::sync::Mutex::new(()));
        Self {
            backend,
            state: Arc::new(Mutex::new(LifecycleState::Uninitialized)),
            serial,
        }
    }

    #[inline]
    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    fn lock_state(state: &Mutex<LifecycleState>) -> MutexGuard<'_, LifecycleState> {
        state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the provider to `Ready`.
    ///
    /// Returns immediately when already ready. While a load is in flight the
    /// caller waits for it instead of starting another one. `progress` only
    /// receives events from a load this call starts.
    #[inline]
    pub async fn initialize(&self, progress: ProgressSink) -> Result<(), EmbeddingError> {
        let load = {
            let mut state = Self::lock_state(&self.state);
            match &*state {
                LifecycleState::Ready { .. } => return Ok(()),
                LifecycleState::Loading(load) => {
                    debug!("Model load already in flight, waiting for it");
                    load.clone()
                }
                LifecycleState::Uninitialized | LifecycleState::Error(_) => {
                    let load = self.spawn_load(progress);
                    *state = LifecycleState::Loading(load.clone());
                    load
                }
            }
        };

        load.await.map(|_| ()).map_err(EmbeddingError::ModelLoad)
    }

    fn spawn_load(&self, progress: ProgressSink) -> SharedLoad {
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let task_state = Arc::clone(&self.state);

        info!("Loading embedding model {}", backend.model_id());

        let task = tokio::spawn(async move {
            // A panicking backend or sink must still leave the loading state
            let outcome = AssertUnwindSafe(Self::load_backend(backend.as_ref(), &progress))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(format!("Model load panicked: {}", panic_message(panic.as_ref())))
                });

            let mut guard = Self::lock_state(&task_state);
            match &outcome {
                Ok(dimension) => {
                    info!(
                        "Embedding model {} ready ({} dimensions)",
                        backend.model_id(),
                        dimension
                    );
                    *guard = LifecycleState::Ready {
                        dimension: *dimension,
                        ready_at: Utc::now(),
                    };
                }
                Err(message) => {
                    error!(
                        "Embedding model {} failed to load: {}",
                        backend.model_id(),
                        message
                    );
                    *guard = LifecycleState::Error(message.clone());
                }
            }
            drop(guard);

            if let Ok(dimension) = outcome {
                progress(LoadProgress::Ready { dimension });
            }
            outcome
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = format!("Model load task failed: {}", e);
                    let mut guard = Self::lock_state(&state);
                    if matches!(&*guard, LifecycleState::Loading(_)) {
                        *guard = LifecycleState::Error(message.clone());
                    }
                    Err(message)
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn load_backend(
        backend: &dyn EmbeddingBackend,
        progress: &ProgressSink,
    ) -> Result<usize, String> {
        backend
            .load(Arc::clone(progress))
            .await
            .map_err(|e| format!("{:#}", e))?;

        progress(LoadProgress::WarmingUp);
        let warmup = backend
            .embed(WARMUP_TEXT)
            .await
            .map_err(|e| format!("Warm-up inference failed: {:#}", e))?;

        EmbeddingVector::normalized(warmup)
            .map(|vector| vector.dimension())
            .ok_or_else(|| "Warm-up inference returned an empty or zero vector".to_string())
    }

    /// Embed `text` into a unit vector.
    ///
    /// Fails with `ModelNotInitialized` unless the provider is ready and with
    /// `EmptyInput` for blank text.
    #[inline]
    pub async fn compute_embedding(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let expected = self
            .dimension()
            .ok_or(EmbeddingError::ModelNotInitialized)?;

        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let raw = {
            let _serial = match &self.serial {
                Some(lock) => Some(lock.lock().await),
                None => None,
            };
            self.backend
                .embed(text)
                .await
                .map_err(|e| EmbeddingError::Backend(format!("{:#}", e)))?
        };

        if raw.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: raw.len(),
            });
        }

        EmbeddingVector::normalized(raw).ok_or(EmbeddingError::ZeroVector)
    }

    /// Current lifecycle state. Never blocks on a load in flight.
    #[inline]
    pub fn status(&self) -> ProviderStatus {
        let state = Self::lock_state(&self.state);
        match &*state {
            LifecycleState::Uninitialized => ProviderStatus::Uninitialized,
            LifecycleState::Loading(_) => ProviderStatus::Loading,
            LifecycleState::Ready { .. } => ProviderStatus::Ready,
            LifecycleState::Error(message) => ProviderStatus::Error(message.clone()),
        }
    }

    /// Message of the failed load, if the provider is in the error state
    #[inline]
    pub fn last_error(&self) -> Option<String> {
        let state = Self::lock_state(&self.state);
        match &*state {
            LifecycleState::Error(message) => Some(message.clone()),
            _ => None,
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        let state = Self::lock_state(&self.state);
        matches!(&*state, LifecycleState::Ready { .. })
    }

    /// Output width of the backend, known once ready
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        let state = Self::lock_state(&self.state);
        match &*state {
            LifecycleState::Ready { dimension, .. } => Some(*dimension),
            _ => None,
        }
    }

    /// When the provider last became ready
    #[inline]
    pub fn ready_since(&self) -> Option<DateTime<Utc>> {
        let state = Self::lock_state(&self.state);
        match &*state {
            LifecycleState::Ready { ready_at, .. } => Some(*ready_at),
            _ => None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
