use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Notify;

use super::*;
use crate::embeddings::silent_progress;

/// Backend whose load can be held open and made to fail on demand
struct ScriptedBackend {
    loads: AtomicUsize,
    fail_next_load: AtomicBool,
    panic_next_load: AtomicBool,
    gate: Option<Arc<Notify>>,
    reentrant: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    output: Mutex<Vec<f32>>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            fail_next_load: AtomicBool::new(false),
            panic_next_load: AtomicBool::new(false),
            gate: None,
            reentrant: true,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            output: Mutex::new(vec![3.0, 4.0, 0.0]),
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    fn failing() -> Self {
        let backend = Self::new();
        backend.fail_next_load.store(true, Ordering::SeqCst);
        backend
    }

    fn panicking() -> Self {
        let backend = Self::new();
        backend.panic_next_load.store(true, Ordering::SeqCst);
        backend
    }
}

#[async_trait]
impl EmbeddingBackend for ScriptedBackend {
    fn model_id(&self) -> &str {
        "scripted"
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    async fn load(&self, _progress: ProgressSink) -> Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        } else {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(
            !self.panic_next_load.swap(false, Ordering::SeqCst),
            "tokenizer exploded"
        );
        if self.fail_next_load.swap(false, Ordering::SeqCst) {
            bail!("weights not found");
        }
        Ok(())
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.output.lock().expect("output lock").clone())
    }
}

fn provider_with(backend: &Arc<ScriptedBackend>) -> EmbeddingProvider {
    EmbeddingProvider::new(Arc::clone(backend) as Arc<dyn EmbeddingBackend>)
}

#[tokio::test]
async fn starts_uninitialized() {
    let provider = provider_with(&Arc::new(ScriptedBackend::new()));

    assert_eq!(provider.status(), ProviderStatus::Uninitialized);
    assert_eq!(provider.last_error(), None);
    assert_eq!(provider.dimension(), None);
    assert!(!provider.is_ready());
}

#[tokio::test]
async fn initialize_reaches_ready() {
    let provider = provider_with(&Arc::new(ScriptedBackend::new()));

    provider
        .initialize(silent_progress())
        .await
        .expect("load succeeds");

    assert_eq!(provider.status(), ProviderStatus::Ready);
    assert_eq!(provider.dimension(), Some(3));
    assert!(provider.ready_since().is_some());
}

#[tokio::test]
async fn initialize_when_ready_is_a_no_op() {
    let backend = Arc::new(ScriptedBackend::new());
    let provider = provider_with(&backend);

    provider.initialize(silent_progress()).await.expect("first load");
    provider.initialize(silent_progress()).await.expect("no-op");

    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initialize_loads_once() {
    let backend = Arc::new(ScriptedBackend::new());
    let provider = Arc::new(provider_with(&backend));

    let callers = (0..8).map(|_| {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { provider.initialize(silent_progress()).await })
    });

    for result in join_all(callers).await {
        result.expect("task joins").expect("every caller sees success");
    }

    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    assert_eq!(provider.status(), ProviderStatus::Ready);
}

#[tokio::test]
async fn status_reports_loading_while_in_flight() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(ScriptedBackend::gated(Arc::clone(&gate)));
    let provider = Arc::new(provider_with(&backend));

    let first = {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { provider.initialize(silent_progress()).await })
    };
    let second = {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { provider.initialize(silent_progress()).await })
    };

    while backend.loads.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(provider.status(), ProviderStatus::Loading);

    gate.notify_one();

    first.await.expect("joins").expect("first caller succeeds");
    second.await.expect("joins").expect("second caller succeeds");
    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    assert_eq!(provider.status(), ProviderStatus::Ready);
}

#[tokio::test]
async fn failed_load_records_error_and_can_retry() {
    let backend = Arc::new(ScriptedBackend::failing());
    let provider = provider_with(&backend);

    let error = provider
        .initialize(silent_progress())
        .await
        .expect_err("first load fails");
    assert!(matches!(error, EmbeddingError::ModelLoad(ref message) if message.contains("weights not found")));
    assert!(matches!(provider.status(), ProviderStatus::Error(_)));
    assert!(
        provider
            .last_error()
            .is_some_and(|message| message.contains("weights not found"))
    );

    provider
        .initialize(silent_progress())
        .await
        .expect("retry succeeds");

    assert_eq!(provider.status(), ProviderStatus::Ready);
    assert_eq!(provider.last_error(), None);
    assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panicking_load_records_error_and_can_retry() {
    let backend = Arc::new(ScriptedBackend::panicking());
    let provider = provider_with(&backend);

    let error = provider
        .initialize(silent_progress())
        .await
        .expect_err("panicking load fails");
    assert!(matches!(error, EmbeddingError::ModelLoad(ref message) if message.contains("tokenizer exploded")));
    assert!(matches!(provider.status(), ProviderStatus::Error(_)));

    provider
        .initialize(silent_progress())
        .await
        .expect("retry succeeds");

    assert_eq!(provider.status(), ProviderStatus::Ready);
    assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panicking_progress_sink_records_error() {
    let backend = Arc::new(ScriptedBackend::new());
    let provider = provider_with(&backend);
    let exploding: ProgressSink = Arc::new(|_: LoadProgress| panic!("host went away"));

    let error = provider
        .initialize(exploding)
        .await
        .expect_err("load fails with the sink");
    assert!(matches!(error, EmbeddingError::ModelLoad(ref message) if message.contains("host went away")));
    assert!(
        provider
            .last_error()
            .is_some_and(|message| message.contains("host went away"))
    );

    provider
        .initialize(silent_progress())
        .await
        .expect("retry with a working sink succeeds");
    assert_eq!(provider.status(), ProviderStatus::Ready);
}

#[tokio::test]
async fn progress_reports_warm_up_and_ready() {
    let provider = provider_with(&Arc::new(ScriptedBackend::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&events);

    provider
        .initialize(Arc::new(move |event| {
            captured.lock().expect("events lock").push(event);
        }))
        .await
        .expect("load succeeds");

    let events = events.lock().expect("events lock");
    assert_eq!(
        *events,
        vec![LoadProgress::WarmingUp, LoadProgress::Ready { dimension: 3 }]
    );
}

#[tokio::test]
async fn compute_before_initialize_fails() {
    let provider = provider_with(&Arc::new(ScriptedBackend::new()));

    let result = provider.compute_embedding("social media").await;
    assert_eq!(result, Err(EmbeddingError::ModelNotInitialized));
}

#[tokio::test]
async fn compute_rejects_blank_input() {
    let provider = provider_with(&Arc::new(ScriptedBackend::new()));
    provider.initialize(silent_progress()).await.expect("load");

    assert_eq!(
        provider.compute_embedding("").await,
        Err(EmbeddingError::EmptyInput)
    );
    assert_eq!(
        provider.compute_embedding(" \n\t ").await,
        Err(EmbeddingError::EmptyInput)
    );
}

#[tokio::test]
async fn compute_returns_unit_vector() {
    let provider = provider_with(&Arc::new(ScriptedBackend::new()));
    provider.initialize(silent_progress()).await.expect("load");

    let vector = provider
        .compute_embedding("news")
        .await
        .expect("embedding succeeds");

    assert_eq!(vector.dimension(), 3);
    let norm = vector.as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
    assert!((vector.as_slice()[0] - 0.6).abs() < 1e-5);
}

#[tokio::test]
async fn compute_detects_dimension_change() {
    let backend = Arc::new(ScriptedBackend::new());
    let provider = provider_with(&backend);
    provider.initialize(silent_progress()).await.expect("load");

    *backend.output.lock().expect("output lock") = vec![1.0, 0.0];

    assert_eq!(
        provider.compute_embedding("news").await,
        Err(EmbeddingError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    );
}

#[tokio::test]
async fn zero_vector_is_reported_as_such() {
    let backend = Arc::new(ScriptedBackend::new());
    let provider = provider_with(&backend);
    provider.initialize(silent_progress()).await.expect("load");

    *backend.output.lock().expect("output lock") = vec![0.0, 0.0, 0.0];

    assert!(matches!(
        provider.compute_embedding("news").await,
        Err(EmbeddingError::ZeroVector)
    ));
}

#[tokio::test]
async fn zero_warmup_vector_fails_load() {
    let backend = Arc::new(ScriptedBackend::new());
    *backend.output.lock().expect("output lock") = vec![0.0, 0.0];
    let provider = provider_with(&backend);

    assert!(provider.initialize(silent_progress()).await.is_err());
    assert!(matches!(provider.status(), ProviderStatus::Error(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_reentrant_backend_is_serialized() {
    let backend = Arc::new(ScriptedBackend {
        reentrant: false,
        ..ScriptedBackend::new()
    });
    let provider = Arc::new(provider_with(&backend));
    provider.initialize(silent_progress()).await.expect("load");

    let calls = (0..8).map(|i| {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { provider.compute_embedding(&format!("text {}", i)).await })
    });

    for result in join_all(calls).await {
        result.expect("task joins").expect("embedding succeeds");
    }

    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn status_serialization() {
    assert_eq!(
        serde_json::to_value(ProviderStatus::Ready).expect("serializes"),
        serde_json::json!({ "state": "ready" })
    );
    assert_eq!(
        serde_json::to_value(ProviderStatus::Error("boom".to_string())).expect("serializes"),
        serde_json::json!({ "state": "error", "message": "boom" })
    );
    assert_eq!(ProviderStatus::Loading.as_str(), "loading");
}
