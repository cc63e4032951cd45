#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end tests with the offline hashing backend, from a config file on
// disk through the engine and the host protocol.

use std::collections::HashMap;
use std::sync::Arc;

use focusgate::config::{BackendKind, Config};
use focusgate::embeddings::ProviderStatus;
use focusgate::embeddings::windowing::create_sliding_windows;
use focusgate::relevance::{RelevanceEngine, SimilarityResult};
use focusgate::server::HostServer;
use serde_json::{Value, json};
use tempfile::TempDir;
use tracing::info;

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok(); // Ignore error if already initialized
}

const CONFIG_TOML: &str = r#"
[backend]
kind = "hashing"

[hashing]
dimension = 384

[windowing]
window_size = 10
overlap = 2

[keywords]
blocked = ["casino", "poker"]
allowed = ["rust", "compiler"]

[server]
request_timeout_secs = 10
preload = false
"#;

fn load_config() -> (TempDir, Config) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join("config.toml"), CONFIG_TOML)
        .expect("should write config");
    let config = Config::load_from(temp_dir.path()).expect("config loads");
    (temp_dir, config)
}

fn repeat_words(word: &str, count: usize) -> String {
    vec![word; count].join(" ")
}

#[tokio::test]
async fn config_file_drives_the_engine() {
    init_test_tracing();

    let (_temp_dir, config) = load_config();
    assert_eq!(config.backend.kind, BackendKind::Hashing);
    assert_eq!(config.windowing.window_size, 10);

    let engine = RelevanceEngine::from_config(&config).expect("engine builds");
    assert_eq!(engine.windowing(), config.windowing);

    let result = engine
        .compute_aggregated_similarity(
            "Casino poker casino poker",
            &config.keywords.blocked,
            &config.keywords.allowed,
        )
        .await;
    info!("Gambling page: {:?}", result);

    assert!(result.should_block);
    assert!((result.blocked_similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    assert_eq!(result.allowed_similarity, 0.0);

    let status = engine.status();
    assert_eq!(status.state, ProviderStatus::Ready);
    assert_eq!(status.model_id, "hashing-384");
    assert_eq!(status.cached_keywords, 4);
    assert!(status.ready_since.is_some());
}

#[tokio::test]
async fn long_productive_document_is_not_blocked() {
    init_test_tracing();

    let (_temp_dir, config) = load_config();
    let engine = RelevanceEngine::from_config(&config).expect("engine builds");

    // A short gambling aside in an otherwise technical page
    let text = format!(
        "{} {} {}",
        repeat_words("rust compiler", 20),
        repeat_words("casino", 5),
        repeat_words("rust compiler", 20)
    );
    let windows = create_sliding_windows(&text, 10, 2).expect("valid windowing");
    assert!(windows.len() > 4);

    let result = engine
        .compute_aggregated_similarity(&text, &config.keywords.blocked, &config.keywords.allowed)
        .await;
    info!("Technical page: {:?}", result);

    assert!(!result.should_block);
    assert!(result.allowed_similarity > 0.55);
    assert!(result.blocked_similarity < result.allowed_similarity);
}

#[tokio::test]
async fn unrelated_text_stays_neutral() {
    let (_temp_dir, config) = load_config();
    let engine = RelevanceEngine::from_config(&config).expect("engine builds");

    let result = engine
        .compute_aggregated_similarity(
            "gardening tips for spring",
            &config.keywords.blocked,
            &config.keywords.allowed,
        )
        .await;

    assert_eq!(result, SimilarityResult::neutral());

    let empty = engine
        .compute_aggregated_similarity("   \n\t ", &config.keywords.blocked, &config.keywords.allowed)
        .await;
    assert_eq!(empty, SimilarityResult::neutral());
}

#[tokio::test]
async fn host_session_over_the_protocol() {
    init_test_tracing();

    let (_temp_dir, config) = load_config();
    let engine = Arc::new(RelevanceEngine::from_config(&config).expect("engine builds"));
    let server = Arc::new(HostServer::from_config(engine, &config));

    let requests = [
        json!({ "id": "status", "type": "status" }),
        json!({ "id": "init", "type": "initialize" }),
        json!({ "id": "gambling", "type": "classify", "text": "casino poker casino poker" }),
        json!({ "id": "docs", "type": "classify", "text": "rust compiler rust compiler" }),
        json!({
            "id": "custom",
            "type": "classify",
            "text": "casino poker casino poker",
            "blockedKeywords": [],
            "allowedKeywords": ["poker"]
        }),
    ];
    let input = requests
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");

    let mut output = Vec::new();
    Arc::clone(&server)
        .serve(input.as_bytes(), &mut output)
        .await
        .expect("serve succeeds");

    let responses: HashMap<String, Value> = String::from_utf8(output)
        .expect("utf-8 output")
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).expect("every response line is JSON"))
        .map(|response| {
            let id = response["id"].as_str().expect("string id").to_string();
            (id, response)
        })
        .collect();

    assert_eq!(responses.len(), requests.len());
    assert_eq!(responses["status"]["type"], "status");
    assert_eq!(responses["init"]["state"], "ready");
    assert_eq!(responses["gambling"]["shouldBlock"], true);
    assert_eq!(responses["docs"]["shouldBlock"], false);
    assert!(responses["docs"]["allowedSimilarity"].as_f64().expect("number") > 0.7);

    let custom = &responses["custom"];
    assert_eq!(custom["blockedSimilarity"].as_f64(), Some(0.0));
    assert_eq!(custom["shouldBlock"], false);
    assert!(custom["allowedSimilarity"].as_f64().expect("number") > 0.7);

    let status = server.engine().status();
    assert_eq!(status.state, ProviderStatus::Ready);
    assert_eq!(status.cached_keywords, 4);
}
