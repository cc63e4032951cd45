use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::config::Config;
use crate::embeddings::{LoadProgress, ProgressSink, ProviderStatus};
use crate::relevance::{RelevanceEngine, SimilarityResult};
use crate::server::HostServer;

/// Spinner on stderr while the model loads, hidden when nobody is watching
#[inline]
pub fn load_progress_bar() -> ProgressBar {
    if console::user_attended_stderr() {
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = ProgressBar::new_spinner().with_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    }
}

/// Render load progress events on `bar`
#[inline]
pub fn bar_progress(bar: &ProgressBar) -> ProgressSink {
    let bar = bar.clone();
    Arc::new(move |event: LoadProgress| {
        if let LoadProgress::Downloading {
            completed: Some(completed),
            total: Some(total),
            ..
        } = &event
        {
            bar.set_length(*total);
            bar.set_position(*completed);
        }
        bar.set_message(event.to_string());
    })
}

/// Load the model, reporting progress on stderr
async fn initialize_engine(engine: &RelevanceEngine) -> Result<()> {
    let bar = load_progress_bar();
    let outcome = engine.initialize(bar_progress(&bar)).await;
    bar.finish_and_clear();
    outcome.context("Failed to load embedding model")
}

/// Classify `text` with the engine described by `config`.
///
/// Keyword lists default to the configured ones. A model that cannot load
/// yields the neutral result, as it would for the host.
#[inline]
pub async fn classify_text(
    config: &Config,
    text: &str,
    blocked: Option<Vec<String>>,
    allowed: Option<Vec<String>>,
) -> Result<SimilarityResult> {
    let engine = RelevanceEngine::from_config(config).context("Failed to create engine")?;

    if let Err(e) = initialize_engine(&engine).await {
        warn!("{:#}", e);
    }

    let blocked = blocked.unwrap_or_else(|| config.keywords.blocked.clone());
    let allowed = allowed.unwrap_or_else(|| config.keywords.allowed.clone());

    Ok(engine
        .compute_aggregated_similarity(text, &blocked, &allowed)
        .await)
}

/// Read the text to classify from the argument, a file, or stdin
#[inline]
pub async fn read_input(text: Option<String>, file: Option<&Path>) -> Result<String> {
    match (text, file) {
        (Some(_), Some(_)) => bail!("Pass either TEXT or --file, not both"),
        (Some(text), None) => Ok(text),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .context("Failed to read text from stdin")?;
            Ok(buffer)
        }
    }
}

/// One-shot classification, printing the result as JSON on stdout
#[inline]
pub async fn classify(
    text: Option<String>,
    file: Option<&Path>,
    blocked: Option<Vec<String>>,
    allowed: Option<Vec<String>>,
) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let text = read_input(text, file).await?;

    let result = classify_text(&config, &text, blocked, allowed).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize result")?
    );
    Ok(())
}

/// Load the configured model and report the engine state
#[inline]
pub async fn show_status() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let engine = RelevanceEngine::from_config(&config).context("Failed to create engine")?;

    println!("{}", style("📊 FocusGate Status Report").bold().cyan());
    println!("{}", "=".repeat(50));
    println!();

    let load = initialize_engine(&engine).await;
    if load.is_ok() {
        engine
            .precompute_keyword_embeddings(&config.keywords.blocked)
            .await;
        engine
            .precompute_keyword_embeddings(&config.keywords.allowed)
            .await;
    }

    let status = engine.status();
    println!("🤖 Embedding Model:");
    println!("   Model: {}", style(&status.model_id).cyan());
    match &status.state {
        ProviderStatus::Ready => {
            println!("   ✅ State: {}", style("ready").green());
            if let Some(dimension) = engine.provider().dimension() {
                println!("   🔢 Dimensions: {}", dimension);
            }
            if let Some(ready_since) = status.ready_since {
                println!("   🕒 Ready since: {}", ready_since.to_rfc3339());
            }
        }
        ProviderStatus::Error(message) => {
            println!("   ❌ State: {} - {}", style("error").red(), message);
        }
        state => {
            println!("   ⚠️  State: {}", style(state.as_str()).yellow());
        }
    }

    println!();
    println!("🔑 Keywords:");
    println!(
        "   Blocked: {} configured, Allowed: {} configured",
        config.keywords.blocked.len(),
        config.keywords.allowed.len()
    );
    println!("   Cached embeddings: {}", status.cached_keywords);

    println!();
    println!("🪟 Windowing:");
    println!(
        "   {} tokens per window, {} overlap",
        config.windowing.window_size, config.windowing.overlap
    );

    load
}

/// Run the host protocol on stdio
#[inline]
pub async fn serve() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let engine = RelevanceEngine::from_config(&config).context("Failed to create engine")?;

    let server = Arc::new(HostServer::from_config(Arc::new(engine), &config));

    if config.server.preload {
        // Detached; requests arriving meanwhile join the same load
        drop(server.preload());
    } else {
        info!("Model preload disabled, loading on first request");
    }

    server.serve_stdio().await
}
