
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::OllamaConfig;
use crate::embeddings::{EmbeddingBackend, LoadProgress, ProgressSink};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking HTTP client for an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PullStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            agent: Self::build_agent(Duration::from_secs(config.timeout_seconds)),
            retry_attempts: config.retry_attempts.max(1),
            retry_base_delay: Duration::from_secs(1),
        })
    }

    fn build_agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into()
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = Self::build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay of the exponential backoff between retries
    #[inline]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        debug!("Server ping successful");
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Whether the configured model is present on the server.
    ///
    /// A model configured without a tag matches its `:latest` variant.
    #[inline]
    pub fn has_model(&self) -> Result<bool> {
        let models = self.list_models()?;
        let tagged = format!("{}:latest", self.model);

        let found = models
            .iter()
            .any(|m| m.name == self.model || m.name == tagged);

        if !found {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
        }

        Ok(found)
    }

    /// Download the configured model, forwarding streamed status lines to `on_status`
    #[inline]
    pub fn pull_model<F>(&self, mut on_status: F) -> Result<()>
    where
        F: FnMut(String, Option<u64>, Option<u64>),
    {
        let url = self
            .base_url
            .join("/api/pull")
            .context("Failed to build pull URL")?;

        info!("Pulling model {} from {}", self.model, self.base_url);

        let request_json = serde_json::to_string(&PullRequest {
            model: &self.model,
            stream: true,
        })
        .context("Failed to serialize pull request")?;

        // Downloads can take far longer than a regular request
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(None)
            .build()
            .into();

        let response = agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .map_err(|e| anyhow!("Failed to start model pull: {}", e))?;

        let reader = BufReader::new(response.into_body().into_reader());
        let mut succeeded = false;

        for line in reader.lines() {
            let line = line.context("Failed to read pull progress")?;
            if line.trim().is_empty() {
                continue;
            }

            let update: PullStatus =
                serde_json::from_str(&line).context("Failed to parse pull progress")?;

            if let Some(error) = update.error {
                bail!("Model pull failed: {}", error);
            }

            if let Some(status) = update.status {
                succeeded = status == "success";
                on_status(status, update.completed, update.total);
            }
        }

        if !succeeded {
            bail!("Model pull for {} ended without success", self.model);
        }

        info!("Model {} pulled successfully", self.model);
        Ok(())
    }

    /// Generate the embedding of a single text
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: text,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embedding")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        let embedding = embed_response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Ollama returned no embedding"))?;

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = self.retry_base_delay
                            * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) as u32;
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
    }
}

/// [`EmbeddingBackend`] served by an Ollama model
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Arc<OllamaClient>,
    pull_missing_model: bool,
}

impl OllamaBackend {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        Ok(Self::from_client(
            OllamaClient::new(config)?,
            config.pull_missing_model,
        ))
    }

    #[inline]
    pub fn from_client(client: OllamaClient, pull_missing_model: bool) -> Self {
        Self {
            client: Arc::new(client),
            pull_missing_model,
        }
    }

    fn load_blocking(client: &OllamaClient, pull_missing: bool, progress: &ProgressSink) -> Result<()> {
        progress(LoadProgress::Connecting {
            model: client.model().to_string(),
        });

        client.ping().context("Server ping failed")?;

        if client.has_model().context("Model validation failed")? {
            return Ok(());
        }

        if !pull_missing {
            bail!(
                "Model '{}' is not available on {} and pulling is disabled",
                client.model(),
                client.base_url()
            );
        }

        client.pull_model(|status, completed, total| {
            progress(LoadProgress::Downloading {
                status,
                completed,
                total,
            });
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    #[inline]
    fn model_id(&self) -> &str {
        self.client.model()
    }

    #[inline]
    async fn load(&self, progress: ProgressSink) -> Result<()> {
        let client = Arc::clone(&self.client);
        let pull_missing = self.pull_missing_model;

        tokio::task::spawn_blocking(move || Self::load_blocking(&client, pull_missing, &progress))
            .await
            .context("Ollama load task panicked")?
    }

    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let client = Arc::clone(&self.client);
        let text = text.to_string();

        tokio::task::spawn_blocking(move || client.generate_embedding(&text))
            .await
            .context("Ollama embedding task panicked")?
    }
}
