//! Host-facing server
//!
//! Reads one JSON request per line and answers with one JSON response per
//! line. Requests run concurrently, so responses may arrive out of order and
//! are matched by `id`. The loop ends at EOF once every request in flight
//! has been answered, or as soon as a response cannot be written.

pub mod protocol;


use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, KeywordsConfig};
use crate::embeddings::logging_progress;
use crate::relevance::{RelevanceEngine, SimilarityResult};

pub use protocol::{Envelope, Request, Response, ResponseBody, parse_request};

pub struct HostServer {
    engine: Arc<RelevanceEngine>,
    keywords: KeywordsConfig,
    request_timeout: Duration,
}

impl HostServer {
    #[inline]
    pub fn new(
        engine: Arc<RelevanceEngine>,
        keywords: KeywordsConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            keywords,
            request_timeout,
        }
    }

    #[inline]
    pub fn from_config(engine: Arc<RelevanceEngine>, config: &Config) -> Self {
        Self::new(
            engine,
            config.keywords.clone(),
            Duration::from_secs(config.server.request_timeout_secs),
        )
    }

    #[inline]
    pub fn engine(&self) -> &Arc<RelevanceEngine> {
        &self.engine
    }

    /// Load the model in the background and cache the default keywords
    #[inline]
    pub fn preload(self: &Arc<Self>) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(
            async move {
                info!("Preloading embedding model");
                server.warm_up().await;
            }
            .instrument(info_span!("preload")),
        )
    }

    async fn warm_up(&self) {
        match self.engine.initialize(logging_progress()).await {
            Ok(()) => {
                self.engine
                    .precompute_keyword_embeddings(&self.keywords.blocked)
                    .await;
                self.engine
                    .precompute_keyword_embeddings(&self.keywords.allowed)
                    .await;
            }
            Err(e) => warn!("Embedding model unavailable: {}", e),
        }
    }

    /// Start the server using stdio transport
    #[inline]
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        info!("Starting host server with stdio transport");

        let reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        self.serve(reader, &mut stdout).await?;

        info!("Host server stopped");
        Ok(())
    }

    /// Serve requests from `reader` until EOF, writing responses to `writer`
    #[inline]
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (responses, mut outbox) = mpsc::unbounded_channel::<Response>();

        let write = async move {
            while let Some(response) = outbox.recv().await {
                send_response(writer, &response).await?;
            }
            Ok::<(), anyhow::Error>(())
        };

        let read = async {
            self.read_requests(reader, responses).await;
            Ok::<(), anyhow::Error>(())
        };

        // A failed write drops the reader, so a dead host ends the loop
        tokio::try_join!(read, write)?;
        Ok(())
    }

    async fn read_requests<R>(self: Arc<Self>, mut reader: R, responses: mpsc::UnboundedSender<Response>)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut in_flight = JoinSet::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match parse_request(line) {
                        Ok(envelope) => {
                            let server = Arc::clone(&self);
                            let responses = responses.clone();
                            let span = info_span!("request", request_id = %Uuid::new_v4());
                            in_flight.spawn(
                                async move {
                                    let response = server.handle(envelope).await;
                                    if responses.send(response).is_err() {
                                        debug!("Response channel closed, dropping response");
                                    }
                                }
                                .instrument(span),
                            );
                        }
                        Err(response) => {
                            warn!("Rejected request line: {:?}", response.body);
                            if responses.send(response).is_err() {
                                debug!("Response channel closed, dropping response");
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            }

            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    error!("Request task failed: {}", e);
                }
            }
        }

        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                error!("Request task failed: {}", e);
            }
        }
    }

    /// Answer a single request
    #[inline]
    pub async fn handle(&self, envelope: Envelope) -> Response {
        let Envelope { id, request } = envelope;

        let body = match request {
            Request::Classify {
                text,
                blocked_keywords,
                allowed_keywords,
            } => {
                let blocked = blocked_keywords.unwrap_or_else(|| self.keywords.blocked.clone());
                let allowed = allowed_keywords.unwrap_or_else(|| self.keywords.allowed.clone());
                debug!(
                    "Classifying {} bytes against {} blocked and {} allowed keywords",
                    text.len(),
                    blocked.len(),
                    allowed.len()
                );
                self.classify(&text, &blocked, &allowed).await.into()
            }
            Request::Status => self.engine.status().into(),
            Request::Initialize => {
                self.warm_up().await;
                self.engine.status().into()
            }
            Request::Precompute { keywords } => {
                self.engine.precompute_keyword_embeddings(&keywords).await;
                self.engine.status().into()
            }
        };

        Response::new(id, body)
    }

    async fn classify(&self, text: &str, blocked: &[String], allowed: &[String]) -> SimilarityResult {
        let request = self
            .engine
            .compute_aggregated_similarity(text, blocked, allowed);

        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Classification exceeded {:?}, not blocking",
                    self.request_timeout
                );
                SimilarityResult::neutral()
            }
        }
    }
}

/// Send a response line to the host
async fn send_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
