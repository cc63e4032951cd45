//! Line-delimited JSON messages exchanged with the host process

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embeddings::ProviderStatus;
use crate::relevance::{EngineStatus, SimilarityResult};

/// One request line. `id` is echoed back untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    /// Keyword lists fall back to the configured defaults when omitted
    Classify {
        text: String,
        #[serde(default)]
        blocked_keywords: Option<Vec<String>>,
        #[serde(default)]
        allowed_keywords: Option<Vec<String>>,
    },
    Status,
    Initialize,
    Precompute {
        keywords: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(flatten)]
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ResponseBody {
    Classification {
        blocked_similarity: f32,
        allowed_similarity: f32,
        should_block: bool,
    },
    Status {
        state: String,
        error: Option<String>,
        model_id: String,
        cached_keywords: usize,
    },
    Error {
        message: String,
    },
}

impl Response {
    #[inline]
    pub fn new(id: Value, body: ResponseBody) -> Self {
        Self { id, body }
    }

    #[inline]
    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            body: ResponseBody::Error {
                message: message.into(),
            },
        }
    }
}

impl From<SimilarityResult> for ResponseBody {
    #[inline]
    fn from(result: SimilarityResult) -> Self {
        Self::Classification {
            blocked_similarity: result.blocked_similarity,
            allowed_similarity: result.allowed_similarity,
            should_block: result.should_block,
        }
    }
}

impl From<EngineStatus> for ResponseBody {
    #[inline]
    fn from(status: EngineStatus) -> Self {
        let error = match &status.state {
            ProviderStatus::Error(message) => Some(message.clone()),
            _ => None,
        };
        Self::Status {
            state: status.state.as_str().to_string(),
            error,
            model_id: status.model_id,
            cached_keywords: status.cached_keywords,
        }
    }
}

/// Parse one request line, or build the error response to send instead
#[inline]
pub fn parse_request(line: &str) -> Result<Envelope, Response> {
    let raw: Value = serde_json::from_str(line)
        .map_err(|e| Response::error(Value::Null, format!("Invalid JSON: {}", e)))?;

    let id = raw.get("id").cloned().unwrap_or(Value::Null);

    serde_json::from_value(raw)
        .map_err(|e| Response::error(id, format!("Invalid request: {}", e)))
}
