//! Offline embedding backend based on feature hashing.
//!
//! Every token is hashed into one of `dimension` buckets with a sign taken
//! from the hash, so texts sharing vocabulary point in similar directions.
//! There is no semantic generalization: synonyms do not match. It exists
//! for machines without a model server and for deterministic tests.

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::embeddings::windowing::tokenize;
use crate::embeddings::{EmbeddingBackend, LoadProgress, ProgressSink};

pub const DEFAULT_HASHING_DIMENSION: usize = 384;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct HashingBackend {
    dimension: usize,
    model_id: String,
}

impl HashingBackend {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("hashing-{}", dimension),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn fnv1a(token: &str) -> u64 {
        token.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        let tokens = tokenize(text);

        for token in &tokens {
            let trimmed = token.trim_matches(|c: char| !c.is_alphanumeric());
            if trimmed.is_empty() {
                continue;
            }
            let hash = Self::fnv1a(trimmed);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        if !tokens.is_empty() {
            let count = tokens.len() as f32;
            for value in &mut vector {
                *value /= count;
            }
        }

        vector
    }
}

impl Default for HashingBackend {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model_id
    }

    #[inline]
    async fn load(&self, progress: ProgressSink) -> Result<()> {
        if self.dimension == 0 {
            bail!("Hashing backend dimension must be greater than 0");
        }
        progress(LoadProgress::Connecting {
            model: self.model_id.clone(),
        });
        Ok(())
    }

    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }
}
