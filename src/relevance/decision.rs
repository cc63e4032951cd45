//! Dual-threshold block policy

use serde::{Deserialize, Serialize};

/// Pooled blocked similarity must exceed this to block
pub const BLOCK_THRESHOLD: f32 = 0.30;
/// Pooled allowed similarity at or above this always allows
pub const ALLOW_THRESHOLD: f32 = 0.55;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResult {
    pub blocked_similarity: f32,
    pub allowed_similarity: f32,
    pub should_block: bool,
}

impl SimilarityResult {
    /// Answer used whenever the engine cannot produce a score
    #[inline]
    pub fn neutral() -> Self {
        Self {
            blocked_similarity: 0.0,
            allowed_similarity: 0.0,
            should_block: false,
        }
    }

    #[inline]
    pub fn from_scores(blocked_similarity: f32, allowed_similarity: f32) -> Self {
        Self {
            blocked_similarity,
            allowed_similarity,
            should_block: should_block(blocked_similarity, allowed_similarity),
        }
    }
}

impl Default for SimilarityResult {
    #[inline]
    fn default() -> Self {
        Self::neutral()
    }
}

#[inline]
pub fn should_block(blocked_similarity: f32, allowed_similarity: f32) -> bool {
    blocked_similarity > BLOCK_THRESHOLD && allowed_similarity < ALLOW_THRESHOLD
}
