//! Multi-window similarity aggregation
//!
//! Each window is embedded and scored against the cached keyword vectors.
//! Per-window scores are pooled with a descending 75th-percentile so one
//! off-topic sidebar neither blocks nor rescues a whole page.

use itertools::Itertools;
use tracing::debug;

use crate::embeddings::{
    EmbeddingError, EmbeddingProvider, EmbeddingVector, TextWindow, cosine_similarity,
};

/// Blocked score of the current window that stops processing early
pub const EARLY_EXIT_THRESHOLD: f32 = 0.85;
/// Fraction of the descending-sorted scores skipped before picking the pooled one
pub const POOLING_PERCENTILE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedScores {
    pub blocked: f32,
    pub allowed: f32,
    pub windows_processed: usize,
    pub windows_total: usize,
}

impl AggregatedScores {
    #[inline]
    pub fn exited_early(&self) -> bool {
        self.windows_processed < self.windows_total
    }
}

/// Score `windows` in order against both keyword sets.
///
/// Processing stops once at least half the windows are done and the window
/// just scored is strongly blocked. A window embedding to the zero vector
/// scores 0 on both sides; any other embedding failure aborts the whole
/// aggregation.
#[inline]
pub async fn aggregate(
    provider: &EmbeddingProvider,
    windows: &[TextWindow],
    blocked_keywords: &[EmbeddingVector],
    allowed_keywords: &[EmbeddingVector],
) -> Result<AggregatedScores, EmbeddingError> {
    let windows_total = windows.len();
    let early_exit_after = windows_total.div_ceil(2);

    let mut blocked_scores = Vec::with_capacity(windows_total);
    let mut allowed_scores = Vec::with_capacity(windows_total);

    for window in windows {
        let (blocked, allowed) = match provider.compute_embedding(&window.text).await {
            Ok(embedding) => (
                max_similarity(&embedding, blocked_keywords)?,
                max_similarity(&embedding, allowed_keywords)?,
            ),
            // Nothing embeddable in the window, e.g. a separator row
            Err(EmbeddingError::ZeroVector) => (0.0, 0.0),
            Err(e) => return Err(e),
        };
        blocked_scores.push(blocked);
        allowed_scores.push(allowed);

        debug!(
            "Window [{}, {}): blocked {:.3}, allowed {:.3}",
            window.start_index, window.end_index, blocked, allowed
        );

        if blocked_scores.len() >= early_exit_after && blocked > EARLY_EXIT_THRESHOLD {
            debug!(
                "Early exit after {}/{} windows (blocked {:.3})",
                blocked_scores.len(),
                windows_total,
                blocked
            );
            break;
        }
    }

    Ok(AggregatedScores {
        blocked: pool_scores(&blocked_scores),
        allowed: pool_scores(&allowed_scores),
        windows_processed: blocked_scores.len(),
        windows_total,
    })
}

/// Best match of `embedding` among `keywords`, 0 when there are none
fn max_similarity(
    embedding: &EmbeddingVector,
    keywords: &[EmbeddingVector],
) -> Result<f32, EmbeddingError> {
    keywords.iter().try_fold(0.0_f32, |best, keyword| {
        cosine_similarity(embedding.as_slice(), keyword.as_slice()).map(|score| best.max(score))
    })
}

/// Pick the score at index `floor(len * 0.25)` of the descending order.
///
/// Empty input pools to 0; a single score is returned unchanged.
#[inline]
pub fn pool_scores(scores: &[f32]) -> f32 {
    let sorted = scores
        .iter()
        .copied()
        .sorted_by(|a, b| b.total_cmp(a))
        .collect_vec();

    let index = (sorted.len() as f64 * POOLING_PERCENTILE).floor() as usize;

    sorted.get(index).copied().unwrap_or(0.0)
}
