//! Cosine similarity clamped to `[0, 1]`.

use crate::embeddings::EmbeddingError;

/// Cosine similarity between `a` and `b`, clamped into `[0, 1]`.
///
/// Negative similarity maps to 0. A zero-norm input yields 0 rather than an error.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, EmbeddingError> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(dot, na, nb), (x, y)| {
            (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb))
        });

    let norm_product = norm_a.sqrt() * norm_b.sqrt();
    if norm_product == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / norm_product).clamp(0.0, 1.0))
}
