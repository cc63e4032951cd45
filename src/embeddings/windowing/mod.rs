
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embeddings::EmbeddingError;

/// Tokens per window used by the relevance engine
pub const DEFAULT_WINDOW_SIZE: usize = 512;
/// Tokens shared by consecutive windows
pub const DEFAULT_WINDOW_OVERLAP: usize = 128;
/// A trailing slice shorter than this fraction of the window size is dropped
const MIN_TRAILING_WINDOW_FRACTION: f64 = 0.25;

/// A contiguous span of tokens taken from a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    /// The space-joined tokens of this window
    pub text: String,
    /// Index of the first token in the tokenized document
    pub start_index: usize,
    /// One past the index of the last token
    pub end_index: usize,
}

impl TextWindow {
    #[inline]
    pub fn token_count(&self) -> usize {
        self.end_index - self.start_index
    }
}

/// Window sizing used when splitting documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowingConfig {
    pub window_size: usize,
    pub overlap: usize,
}

impl Default for WindowingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            overlap: DEFAULT_WINDOW_OVERLAP,
        }
    }
}

impl WindowingConfig {
    /// Distance between the starts of consecutive windows.
    ///
    /// Fails for a zero window size or an overlap that is not smaller than it.
    #[inline]
    pub fn stride(&self) -> Result<usize, EmbeddingError> {
        if self.window_size == 0 || self.overlap >= self.window_size {
            return Err(EmbeddingError::InvalidWindowConfig {
                window_size: self.window_size,
                overlap: self.overlap,
            });
        }
        Ok(self.window_size - self.overlap)
    }
}

/// Lower-case `text` and split it on whitespace runs
#[inline]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Split `text` into overlapping windows of at most `window_size` tokens.
///
/// Text that fits in one window yields exactly one window; text with no
/// tokens yields none.
#[inline]
pub fn create_sliding_windows(
    text: &str,
    window_size: usize,
    overlap: usize,
) -> Result<Vec<TextWindow>, EmbeddingError> {
    let stride = WindowingConfig {
        window_size,
        overlap,
    }
    .stride()?;

    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    if tokens.len() <= window_size {
        return Ok(vec![TextWindow {
            text: tokens.join(" "),
            start_index: 0,
            end_index: tokens.len(),
        }]);
    }

    let min_trailing = window_size as f64 * MIN_TRAILING_WINDOW_FRACTION;
    let mut windows = Vec::new();
    let mut start = 0;

    while start < tokens.len() {
        let end = (start + window_size).min(tokens.len());
        let slice = &tokens[start..end];

        if !windows.is_empty() && (slice.len() as f64) < min_trailing {
            break;
        }

        windows.push(TextWindow {
            text: slice.join(" "),
            start_index: start,
            end_index: end,
        });

        if end == tokens.len() {
            break;
        }
        start += stride;
    }

    debug!(
        "Split {} tokens into {} windows (size {}, overlap {})",
        tokens.len(),
        windows.len(),
        window_size,
        overlap
    );

    Ok(windows)
}
