use thiserror::Error;

use crate::config::ConfigError;
use crate::embeddings::EmbeddingError;

pub type Result<T> = std::result::Result<T, FocusError>;

#[derive(Error, Debug)]
pub enum FocusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod relevance;
pub mod server;
