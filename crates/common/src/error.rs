use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed address {input:?}: {reason}")]
    Lookup { input: String, reason: String },

    #[error("counter store error: {0}")]
    Store(String),

    #[error("counter store timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("counter store holds a non-integer value for key {key}")]
    NotInteger { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LimitError {
    /// True for failures talking to the counter store. These are always
    /// handled fail-open by the engine.
    pub fn is_store(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::StoreTimeout(_) | Self::NotInteger { .. }
        )
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type LimitResult<T> = Result<T, LimitError>;
