use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the pipeline core.
///
/// Only `Setup` and `Config` are fatal; everything else drops a single frame
/// and the pipeline carries on with the next one.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("buffer pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("transform failed: {0}")]
    TransformFailure(String),

    #[error("pipeline setup failed: {0}")]
    Setup(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("pipeline is not running")]
    Stopped,

    #[error("display sink failed: {0}")]
    Sink(String),
}

impl PipelineError {
    /// Whether the pipeline can keep accepting frames after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidFrame(_)
                | Self::PoolExhausted { .. }
                | Self::TransformFailure(_)
                | Self::Sink(_)
        )
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
