use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced to callers of the engine.
///
/// Data absence (no preference vector, no index bucket, no similar users) is
/// never an error: it is signaled in-band and resolved by the fallback chain.
/// Dependency failures inside a request degrade to the next signal; only
/// malformed requests and store failures propagate.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Dependency failure: {0}")]
    Dependency(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidRequest(msg.into())
    }
}
