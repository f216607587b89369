use thiserror::Error;

/// Failure of one pipeline handler invocation.
///
/// Out-of-scope entities are not errors; handlers report them as a skipped
/// outcome so the bus acks them.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Store, network or external API failure, including timeouts.
    #[error("{dependency} failed: {source}")]
    Transient {
        dependency: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Preconditions not met yet (e.g. the post has not been tagged).
    #[error("not yet ready: {0}")]
    NotYetReady(String),

    /// A collaborator broke its contract. Retrying will not help.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl PipelineError {
    pub fn transient(dependency: &'static str, err: impl Into<anyhow::Error>) -> Self {
        let err: anyhow::Error = err.into();
        Self::Transient {
            dependency,
            source: err.into(),
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotYetReady(reason.into())
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation(reason.into())
    }

    /// Whether redelivery can succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvariantViolation(_))
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
