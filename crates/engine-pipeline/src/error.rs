use connectors::error::ConnectorError;
use engine_core::state::StateError;
use std::time::Duration;
use thiserror::Error;

/// Job-fatal conditions. Per-record and per-batch failures never surface
/// here; they are retried or dead-lettered inside the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source stream failed: {0}")]
    Source(#[source] ConnectorError),

    #[error("destination setup failed: {0}")]
    SchemaSetup(#[source] ConnectorError),

    #[error("authorization failed: {0}")]
    Authorization(#[source] ConnectorError),

    #[error("circuit breaker stayed open past the wait budget of {budget:?}")]
    CircuitWaitBudget { budget: Duration },

    #[error("job timed out after {limit:?}")]
    JobTimeout { limit: Duration },

    #[error("checkpoint persistence failed: {0}")]
    State(#[from] StateError),

    #[error("pipeline channel closed unexpectedly")]
    ChannelClosed,
}
