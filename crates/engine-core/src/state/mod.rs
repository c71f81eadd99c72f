use crate::state::models::Checkpoint;
use async_trait::async_trait;
use thiserror::Error;

pub mod models;
pub mod sled_store;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state database error: {0}")]
    Db(#[from] sled::Error),
    #[error("checkpoint serialization failed: {0}")]
    Codec(#[from] bincode::Error),
}

/// Durable persistence of "how much of this job is done". Writes are atomic
/// and each one fully supersedes the previous checkpoint for the same job.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StateError>;
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, StateError>;
}
