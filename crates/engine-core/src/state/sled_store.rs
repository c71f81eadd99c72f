use crate::state::{CheckpointStore, StateError, models::Checkpoint};
use async_trait::async_trait;
use sled::transaction::TransactionError;
use std::path::Path;
use tracing::warn;

pub struct SledCheckpointStore {
    db: sled::Db,
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    #[inline]
    fn key(job_id: &str) -> String {
        format!("chk:{}", job_id)
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let key = Self::key(&checkpoint.job_id);
        let new_bytes = bincode::serialize(checkpoint)?;
        let incoming_chunk = checkpoint.last_committed_chunk;

        // Atomic check-then-set: a stale writer must never regress a newer
        // checkpoint, and a reader must never observe a partial write.
        let result = self.db.transaction::<_, _, sled::Error>(|tx_db| {
            if let Some(existing_bytes) = tx_db.get(&key)? {
                if let Ok(existing) = bincode::deserialize::<Checkpoint>(&existing_bytes) {
                    if existing.last_committed_chunk > incoming_chunk {
                        // Intentionally skip the update, not an error.
                        return Ok(false);
                    }
                }
            }

            tx_db.insert(&*key, new_bytes.as_slice())?;
            Ok(true)
        });

        let written = match result {
            Ok(written) => written,
            Err(TransactionError::Abort(e)) | Err(TransactionError::Storage(e)) => {
                return Err(StateError::Db(e));
            }
        };

        if !written {
            warn!(
                job_id = %checkpoint.job_id,
                chunk = incoming_chunk,
                "Skipped stale checkpoint write."
            );
            return Ok(());
        }

        self.db.flush_async().await?;
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, StateError> {
        let key = Self::key(job_id);
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn mk_cp(chunk: u64, rows_extracted: u64, rows_loaded: u64) -> Checkpoint {
        Checkpoint {
            job_id: "job-1".into(),
            last_committed_chunk: chunk,
            rows_extracted,
            rows_loaded,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = SledCheckpointStore::open(dir.path()).unwrap();

        assert!(store.load("job-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_supersedes_previous_checkpoint() {
        let dir = tempdir().unwrap();
        let store = SledCheckpointStore::open(dir.path()).unwrap();

        store.save(&mk_cp(1, 50_000, 50_000)).await.unwrap();
        store.save(&mk_cp(2, 100_000, 99_990)).await.unwrap();

        let cp = store.load("job-1").await.unwrap().unwrap();
        assert_eq!(cp.last_committed_chunk, 2);
        assert_eq!(cp.rows_extracted, 100_000);
        assert_eq!(cp.rows_loaded, 99_990);
    }

    #[tokio::test]
    async fn stale_write_never_regresses_progress() {
        let dir = tempdir().unwrap();
        let store = SledCheckpointStore::open(dir.path()).unwrap();

        store.save(&mk_cp(3, 150_000, 150_000)).await.unwrap();
        store.save(&mk_cp(2, 100_000, 100_000)).await.unwrap();

        let cp = store.load("job-1").await.unwrap().unwrap();
        assert_eq!(cp.last_committed_chunk, 3);
    }

    #[tokio::test]
    async fn resume_cursor_uses_extracted_rows() {
        let cp = mk_cp(2, 100_000, 99_500);
        assert_eq!(cp.resume_cursor().offset, 100_000);
    }
}
