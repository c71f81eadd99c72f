use chrono::{DateTime, Utc};
use model::chunk::Cursor;
use serde::{Deserialize, Serialize};

/// Durable progress record. Immutable once written; superseded, never
/// edited, by the next write.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub job_id: String,
    pub last_committed_chunk: u64,
    /// Total rows pulled from the source, including rows that were later
    /// dead-lettered. This, not `rows_loaded`, is the resume offset.
    pub rows_extracted: u64,
    pub rows_loaded: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn resume_cursor(&self) -> Cursor {
        Cursor::at(self.rows_extracted)
    }
}
