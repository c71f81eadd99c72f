use crate::job::JobState;
use serde::Serialize;

/// Snapshot of run progress handed to the status layer. Emitted per chunk
/// and once per state transition; never after a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub status: JobState,
    pub rows_extracted: u64,
    pub rows_loaded: u64,
    pub rows_failed: u64,
    /// Fraction of the source covered, when the source reports a total.
    pub progress_percent: Option<f64>,
    pub message: String,
    pub elapsed_seconds: f64,
}
