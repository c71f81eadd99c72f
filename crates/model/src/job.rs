use crate::schema::SourceColumn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Full configuration for one pipeline run, as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub source: SourceSpec,
    pub destination: DestinationSpec,
    #[serde(default)]
    pub settings: JobSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub project: String,
    pub dataset: String,
    pub table: String,
    /// SQL predicate pushed down to the source, without the WHERE keyword.
    #[serde(default)]
    pub filter: Option<String>,
    /// Local newline-delimited JSON export to read instead of a live
    /// warehouse connection.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    pub columns: Vec<SourceColumn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub conn_string: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Rows per extraction unit.
    pub chunk_size: usize,
    /// Rows per load transaction.
    pub batch_size: usize,
    /// Safety cap; extraction stops at this many rows even if the source
    /// has more. `None` disables the cap.
    pub max_rows_per_run: Option<u64>,
    /// Rows between checkpoint persists.
    pub checkpoint_interval: u64,
    /// Total attempts per retryable operation, including the first.
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    /// Consecutive failures before the breaker opens.
    pub circuit_failure_threshold: u32,
    /// Cooldown before the breaker allows a half-open probe.
    pub circuit_open_duration_secs: u64,
    /// Job-level budget for waiting out open-breaker periods before the
    /// run fails.
    pub circuit_wait_budget_secs: u64,
    /// Timeout applied to each chunk fetch and each batch write.
    pub operation_timeout_secs: u64,
    /// Overall wall-clock limit for one run. `None` disables it.
    pub job_timeout_secs: Option<u64>,
    /// Drop and recreate the destination table before loading.
    pub drop_destination_table: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        JobSettings {
            chunk_size: 50_000,
            batch_size: 10_000,
            max_rows_per_run: Some(1_000_000),
            checkpoint_interval: 100_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 200,
            circuit_failure_threshold: 5,
            circuit_open_duration_secs: 60,
            circuit_wait_budget_secs: 300,
            operation_timeout_secs: 120,
            job_timeout_secs: None,
            drop_destination_table: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed
                | JobState::CompletedWithErrors
                | JobState::Failed
                | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::CompletedWithErrors => "completed_with_errors",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
