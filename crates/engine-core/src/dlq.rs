use chrono::{DateTime, Utc};
use model::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::error;

/// One record the pipeline could not load. Append-only; never retried or
/// removed by the pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRecord {
    pub chunk_id: u64,
    pub row_index: usize,
    pub payload: serde_json::Value,
    pub error_kind: ErrorKind,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only JSONL dead-letter log, one file per job per day. Writing is
/// best-effort: a failed write is logged and the pipeline continues, since
/// losing a dead-letter entry is preferable to aborting the run.
pub struct DeadLetterSink {
    dir: PathBuf,
    job_id: String,
    entries_written: u64,
}

impl DeadLetterSink {
    pub fn new(dir: impl Into<PathBuf>, job_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            job_id: job_id.into(),
            entries_written: 0,
        }
    }

    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    pub fn write(&mut self, record: &FailedRecord) {
        match self.append(record) {
            Ok(()) => self.entries_written += 1,
            Err(err) => {
                error!(
                    chunk_id = record.chunk_id,
                    row_index = record.row_index,
                    error = %err,
                    "Failed to persist dead-letter record, continuing."
                );
            }
        }
    }

    fn append(&self, record: &FailedRecord) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        writeln!(file, "{line}")
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(format!(
            "dlq_{}_{}.jsonl",
            self.job_id,
            Utc::now().format("%Y%m%d")
        ))
    }

    /// Summarizes the dead-letter files of one job for operator inspection.
    pub fn stats(dir: &Path, job_id: &str) -> io::Result<DlqStats> {
        let prefix = format!("dlq_{}_", job_id);
        let mut stats = DlqStats::default();

        if !dir.exists() {
            return Ok(stats);
        }

        let mut names: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".jsonl"))
            })
            .collect();
        names.sort();

        for path in names {
            let mut file_stats = DlqFileStats {
                file: path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string(),
                records: 0,
                by_kind: BTreeMap::new(),
            };

            for line in BufReader::new(fs::File::open(&path)?).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                file_stats.records += 1;
                if let Ok(record) = serde_json::from_str::<FailedRecord>(&line) {
                    *file_stats
                        .by_kind
                        .entry(record.error_kind.to_string())
                        .or_insert(0) += 1;
                }
            }

            stats.total_records += file_stats.records;
            stats.files.push(file_stats);
        }

        Ok(stats)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct DlqStats {
    pub total_records: u64,
    pub files: Vec<DlqFileStats>,
}

#[derive(Debug, Serialize)]
pub struct DlqFileStats {
    pub file: String,
    pub records: u64,
    pub by_kind: BTreeMap<String, u64>,
}
