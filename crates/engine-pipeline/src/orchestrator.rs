use crate::{
    error::PipelineError,
    extractor::SourceExtractor,
    loader::{BatchLoader, MappedRow},
    mapper::SchemaMapper,
};
use connectors::{error::ConnectorError, sink::RecordSink, source::Source};
use engine_core::{
    breaker::CircuitBreaker,
    dlq::{DeadLetterSink, FailedRecord},
    metrics::JobMetrics,
    retry::RetryPolicy,
    state::{CheckpointStore, models::Checkpoint},
};
use model::{
    chunk::{Chunk, Cursor},
    error::ErrorKind,
    events::ProgressEvent,
    job::{JobSpec, JobState},
    record::RawRecord,
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct MapFailure {
    row_index: usize,
    raw: RawRecord,
    message: String,
}

struct MappedChunk {
    seq: u64,
    extracted: u64,
    rows: Vec<MappedRow>,
    failures: Vec<MapFailure>,
}

enum ProducerMsg {
    Chunk(Box<MappedChunk>),
    Finished,
    Failed(ConnectorError),
}

/// Final account of one run, handed back to the caller alongside the
/// terminal progress event.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: String,
    pub state: JobState,
    pub rows_extracted: u64,
    pub rows_loaded: u64,
    pub rows_failed: u64,
    pub chunks_committed: u64,
    pub elapsed: Duration,
    pub message: String,
}

/// Drives one job through its state machine: resolve checkpoint, open the
/// source, prepare the destination, then run extraction and loading as a
/// bounded producer/consumer pair. The consumer task is the single writer
/// of checkpoints, dead letters and running totals.
pub struct PipelineOrchestrator {
    spec: JobSpec,
    source: Source,
    loader: BatchLoader,
    retry: RetryPolicy,
    store: Box<dyn CheckpointStore>,
    dlq: DeadLetterSink,
    cancel: CancellationToken,
    metrics: JobMetrics,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
    base_extracted: u64,
    base_loaded: u64,
    committed_extracted: u64,
    committed_loaded: u64,
    last_committed_chunk: u64,
    total_rows: Option<u64>,
}

impl PipelineOrchestrator {
    pub fn new(
        spec: JobSpec,
        source: Source,
        sink: Box<dyn RecordSink>,
        store: Box<dyn CheckpointStore>,
        dlq: DeadLetterSink,
        cancel: CancellationToken,
    ) -> Self {
        let settings = &spec.settings;
        let metrics = JobMetrics::new();
        let retry = RetryPolicy::new(
            settings.retry_max_attempts,
            Duration::from_millis(settings.retry_base_delay_ms),
            Duration::from_secs(5),
        );
        let breaker = CircuitBreaker::new(
            settings.circuit_failure_threshold,
            Duration::from_secs(settings.circuit_open_duration_secs),
        );
        let loader = BatchLoader::new(
            sink,
            breaker,
            retry.clone(),
            settings.batch_size,
            Duration::from_secs(settings.operation_timeout_secs),
            Duration::from_secs(settings.circuit_wait_budget_secs),
            metrics.clone(),
        );

        Self {
            spec,
            source,
            loader,
            retry,
            store,
            dlq,
            cancel,
            metrics,
            events: None,
            base_extracted: 0,
            base_loaded: 0,
            committed_extracted: 0,
            committed_loaded: 0,
            last_committed_chunk: 0,
            total_rows: None,
        }
    }

    /// Subscribes the status layer to progress events.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn metrics(&self) -> JobMetrics {
        self.metrics.clone()
    }

    /// Runs the job to a terminal state. Fatal conditions are folded into
    /// the report as `Failed` with a human-readable message; they are never
    /// returned as bare errors.
    pub async fn run(mut self) -> JobReport {
        let started = Instant::now();
        info!(job_id = %self.spec.id, "Job pending, resolving checkpoint.");
        self.emit(JobState::Pending, "resolving checkpoint", started);

        let outcome = match self.spec.settings.job_timeout_secs {
            Some(secs) => {
                let limit = Duration::from_secs(secs);
                match tokio::time::timeout(limit, self.execute(started)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(PipelineError::JobTimeout { limit }),
                }
            }
            None => self.execute(started).await,
        };
        let (state, message) = match outcome {
            Ok((state, message)) => (state, message),
            Err(err) => {
                error!(job_id = %self.spec.id, error = %err, "Job failed.");
                // Committed chunks stay resumable even when the run fails.
                if let Err(persist_err) = self.persist_checkpoint().await {
                    warn!(
                        job_id = %self.spec.id,
                        error = %persist_err,
                        "Could not persist checkpoint for failed run."
                    );
                }
                (JobState::Failed, err.to_string())
            }
        };

        let snap = self.metrics.snapshot();
        let report = JobReport {
            job_id: self.spec.id.clone(),
            state,
            rows_extracted: self.base_extracted + snap.rows_extracted,
            rows_loaded: self.base_loaded + snap.rows_loaded,
            rows_failed: snap.rows_failed,
            chunks_committed: self.last_committed_chunk,
            elapsed: started.elapsed(),
            message,
        };

        // The one terminal event; nothing is emitted after it.
        self.emit(state, &report.message, started);
        info!(
            job_id = %report.job_id,
            state = %report.state,
            rows_extracted = report.rows_extracted,
            rows_loaded = report.rows_loaded,
            rows_failed = report.rows_failed,
            "Job finished."
        );
        report
    }

    async fn execute(&mut self, started: Instant) -> Result<(JobState, String), PipelineError> {
        let settings = self.spec.settings.clone();

        let checkpoint = self.store.load(&self.spec.id).await?;
        let (resume_cursor, first_seq) = match &checkpoint {
            Some(cp) => {
                info!(
                    job_id = %self.spec.id,
                    chunk = cp.last_committed_chunk,
                    rows_extracted = cp.rows_extracted,
                    "Resuming from checkpoint."
                );
                self.base_extracted = cp.rows_extracted;
                self.base_loaded = cp.rows_loaded;
                self.committed_extracted = cp.rows_extracted;
                self.committed_loaded = cp.rows_loaded;
                self.last_committed_chunk = cp.last_committed_chunk;
                (cp.resume_cursor(), cp.last_committed_chunk + 1)
            }
            None => (Cursor::default(), 1),
        };

        // Stream initialization is the one source call the retry policy
        // wraps; row iteration failures are job-fatal.
        let source = self.source.clone();
        let source_schema = self
            .retry
            .run(
                || {
                    let source = source.clone();
                    async move { source.open().await }
                },
                ConnectorError::kind,
            )
            .await
            .map_err(|err| {
                let err = err.into_inner();
                match err.kind() {
                    ErrorKind::Authorization => PipelineError::Authorization(err),
                    _ => PipelineError::Source(err),
                }
            })?;
        self.total_rows = source_schema.total_rows;

        let mapper = SchemaMapper::new(self.spec.destination.table.clone(), source_schema.columns);
        let table_schema = mapper.schema().clone();

        self.loader
            .prepare(&table_schema, settings.drop_destination_table)
            .await?;

        info!(job_id = %self.spec.id, table = %table_schema.table, "Job running.");
        self.emit(JobState::Running, "running", started);

        let (tx, mut rx) = mpsc::channel::<ProducerMsg>(2);
        let producer = spawn_producer(
            tx,
            SourceExtractor::new(
                self.source.clone(),
                settings.chunk_size,
                settings.max_rows_per_run,
                resume_cursor,
                first_seq,
            ),
            mapper,
            Duration::from_secs(settings.operation_timeout_secs),
            self.cancel.clone(),
        );

        let mut rows_since_persist: u64 = 0;
        let mut finished_stream = false;

        while let Some(msg) = rx.recv().await {
            match msg {
                ProducerMsg::Chunk(mapped) => {
                    let loaded = self
                        .loader
                        .load_chunk(&table_schema, mapped.seq, &mapped.rows, &mut self.dlq)
                        .await?;

                    // Accounting happens only once the chunk is committed;
                    // a failure-path checkpoint must not cover rows that
                    // never loaded.
                    self.metrics.add_extracted(mapped.extracted);
                    for failure in &mapped.failures {
                        self.metrics.add_failed(1);
                        self.dlq.write(&FailedRecord {
                            chunk_id: mapped.seq,
                            row_index: failure.row_index,
                            payload: serde_json::Value::Object(failure.raw.clone()),
                            error_kind: ErrorKind::Validation,
                            error_message: failure.message.clone(),
                            timestamp: chrono::Utc::now(),
                        });
                    }
                    self.last_committed_chunk = mapped.seq;
                    self.committed_extracted += mapped.extracted;
                    self.committed_loaded += loaded;

                    rows_since_persist += mapped.extracted;
                    if rows_since_persist >= settings.checkpoint_interval {
                        self.persist_checkpoint().await?;
                        rows_since_persist = 0;
                    }

                    self.emit(JobState::Running, "chunk committed", started);

                    // Cooperative cancellation, observed only at chunk
                    // boundaries so an in-flight chunk finishes cleanly.
                    if self.cancel.is_cancelled() {
                        break;
                    }
                }
                ProducerMsg::Finished => {
                    finished_stream = true;
                    break;
                }
                ProducerMsg::Failed(err) => {
                    drop(rx);
                    let _ = producer.await;
                    return Err(match err.kind() {
                        ErrorKind::Authorization => PipelineError::Authorization(err),
                        _ => PipelineError::Source(err),
                    });
                }
            }
        }

        drop(rx);
        let _ = producer.await;

        if !finished_stream {
            if self.cancel.is_cancelled() {
                self.persist_checkpoint().await?;
                warn!(job_id = %self.spec.id, "Job cancelled.");
                return Ok((JobState::Cancelled, "cancelled by request".into()));
            }
            return Err(PipelineError::ChannelClosed);
        }

        self.persist_checkpoint().await?;
        self.loader.finish(&table_schema).await?;

        let snap = self.metrics.snapshot();
        if snap.rows_failed == 0 {
            Ok((JobState::Completed, "completed".into()))
        } else {
            Ok((
                JobState::CompletedWithErrors,
                format!("completed with {} dead-lettered rows", snap.rows_failed),
            ))
        }
    }

    async fn persist_checkpoint(&mut self) -> Result<(), PipelineError> {
        let checkpoint = Checkpoint {
            job_id: self.spec.id.clone(),
            last_committed_chunk: self.last_committed_chunk,
            rows_extracted: self.committed_extracted,
            rows_loaded: self.committed_loaded,
            updated_at: chrono::Utc::now(),
        };
        self.store.save(&checkpoint).await?;
        info!(
            job_id = %checkpoint.job_id,
            chunk = checkpoint.last_committed_chunk,
            rows_loaded = checkpoint.rows_loaded,
            "Checkpoint persisted."
        );
        Ok(())
    }

    fn emit(&self, status: JobState, message: &str, started: Instant) {
        let snap = self.metrics.snapshot();
        let rows_loaded = self.base_loaded + snap.rows_loaded;
        let progress_percent = self
            .total_rows
            .filter(|total| *total > 0)
            .map(|total| (rows_loaded as f64 / total as f64 * 100.0).min(100.0));

        let event = ProgressEvent {
            job_id: self.spec.id.clone(),
            status,
            rows_extracted: self.base_extracted + snap.rows_extracted,
            rows_loaded,
            rows_failed: snap.rows_failed,
            progress_percent,
            message: message.to_string(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };

        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn spawn_producer(
    tx: mpsc::Sender<ProducerMsg>,
    mut extractor: SourceExtractor,
    mapper: SchemaMapper,
    fetch_timeout: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                info!("Cancellation observed, stopping extraction.");
                break;
            }

            let next = match tokio::time::timeout(fetch_timeout, extractor.next_chunk()).await {
                Ok(result) => result,
                Err(_) => Err(ConnectorError::Timeout(fetch_timeout)),
            };

            match next {
                Ok(Some(chunk)) => {
                    let mapped = map_chunk(&mapper, chunk);
                    if tx.send(ProducerMsg::Chunk(Box::new(mapped))).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(ProducerMsg::Finished).await;
                    break;
                }
                Err(err) => {
                    let _ = tx.send(ProducerMsg::Failed(err)).await;
                    break;
                }
            }
        }
    })
}

/// Normalizes a chunk in place. Mapping errors stay per-record; the chunk
/// itself always survives.
fn map_chunk(mapper: &SchemaMapper, chunk: Chunk) -> MappedChunk {
    let seq = chunk.seq;
    let extracted = chunk.len() as u64;
    let mut rows = Vec::with_capacity(chunk.rows.len());
    let mut failures = Vec::new();

    for (row_index, raw) in chunk.rows.into_iter().enumerate() {
        match mapper.normalize(&raw) {
            Ok(record) => rows.push(MappedRow {
                row_index,
                raw,
                record,
            }),
            Err(err) => failures.push(MapFailure {
                row_index,
                raw,
                message: err.to_string(),
            }),
        }
    }

    MappedChunk {
        seq,
        extracted,
        rows,
        failures,
    }
}
