use crate::error::PipelineError;
use connectors::{error::ConnectorError, sink::RecordSink};
use engine_core::{
    breaker::{CircuitBreaker, CircuitOpen},
    dlq::{DeadLetterSink, FailedRecord},
    metrics::JobMetrics,
    retry::RetryPolicy,
};
use model::{
    error::ErrorKind,
    record::{NormalizedRecord, RawRecord},
    schema::TableSchema,
};
use std::time::Duration;
use tracing::{info, warn};

/// One mapped row traveling from the producer to the consumer, keeping the
/// raw payload alongside so a load failure can be dead-lettered losslessly.
#[derive(Debug, Clone)]
pub struct MappedRow {
    pub row_index: usize,
    pub raw: RawRecord,
    pub record: NormalizedRecord,
}

#[derive(Clone, Copy)]
enum SinkOp<'a> {
    Ping,
    EnsureTable(&'a TableSchema, bool),
    WriteBatch(&'a TableSchema, &'a [NormalizedRecord]),
    WriteRecord(&'a TableSchema, &'a NormalizedRecord),
    CreateIndexes(&'a TableSchema),
}

enum SinkFailure {
    /// The destination rejected the payload; retrying cannot help.
    Validation(ConnectorError),
    /// Transient failure that outlived the retry budget.
    Exhausted(ConnectorError),
    /// Job-fatal condition.
    Fatal(PipelineError),
}

/// Applies mapped rows to the destination in sized batches, wrapping every
/// sink call in the shared circuit breaker and the retry policy. Failed
/// units of work are dead-lettered, never escalated, except authorization
/// failures and an exhausted breaker wait budget.
pub struct BatchLoader {
    sink: Box<dyn RecordSink>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    batch_size: usize,
    op_timeout: Duration,
    wait_budget: Duration,
    waited_open: Duration,
    metrics: JobMetrics,
}

impl BatchLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sink: Box<dyn RecordSink>,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        batch_size: usize,
        op_timeout: Duration,
        wait_budget: Duration,
        metrics: JobMetrics,
    ) -> Self {
        Self {
            sink,
            breaker,
            retry,
            batch_size: batch_size.max(1),
            op_timeout,
            wait_budget,
            waited_open: Duration::ZERO,
            metrics,
        }
    }

    /// Connection check plus idempotent table creation. Failures here are
    /// job-fatal; there are no records to dead-letter yet.
    pub async fn prepare(
        &mut self,
        schema: &TableSchema,
        drop_existing: bool,
    ) -> Result<(), PipelineError> {
        self.execute_resilient(SinkOp::Ping)
            .await
            .map_err(setup_failure)?;
        self.execute_resilient(SinkOp::EnsureTable(schema, drop_existing))
            .await
            .map_err(setup_failure)?;
        Ok(())
    }

    /// Deferred index creation, run once after the bulk load phase.
    pub async fn finish(&mut self, schema: &TableSchema) -> Result<(), PipelineError> {
        self.execute_resilient(SinkOp::CreateIndexes(schema))
            .await
            .map_err(setup_failure)?;
        Ok(())
    }

    /// Loads one chunk's rows in `batch_size` slices. Returns the number of
    /// rows that reached the destination.
    pub async fn load_chunk(
        &mut self,
        schema: &TableSchema,
        chunk_seq: u64,
        rows: &[MappedRow],
        dlq: &mut DeadLetterSink,
    ) -> Result<u64, PipelineError> {
        let mut loaded = 0u64;

        for batch in rows.chunks(self.batch_size) {
            let records: Vec<NormalizedRecord> =
                batch.iter().map(|row| row.record.clone()).collect();

            match self
                .execute_resilient(SinkOp::WriteBatch(schema, &records))
                .await
            {
                Ok(written) => {
                    loaded += written;
                    self.metrics.add_loaded(written);
                }
                Err(SinkFailure::Validation(err)) => {
                    warn!(
                        chunk = chunk_seq,
                        error = %err,
                        "Batch failed validation, isolating records row by row."
                    );
                    loaded += self
                        .load_rows_individually(schema, chunk_seq, batch, dlq)
                        .await?;
                }
                Err(SinkFailure::Exhausted(err)) => {
                    warn!(
                        chunk = chunk_seq,
                        rows = batch.len(),
                        error = %err,
                        "Batch exhausted retries, dead-lettering."
                    );
                    for row in batch {
                        self.dead_letter(dlq, chunk_seq, row, ErrorKind::Transient, &err);
                    }
                }
                Err(SinkFailure::Fatal(err)) => return Err(err),
            }
        }

        Ok(loaded)
    }

    /// Slow path after a batch-level validation error: retries each record
    /// alone so the valid remainder of the batch still loads.
    async fn load_rows_individually(
        &mut self,
        schema: &TableSchema,
        chunk_seq: u64,
        batch: &[MappedRow],
        dlq: &mut DeadLetterSink,
    ) -> Result<u64, PipelineError> {
        let mut loaded = 0u64;

        for row in batch {
            match self
                .execute_resilient(SinkOp::WriteRecord(schema, &row.record))
                .await
            {
                Ok(_) => loaded += 1,
                Err(SinkFailure::Validation(err)) => {
                    self.dead_letter(dlq, chunk_seq, row, ErrorKind::Validation, &err);
                }
                Err(SinkFailure::Exhausted(err)) => {
                    self.dead_letter(dlq, chunk_seq, row, ErrorKind::Transient, &err);
                }
                Err(SinkFailure::Fatal(err)) => return Err(err),
            }
        }

        if loaded > 0 {
            self.metrics.add_loaded(loaded);
        }
        Ok(loaded)
    }

    fn dead_letter(
        &self,
        dlq: &mut DeadLetterSink,
        chunk_id: u64,
        row: &MappedRow,
        kind: ErrorKind,
        err: &ConnectorError,
    ) {
        self.metrics.add_failed(1);
        dlq.write(&FailedRecord {
            chunk_id,
            row_index: row.row_index,
            payload: serde_json::Value::Object(row.raw.clone()),
            error_kind: kind,
            error_message: err.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    async fn execute_resilient(&mut self, op: SinkOp<'_>) -> Result<u64, SinkFailure> {
        let mut attempt = 0usize;

        loop {
            if let Err(open) = self.breaker.acquire() {
                self.wait_out_open(open).await?;
                continue;
            }

            match self.execute(op).await {
                Ok(n) => {
                    self.breaker.record_success();
                    return Ok(n);
                }
                Err(err) => match err.kind() {
                    ErrorKind::Transient => {
                        self.breaker.record_failure();
                        attempt += 1;
                        if attempt >= self.retry.max_attempts {
                            return Err(SinkFailure::Exhausted(err));
                        }
                        self.metrics.add_retries(1);
                        let delay = self.retry.backoff_delay(attempt - 1);
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient destination failure, retrying."
                        );
                        tokio::time::sleep(delay).await;
                    }
                    ErrorKind::Validation => {
                        // The destination answered; only transport-level
                        // failures count against the breaker.
                        self.breaker.record_success();
                        return Err(SinkFailure::Validation(err));
                    }
                    ErrorKind::Authorization => {
                        return Err(SinkFailure::Fatal(PipelineError::Authorization(err)));
                    }
                },
            }
        }
    }

    async fn execute(&mut self, op: SinkOp<'_>) -> Result<u64, ConnectorError> {
        let call = async {
            match op {
                SinkOp::Ping => self.sink.ping().await.map(|_| 0),
                SinkOp::EnsureTable(schema, drop_existing) => self
                    .sink
                    .ensure_table(schema, drop_existing)
                    .await
                    .map(|_| 0),
                SinkOp::WriteBatch(schema, records) => {
                    self.sink.write_batch(schema, records).await
                }
                SinkOp::WriteRecord(schema, record) => {
                    self.sink.write_record(schema, record).await.map(|_| 1)
                }
                SinkOp::CreateIndexes(schema) => {
                    self.sink.create_indexes(schema).await.map(|_| 0)
                }
            }
        };

        match tokio::time::timeout(self.op_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::Timeout(self.op_timeout)),
        }
    }

    /// Sleeps through one open period, bounded by the job-level wait
    /// budget. Exceeding the budget fails the job.
    async fn wait_out_open(&mut self, open: CircuitOpen) -> Result<(), SinkFailure> {
        if self.waited_open + open.retry_after > self.wait_budget {
            return Err(SinkFailure::Fatal(PipelineError::CircuitWaitBudget {
                budget: self.wait_budget,
            }));
        }
        info!(
            wait_ms = open.retry_after.as_millis() as u64,
            "Circuit open, pausing loads."
        );
        tokio::time::sleep(open.retry_after).await;
        self.waited_open += open.retry_after;
        Ok(())
    }
}

/// Setup calls have no records to dead-letter, so any failure is job-fatal.
fn setup_failure(failure: SinkFailure) -> PipelineError {
    match failure {
        SinkFailure::Validation(err) | SinkFailure::Exhausted(err) => {
            PipelineError::SchemaSetup(err)
        }
        SinkFailure::Fatal(err) => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::sink::memory::MemorySink;
    use model::record::FieldValue;
    use model::schema::{ColumnDef, ColumnType};
    use model::value::Value;
    use tempfile::tempdir;

    fn schema() -> TableSchema {
        TableSchema {
            table: "patents".into(),
            columns: vec![
                ColumnDef {
                    name: "publication_number".into(),
                    column_type: ColumnType::Text,
                    primary_key: true,
                },
                ColumnDef {
                    name: "claim_count".into(),
                    column_type: ColumnType::BigInt,
                    primary_key: false,
                },
            ],
            indexes: vec![],
        }
    }

    fn mapped_row(index: usize, key: &str) -> MappedRow {
        let mut raw = RawRecord::new();
        raw.insert("publication_number".into(), serde_json::json!(key));
        MappedRow {
            row_index: index,
            raw,
            record: NormalizedRecord {
                fields: vec![
                    FieldValue {
                        column: "publication_number".into(),
                        value: Value::Text(key.into()),
                    },
                    FieldValue {
                        column: "claim_count".into(),
                        value: Value::Integer(index as i64),
                    },
                ],
            },
        }
    }

    fn loader(sink: MemorySink, threshold: u32, wait_budget: Duration) -> BatchLoader {
        BatchLoader::new(
            Box::new(sink),
            CircuitBreaker::new(threshold, Duration::from_millis(50)),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10)),
            2,
            Duration::from_secs(5),
            wait_budget,
            JobMetrics::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn batch_succeeds_on_final_retry_attempt() {
        let sink = MemorySink::new();
        sink.fail_next_batches(2);
        let dir = tempdir().unwrap();
        let mut dlq = DeadLetterSink::new(dir.path(), "job-1");
        let mut loader = loader(sink.clone(), 5, Duration::from_secs(60));

        let rows = vec![mapped_row(0, "US-1-A"), mapped_row(1, "US-2-A")];
        let loaded = loader
            .load_chunk(&schema(), 1, &rows, &mut dlq)
            .await
            .unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(sink.row_count(), 2);
        assert_eq!(sink.batch_calls(), 3);
        assert_eq!(dlq.entries_written(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_batch_is_dead_lettered_and_the_job_continues() {
        let sink = MemorySink::new();
        sink.fail_next_batches(3);
        let dir = tempdir().unwrap();
        let mut dlq = DeadLetterSink::new(dir.path(), "job-1");
        let mut loader = loader(sink.clone(), 10, Duration::from_secs(60));

        // First batch of two burns all three attempts; second batch loads.
        let rows = vec![
            mapped_row(0, "US-1-A"),
            mapped_row(1, "US-2-A"),
            mapped_row(2, "US-3-A"),
        ];
        let loaded = loader
            .load_chunk(&schema(), 1, &rows, &mut dlq)
            .await
            .unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(dlq.entries_written(), 2);
        assert_eq!(sink.row_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failure_isolates_only_the_bad_record() {
        let sink = MemorySink::new();
        sink.poison_key("US-2-A");
        let dir = tempdir().unwrap();
        let mut dlq = DeadLetterSink::new(dir.path(), "job-1");
        let mut loader = loader(sink.clone(), 5, Duration::from_secs(60));

        let rows = vec![mapped_row(0, "US-1-A"), mapped_row(1, "US-2-A")];
        let loaded = loader
            .load_chunk(&schema(), 4, &rows, &mut dlq)
            .await
            .unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(dlq.entries_written(), 1);
        assert_eq!(sink.record_calls(), 2);
        assert!(sink.get("US-1-A").is_some());
        assert!(sink.get("US-2-A").is_none());

        let content = std::fs::read_to_string(dlq.current_path()).unwrap();
        assert!(content.contains("\"error_kind\":\"ValidationError\""));
        assert!(content.contains("\"chunk_id\":4"));
    }

    #[tokio::test(start_paused = true)]
    async fn authorization_failure_is_fatal() {
        let sink = MemorySink::new();
        sink.reject_authorization();
        let mut loader = loader(sink, 5, Duration::from_secs(60));

        let err = loader.prepare(&schema(), false).await.unwrap_err();
        assert!(matches!(err, PipelineError::Authorization(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_past_wait_budget_fails_the_job() {
        let sink = MemorySink::new();
        sink.fail_next_batches(usize::MAX);
        let dir = tempdir().unwrap();
        let mut dlq = DeadLetterSink::new(dir.path(), "job-1");
        // Threshold 1 opens immediately; budget allows about two open
        // periods before the job gives up.
        let mut loader = loader(sink, 1, Duration::from_millis(120));

        let rows = vec![mapped_row(0, "US-1-A")];
        let err = loader
            .load_chunk(&schema(), 1, &rows, &mut dlq)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::CircuitWaitBudget { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn setup_ping_retries_through_transient_failures() {
        let sink = MemorySink::new();
        sink.fail_next_pings(2);
        let mut loader = loader(sink.clone(), 5, Duration::from_secs(60));

        loader.prepare(&schema(), false).await.unwrap();
        assert!(sink.table_created());
    }
}
