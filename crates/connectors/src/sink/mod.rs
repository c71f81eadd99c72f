use crate::error::ConnectorError;
use async_trait::async_trait;
use model::{record::NormalizedRecord, schema::TableSchema};

pub mod memory;
pub mod postgres;

/// Destination for normalized records. One sink instance serves one job;
/// the consumer task owns it exclusively.
#[async_trait]
pub trait RecordSink: Send {
    /// Cheap connectivity probe, used by the circuit breaker's initial
    /// connection check.
    async fn ping(&mut self) -> Result<(), ConnectorError>;

    /// Idempotent table creation, optionally dropping an existing table
    /// first.
    async fn ensure_table(
        &mut self,
        schema: &TableSchema,
        drop_existing: bool,
    ) -> Result<(), ConnectorError>;

    /// Applies one batch as a single upsert write, so re-delivering an
    /// already-loaded batch after resume is a no-op in effect.
    async fn write_batch(
        &mut self,
        schema: &TableSchema,
        records: &[NormalizedRecord],
    ) -> Result<u64, ConnectorError>;

    /// Slow-path single-record upsert, used to isolate malformed rows after
    /// a batch-level validation failure.
    async fn write_record(
        &mut self,
        schema: &TableSchema,
        record: &NormalizedRecord,
    ) -> Result<(), ConnectorError>;

    /// Secondary index creation, deferred until after the bulk load phase.
    async fn create_indexes(&mut self, schema: &TableSchema) -> Result<(), ConnectorError>;
}
