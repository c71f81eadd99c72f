use crate::{error::ConnectorError, sink::RecordSink};
use async_trait::async_trait;
use model::{
    record::NormalizedRecord,
    schema::TableSchema,
    value::Value,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<String, NormalizedRecord>,
    next_synthetic_key: u64,
    fail_batches: usize,
    fail_pings: usize,
    auth_rejected: bool,
    poison_keys: HashSet<String>,
    batch_calls: u64,
    record_calls: u64,
    indexes_created: bool,
    table_created: bool,
}

/// In-memory upsert-by-key sink for tests. Clones share state so a test can
/// hand one handle to the pipeline and keep another for assertions.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `n` batch writes fail as unavailable.
    pub fn fail_next_batches(&self, n: usize) {
        self.inner.lock().unwrap().fail_batches = n;
    }

    /// Next `n` pings fail as unavailable.
    pub fn fail_next_pings(&self, n: usize) {
        self.inner.lock().unwrap().fail_pings = n;
    }

    /// All calls fail with an authorization error.
    pub fn reject_authorization(&self) {
        self.inner.lock().unwrap().auth_rejected = true;
    }

    /// Any batch containing this key fails validation at batch granularity;
    /// the single-record path also rejects the key.
    pub fn poison_key(&self, key: impl Into<String>) {
        self.inner.lock().unwrap().poison_keys.insert(key.into());
    }

    pub fn row_count(&self) -> usize {
        self.inner.lock().unwrap().rows.len()
    }

    pub fn get(&self, key: &str) -> Option<NormalizedRecord> {
        self.inner.lock().unwrap().rows.get(key).cloned()
    }

    pub fn batch_calls(&self) -> u64 {
        self.inner.lock().unwrap().batch_calls
    }

    pub fn record_calls(&self) -> u64 {
        self.inner.lock().unwrap().record_calls
    }

    pub fn indexes_created(&self) -> bool {
        self.inner.lock().unwrap().indexes_created
    }

    pub fn table_created(&self) -> bool {
        self.inner.lock().unwrap().table_created
    }

    fn key_of(schema: &TableSchema, record: &NormalizedRecord, inner: &mut Inner) -> String {
        let key = schema
            .primary_key()
            .and_then(|pk| record.value(&pk.name))
            .map(|value| match value {
                Value::Text(v) => v.clone(),
                Value::Integer(v) => v.to_string(),
                other => format!("{other:?}"),
            });
        match key {
            Some(key) => key,
            None => {
                inner.next_synthetic_key += 1;
                format!("__row_{}", inner.next_synthetic_key)
            }
        }
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn ping(&mut self) -> Result<(), ConnectorError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.auth_rejected {
            return Err(ConnectorError::Authorization("permission denied".into()));
        }
        if inner.fail_pings > 0 {
            inner.fail_pings -= 1;
            return Err(ConnectorError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn ensure_table(
        &mut self,
        _schema: &TableSchema,
        drop_existing: bool,
    ) -> Result<(), ConnectorError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.auth_rejected {
            return Err(ConnectorError::Authorization("permission denied".into()));
        }
        if drop_existing {
            inner.rows.clear();
        }
        inner.table_created = true;
        Ok(())
    }

    async fn write_batch(
        &mut self,
        schema: &TableSchema,
        records: &[NormalizedRecord],
    ) -> Result<u64, ConnectorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.batch_calls += 1;

        if inner.fail_batches > 0 {
            inner.fail_batches -= 1;
            return Err(ConnectorError::Unavailable("connection refused".into()));
        }

        let poisoned = records.iter().any(|record| {
            schema
                .primary_key()
                .and_then(|pk| record.value(&pk.name))
                .and_then(|v| v.as_text())
                .is_some_and(|key| inner.poison_keys.contains(key))
        });
        if poisoned {
            return Err(ConnectorError::Validation(
                "value violates a column constraint".into(),
            ));
        }

        for record in records {
            let key = Self::key_of(schema, record, &mut inner);
            inner.rows.insert(key, record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn write_record(
        &mut self,
        schema: &TableSchema,
        record: &NormalizedRecord,
    ) -> Result<(), ConnectorError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_calls += 1;

        if let Some(key) = schema
            .primary_key()
            .and_then(|pk| record.value(&pk.name))
            .and_then(|v| v.as_text())
            && inner.poison_keys.contains(key)
        {
            return Err(ConnectorError::Validation(
                "value violates a column constraint".into(),
            ));
        }

        let key = Self::key_of(schema, record, &mut inner);
        inner.rows.insert(key, record.clone());
        Ok(())
    }

    async fn create_indexes(&mut self, _schema: &TableSchema) -> Result<(), ConnectorError> {
        self.inner.lock().unwrap().indexes_created = true;
        Ok(())
    }
}
