use crate::{
    error::ConnectorError,
    source::{RowSource, SourceSchema},
};
use async_trait::async_trait;
use model::{
    chunk::{Cursor, FetchResult},
    record::RawRecord,
    schema::SourceColumn,
};

/// Fixture source over an in-memory row set. Used by tests and dry runs.
pub struct MemorySource {
    columns: Vec<SourceColumn>,
    rows: Vec<RawRecord>,
    fail_opens: usize,
}

impl MemorySource {
    pub fn new(columns: Vec<SourceColumn>, rows: Vec<RawRecord>) -> Self {
        Self {
            columns,
            rows,
            fail_opens: 0,
        }
    }

    /// Makes the next `n` `open` calls fail as unavailable.
    pub fn fail_opens(mut self, n: usize) -> Self {
        self.fail_opens = n;
        self
    }
}

#[async_trait]
impl RowSource for MemorySource {
    async fn open(&mut self) -> Result<SourceSchema, ConnectorError> {
        if self.fail_opens > 0 {
            self.fail_opens -= 1;
            return Err(ConnectorError::Unavailable(
                "source connection refused".into(),
            ));
        }
        Ok(SourceSchema {
            columns: self.columns.clone(),
            total_rows: Some(self.rows.len() as u64),
        })
    }

    async fn fetch(
        &mut self,
        chunk_size: usize,
        cursor: Cursor,
    ) -> Result<FetchResult, ConnectorError> {
        let start = (cursor.offset as usize).min(self.rows.len());
        let end = (start + chunk_size).min(self.rows.len());
        let rows = self.rows[start..end].to_vec();
        let next_cursor = cursor.advance(rows.len() as u64);

        Ok(FetchResult {
            rows,
            next_cursor,
            reached_end: end == self.rows.len(),
        })
    }
}
