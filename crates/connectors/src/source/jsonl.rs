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
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Reads a newline-delimited JSON export snapshot, one object per line.
/// Column descriptors come from the job configuration since the file
/// carries no schema of its own.
pub struct JsonlSource {
    path: PathBuf,
    columns: Vec<SourceColumn>,
    /// Reader positioned at `records_read`; rebuilt when a cursor jumps
    /// backwards.
    reader: Option<BufReader<File>>,
    /// Records consumed so far. Cursor offsets count records, so blank
    /// lines never move this.
    records_read: u64,
    /// Physical line position, for error reporting.
    lines_read: u64,
}

impl JsonlSource {
    pub fn new(path: impl Into<PathBuf>, columns: Vec<SourceColumn>) -> Self {
        Self {
            path: path.into(),
            columns,
            reader: None,
            records_read: 0,
            lines_read: 0,
        }
    }

    fn reopen(&mut self) -> Result<(), ConnectorError> {
        let file = File::open(&self.path)?;
        self.reader = Some(BufReader::new(file));
        self.records_read = 0;
        self.lines_read = 0;
        Ok(())
    }

    fn next_line(&mut self) -> Result<Option<String>, ConnectorError> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => {
                self.reopen()?;
                self.reader
                    .as_mut()
                    .ok_or_else(|| ConnectorError::Unavailable("snapshot not open".into()))?
            }
        };

        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        self.lines_read += 1;
        Ok(Some(line))
    }

    /// Next non-blank line; `None` at end of file.
    fn next_record_line(&mut self) -> Result<Option<String>, ConnectorError> {
        loop {
            match self.next_line()? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

#[async_trait]
impl RowSource for JsonlSource {
    async fn open(&mut self) -> Result<SourceSchema, ConnectorError> {
        // Count rows up front so progress can be reported as a percentage.
        let file = File::open(&self.path)?;
        let mut total: u64 = 0;
        for line in BufReader::new(file).lines() {
            if !line?.trim().is_empty() {
                total += 1;
            }
        }

        self.reopen()?;
        Ok(SourceSchema {
            columns: self.columns.clone(),
            total_rows: Some(total),
        })
    }

    async fn fetch(
        &mut self,
        chunk_size: usize,
        cursor: Cursor,
    ) -> Result<FetchResult, ConnectorError> {
        if self.reader.is_none() || cursor.offset < self.records_read {
            self.reopen()?;
        }

        // Skip records already delivered in a previous run.
        while self.records_read < cursor.offset {
            if self.next_record_line()?.is_none() {
                return Ok(FetchResult {
                    rows: Vec::new(),
                    next_cursor: cursor,
                    reached_end: true,
                });
            }
            self.records_read += 1;
        }

        let mut rows: Vec<RawRecord> = Vec::with_capacity(chunk_size);
        let mut reached_end = false;

        while rows.len() < chunk_size {
            match self.next_record_line()? {
                Some(line) => {
                    let record: RawRecord =
                        serde_json::from_str(line.trim()).map_err(|source| {
                            ConnectorError::MalformedRecord {
                                line: self.lines_read,
                                source,
                            }
                        })?;
                    self.records_read += 1;
                    rows.push(record);
                }
                None => {
                    reached_end = true;
                    break;
                }
            }
        }

        let next_cursor = cursor.advance(rows.len() as u64);
        Ok(FetchResult {
            rows,
            next_cursor,
            reached_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::schema::SourceType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn columns() -> Vec<SourceColumn> {
        vec![SourceColumn {
            name: "publication_number".into(),
            source_type: SourceType::String,
            repeated: false,
            primary_key: true,
        }]
    }

    fn snapshot(rows: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..rows {
            writeln!(file, "{{\"publication_number\": \"US-{i}-A\"}}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn open_reports_total_rows() {
        let file = snapshot(7);
        let mut source = JsonlSource::new(file.path(), columns());

        let schema = source.open().await.unwrap();
        assert_eq!(schema.total_rows, Some(7));
        assert_eq!(schema.columns.len(), 1);
    }

    #[tokio::test]
    async fn fetches_in_cursor_order() {
        let file = snapshot(5);
        let mut source = JsonlSource::new(file.path(), columns());
        source.open().await.unwrap();

        let first = source.fetch(2, Cursor::default()).await.unwrap();
        assert_eq!(first.rows.len(), 2);
        assert!(!first.reached_end);
        assert_eq!(first.next_cursor.offset, 2);

        let rest = source.fetch(10, first.next_cursor).await.unwrap();
        assert_eq!(rest.rows.len(), 3);
        assert!(rest.reached_end);
        assert_eq!(
            rest.rows[0]["publication_number"],
            serde_json::json!("US-2-A")
        );
    }

    #[tokio::test]
    async fn resumes_from_an_arbitrary_offset() {
        let file = snapshot(10);
        let mut source = JsonlSource::new(file.path(), columns());
        source.open().await.unwrap();

        let result = source.fetch(4, Cursor::at(6)).await.unwrap();
        assert_eq!(result.rows.len(), 4);
        assert!(result.reached_end);
        assert_eq!(
            result.rows[0]["publication_number"],
            serde_json::json!("US-6-A")
        );
    }

    #[tokio::test]
    async fn blank_lines_count_toward_neither_totals_nor_the_cursor() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"publication_number\": \"US-0-A\"}}").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{\"publication_number\": \"US-1-A\"}}").unwrap();
        writeln!(file).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{\"publication_number\": \"US-2-A\"}}").unwrap();
        writeln!(file, "{{\"publication_number\": \"US-3-A\"}}").unwrap();
        file.flush().unwrap();

        let mut source = JsonlSource::new(file.path(), columns());
        let schema = source.open().await.unwrap();
        assert_eq!(schema.total_rows, Some(4));

        let first = source.fetch(2, Cursor::default()).await.unwrap();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.next_cursor.offset, 2);

        // A fresh source resuming at the same offset must skip exactly the
        // two delivered records, not two physical lines.
        let mut resumed = JsonlSource::new(file.path(), columns());
        let rest = resumed.fetch(10, first.next_cursor).await.unwrap();
        assert_eq!(rest.rows.len(), 2);
        assert_eq!(
            rest.rows[0]["publication_number"],
            serde_json::json!("US-2-A")
        );
        assert!(rest.reached_end);
    }

    #[tokio::test]
    async fn malformed_line_is_a_validation_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"publication_number\": \"US-0-A\"}}").unwrap();
        writeln!(file, "not json").unwrap();
        file.flush().unwrap();

        let mut source = JsonlSource::new(file.path(), columns());
        source.open().await.unwrap();

        let err = source.fetch(10, Cursor::default()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::MalformedRecord { line: 2, .. }));
    }

    #[tokio::test]
    async fn missing_file_fails_open() {
        let mut source = JsonlSource::new("/nonexistent/snapshot.jsonl", columns());
        assert!(source.open().await.is_err());
    }
}
