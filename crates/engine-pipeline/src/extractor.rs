use connectors::{error::ConnectorError, source::Source};
use model::chunk::{Chunk, Cursor};
use tracing::{debug, info};

/// Pulls the source row stream as a lazy, finite sequence of chunks with
/// gapless, strictly increasing sequence numbers. Holds its own resume
/// position, so restart is just construction from a stored offset.
pub struct SourceExtractor {
    source: Source,
    chunk_size: usize,
    cursor: Cursor,
    next_seq: u64,
    rows_yielded: u64,
    row_cap: Option<u64>,
    finished: bool,
}

impl SourceExtractor {
    pub fn new(
        source: Source,
        chunk_size: usize,
        row_cap: Option<u64>,
        resume_cursor: Cursor,
        first_seq: u64,
    ) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            cursor: resume_cursor,
            next_seq: first_seq,
            rows_yielded: 0,
            row_cap,
            finished: false,
        }
    }

    /// Returns the next chunk, or `None` once the stream ends or the safety
    /// row cap is reached. The cap truncates the final chunk rather than
    /// dropping it.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, ConnectorError> {
        if self.finished {
            return Ok(None);
        }

        let mut want = self.chunk_size;
        if let Some(cap) = self.row_cap {
            let remaining = cap.saturating_sub(self.rows_yielded);
            if remaining == 0 {
                info!(cap, "Safety row cap reached, stopping extraction.");
                self.finished = true;
                return Ok(None);
            }
            want = want.min(remaining as usize);
        }

        let result = self.source.fetch(want, self.cursor).await?;
        if result.rows.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        self.cursor = result.next_cursor;
        self.rows_yielded += result.rows.len() as u64;
        if result.reached_end || self.row_cap.is_some_and(|cap| self.rows_yielded >= cap) {
            self.finished = true;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(seq, rows = result.rows.len(), "Extracted chunk.");

        Ok(Some(Chunk {
            seq,
            rows: result.rows,
        }))
    }
}
