use crate::record::RawRecord;
use serde::{Deserialize, Serialize};

/// Resume position into the source row stream. Constructed from a stored
/// checkpoint on restart, advanced by the extractor as chunks are yielded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub offset: u64,
}

impl Cursor {
    pub fn at(offset: u64) -> Self {
        Cursor { offset }
    }

    pub fn advance(&self, rows: u64) -> Self {
        Cursor {
            offset: self.offset + rows,
        }
    }
}

/// One bounded unit of extracted rows, the unit of prefetch and of
/// checkpoint granularity. Sequence numbers are gapless and strictly
/// increasing within a run.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub seq: u64,
    pub rows: Vec<RawRecord>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of one source fetch call.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub rows: Vec<RawRecord>,
    pub next_cursor: Cursor,
    pub reached_end: bool,
}
