use crate::error::ConnectorError;
use async_trait::async_trait;
use model::{
    chunk::{Cursor, FetchResult},
    schema::SourceColumn,
};
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod jsonl;
pub mod memory;

/// Column descriptors and, when the source can report it cheaply, the total
/// row count used for progress percentages.
#[derive(Debug, Clone)]
pub struct SourceSchema {
    pub columns: Vec<SourceColumn>,
    pub total_rows: Option<u64>,
}

/// A restartable row stream. `open` is called once per run and doubles as
/// the connectivity/credential check; `fetch` is position-addressed so a
/// resumed run can skip committed rows without re-materializing them.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn open(&mut self) -> Result<SourceSchema, ConnectorError>;

    async fn fetch(
        &mut self,
        chunk_size: usize,
        cursor: Cursor,
    ) -> Result<FetchResult, ConnectorError>;
}

/// Cloneable handle over a row source, so retry wrappers and the producer
/// task can share one underlying stream.
#[derive(Clone)]
pub struct Source {
    inner: Arc<Mutex<dyn RowSource>>,
}

impl Source {
    pub fn new(source: impl RowSource + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    pub async fn open(&self) -> Result<SourceSchema, ConnectorError> {
        self.inner.lock().await.open().await
    }

    pub async fn fetch(
        &self,
        chunk_size: usize,
        cursor: Cursor,
    ) -> Result<FetchResult, ConnectorError> {
        self.inner.lock().await.fetch(chunk_size, cursor).await
    }
}
