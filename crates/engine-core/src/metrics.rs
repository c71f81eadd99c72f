use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    rows_extracted: AtomicU64,
    rows_loaded: AtomicU64,
    rows_failed: AtomicU64,
    chunks_extracted: AtomicU64,
    batches_loaded: AtomicU64,
    retry_count: AtomicU64,
}

/// Running totals for one job, shared between the producer and consumer
/// tasks and snapshotted for progress events.
#[derive(Debug, Clone, Default)]
pub struct JobMetrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub rows_extracted: u64,
    pub rows_loaded: u64,
    pub rows_failed: u64,
    pub chunks_extracted: u64,
    pub batches_loaded: u64,
    pub retry_count: u64,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_extracted(&self, rows: u64) {
        self.inner.rows_extracted.fetch_add(rows, Ordering::Relaxed);
        self.inner.chunks_extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_loaded(&self, rows: u64) {
        self.inner.rows_loaded.fetch_add(rows, Ordering::Relaxed);
        self.inner.batches_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed(&self, rows: u64) {
        self.inner.rows_failed.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_extracted: self.inner.rows_extracted.load(Ordering::Relaxed),
            rows_loaded: self.inner.rows_loaded.load(Ordering::Relaxed),
            rows_failed: self.inner.rows_failed.load(Ordering::Relaxed),
            chunks_extracted: self.inner.chunks_extracted.load(Ordering::Relaxed),
            batches_loaded: self.inner.batches_loaded.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let metrics = JobMetrics::new();
        let shared = metrics.clone();

        metrics.add_extracted(50_000);
        shared.add_loaded(10_000);
        shared.add_failed(5);

        let snap = metrics.snapshot();
        assert_eq!(snap.rows_extracted, 50_000);
        assert_eq!(snap.chunks_extracted, 1);
        assert_eq!(snap.rows_loaded, 10_000);
        assert_eq!(snap.batches_loaded, 1);
        assert_eq!(snap.rows_failed, 5);
    }
}
