use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    ingestion_failures: AtomicU64,
    chunks_indexed: AtomicU64,
    queries_answered: AtomicU64,
    searches_performed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of an ingestion batch.
    pub fn record_ingestion(&self, succeeded: u64, failed: u64) {
        self.documents_ingested
            .fetch_add(succeeded, Ordering::Relaxed);
        self.ingestion_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record chunks written to the vector index.
    pub fn record_indexed(&self, chunk_count: u64) {
        self.chunks_indexed
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record an answered question and the number of searches it triggered.
    pub fn record_query(&self, searches: u64) {
        self.queries_answered.fetch_add(1, Ordering::Relaxed);
        self.searches_performed
            .fetch_add(searches, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            ingestion_failures: self.ingestion_failures.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
            searches_performed: self.searches_performed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents converted successfully since startup.
    pub documents_ingested: u64,
    /// Uploaded files skipped because conversion or I/O failed.
    pub ingestion_failures: u64,
    /// Chunks inserted into the vector index.
    pub chunks_indexed: u64,
    /// Questions answered by the agent.
    pub queries_answered: u64,
    /// Retrieval calls issued on behalf of those questions.
    pub searches_performed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_ingestion_and_queries() {
        let metrics = PipelineMetrics::new();
        metrics.record_ingestion(2, 1);
        metrics.record_indexed(7);
        metrics.record_query(2);
        metrics.record_query(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.ingestion_failures, 1);
        assert_eq!(snapshot.chunks_indexed, 7);
        assert_eq!(snapshot.queries_answered, 2);
        assert_eq!(snapshot.searches_performed, 3);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.snapshot().documents_ingested, 0);
        assert_eq!(metrics.snapshot().queries_answered, 0);
    }
}
