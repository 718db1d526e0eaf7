use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_ingest_time_us: AtomicU64,
    total_search_time_us: AtomicU64,
    total_recommend_time_us: AtomicU64,
    total_multi_search_time_us: AtomicU64,

    // Counts
    ingest_runs: AtomicUsize,
    searches: AtomicUsize,
    recommendations: AtomicUsize,
    multi_searches: AtomicUsize,
    total_documents_ingested: AtomicUsize,
    total_chunks_indexed: AtomicUsize,
    total_hits_returned: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Search,
    Recommend,
    MultiSearch,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ingest(&self, duration: Duration, documents: usize, chunks: usize) {
        self.total_ingest_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.ingest_runs.fetch_add(1, Ordering::Relaxed);
        self.total_documents_ingested
            .fetch_add(documents, Ordering::Relaxed);
        self.total_chunks_indexed.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn record_query(&self, kind: QueryKind, duration: Duration, hits: usize) {
        let (time, count) = match kind {
            QueryKind::Search => (&self.total_search_time_us, &self.searches),
            QueryKind::Recommend => (&self.total_recommend_time_us, &self.recommendations),
            QueryKind::MultiSearch => (&self.total_multi_search_time_us, &self.multi_searches),
        };
        time.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        count.fetch_add(1, Ordering::Relaxed);
        self.total_hits_returned.fetch_add(hits, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_ingest_time_ms: avg_time_ms(&self.total_ingest_time_us, &self.ingest_runs),
            avg_search_time_ms: avg_time_ms(&self.total_search_time_us, &self.searches),
            avg_recommend_time_ms: avg_time_ms(&self.total_recommend_time_us, &self.recommendations),
            avg_multi_search_time_ms: avg_time_ms(&self.total_multi_search_time_us, &self.multi_searches),
            searches: self.searches.load(Ordering::Relaxed),
            recommendations: self.recommendations.load(Ordering::Relaxed),
            multi_searches: self.multi_searches.load(Ordering::Relaxed),
            total_documents_ingested: self.total_documents_ingested.load(Ordering::Relaxed),
            total_chunks_indexed: self.total_chunks_indexed.load(Ordering::Relaxed),
            total_hits_returned: self.total_hits_returned.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_ingest_time_ms: f64,
    pub avg_search_time_ms: f64,
    pub avg_recommend_time_ms: f64,
    pub avg_multi_search_time_ms: f64,
    pub searches: usize,
    pub recommendations: usize,
    pub multi_searches: usize,
    pub total_documents_ingested: usize,
    pub total_chunks_indexed: usize,
    pub total_hits_returned: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let metrics = Metrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_query(QueryKind::Search, Duration::from_millis(4), 10);
        metrics.record_query(QueryKind::Search, Duration::from_millis(2), 5);
        metrics.record_ingest(Duration::from_millis(30), 2, 12);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.searches, 2);
        assert!((snapshot.avg_search_time_ms - 3.0).abs() < 1e-9);
        assert!((snapshot.avg_ingest_time_ms - 30.0).abs() < 1e-9);
        assert_eq!(snapshot.avg_recommend_time_ms, 0.0);
        assert_eq!(snapshot.total_hits_returned, 15);
        assert_eq!(snapshot.total_chunks_indexed, 12);
    }
}
