//! Runtime counters for the cache and decode pipeline.
//!
//! The coordinator records every cache lookup, decode latency, failure, and eviction
//! here; `snapshot` turns them into a serialisable report for diagnostics overlays or logs.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::warn;

const DEFAULT_SAMPLE_CAPACITY: usize = 240;

#[derive(Debug, Default)]
struct SampleWindow {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl SampleWindow {
    fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    fn push(&mut self, value: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn percentile(&self, percentile: f32) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f32> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let rank = percentile.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
        let index = rank.round() as usize;
        sorted.get(index).copied().unwrap_or(0.0)
    }
}

#[derive(Debug)]
struct StatsInner {
    started_at: Instant,
    decode_times_ms: SampleWindow,
    cache_requests: u64,
    cache_hits: u64,
    decodes_started: u64,
    decode_failures: u64,
    evictions: u64,
    cache_bytes_used: u64,
    cache_bytes_capacity: u64,
    pending_decodes: usize,
}

impl Default for StatsInner {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            decode_times_ms: SampleWindow::new(DEFAULT_SAMPLE_CAPACITY),
            cache_requests: 0,
            cache_hits: 0,
            decodes_started: 0,
            decode_failures: 0,
            evictions: 0,
            cache_bytes_used: 0,
            cache_bytes_capacity: 0,
            pending_decodes: 0,
        }
    }
}

/// Thread-safe counter collection shared by the coordinator and its workers.
#[derive(Debug, Default)]
pub struct StatsCollector {
    inner: parking_lot::Mutex<StatsInner>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether a cache lookup produced a hit.
    pub fn record_cache_lookup(&self, hit: bool) {
        let mut guard = self.inner.lock();
        guard.cache_requests = guard.cache_requests.saturating_add(1);
        if hit {
            guard.cache_hits = guard.cache_hits.saturating_add(1);
        }
    }

    pub fn record_decode_started(&self) {
        let mut guard = self.inner.lock();
        guard.decodes_started = guard.decodes_started.saturating_add(1);
    }

    /// Record the wall time of a successful probe-and-decode.
    pub fn record_decode(&self, duration: Duration) {
        let mut guard = self.inner.lock();
        guard.decode_times_ms.push(duration.as_secs_f64() as f32 * 1_000.0);
    }

    pub fn record_decode_failure(&self) {
        let mut guard = self.inner.lock();
        guard.decode_failures = guard.decode_failures.saturating_add(1);
    }

    /// Update the cache usage gauges and the running eviction total.
    pub fn update_cache_usage(&self, used_bytes: u64, capacity_bytes: u64, evictions: u64) {
        let mut guard = self.inner.lock();
        guard.cache_bytes_used = used_bytes;
        guard.cache_bytes_capacity = capacity_bytes;
        guard.evictions = evictions;
    }

    pub fn update_pending_decodes(&self, pending: usize) {
        let mut guard = self.inner.lock();
        guard.pending_decodes = pending;
    }

    /// Generate a snapshot of the current counters.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let guard = self.inner.lock();

        let cache_requests = guard.cache_requests.max(1);
        let cache_hit_ratio = guard.cache_hits as f32 / cache_requests as f32;

        PipelineSnapshot {
            timestamp_ms: now_ms(),
            uptime_ms: guard.started_at.elapsed().as_millis() as u64,
            decode_time_ms_p50: guard.decode_times_ms.percentile(0.50),
            decode_time_ms_p95: guard.decode_times_ms.percentile(0.95),
            cache_hit_ratio,
            cache_requests: guard.cache_requests,
            cache_hits: guard.cache_hits,
            decodes_started: guard.decodes_started,
            decode_failures: guard.decode_failures,
            evictions: guard.evictions,
            cache_bytes_used: guard.cache_bytes_used,
            cache_bytes_capacity: guard.cache_bytes_capacity,
            pending_decodes: guard.pending_decodes,
        }
    }
}

fn now_ms() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(delta) => delta.as_millis() as u64,
        Err(err) => {
            warn!(target: "stats", "system clock error: {err}");
            0
        }
    }
}

/// Immutable view of the counters at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub timestamp_ms: u64,
    pub uptime_ms: u64,
    pub decode_time_ms_p50: f32,
    pub decode_time_ms_p95: f32,
    pub cache_hit_ratio: f32,
    pub cache_requests: u64,
    pub cache_hits: u64,
    pub decodes_started: u64,
    pub decode_failures: u64,
    pub evictions: u64,
    pub cache_bytes_used: u64,
    pub cache_bytes_capacity: u64,
    pub pending_decodes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_percentiles_are_computed() {
        let collector = StatsCollector::new();
        collector.record_decode(Duration::from_millis(10));
        collector.record_decode(Duration::from_millis(20));
        collector.record_decode(Duration::from_millis(30));

        let snap = collector.snapshot();
        assert!(snap.decode_time_ms_p50 >= 19.0 && snap.decode_time_ms_p50 <= 21.0);
        assert!(snap.decode_time_ms_p95 >= snap.decode_time_ms_p50);
    }

    #[test]
    fn cache_metrics_are_tracked() {
        let collector = StatsCollector::new();
        collector.record_cache_lookup(true);
        collector.record_cache_lookup(false);
        collector.record_decode_started();
        collector.record_decode_failure();
        collector.update_cache_usage(16 * 1024 * 1024, 64 * 1024 * 1024, 3);
        collector.update_pending_decodes(2);

        let snap = collector.snapshot();
        assert_eq!(snap.cache_requests, 2);
        assert_eq!(snap.cache_hits, 1);
        assert!(snap.cache_hit_ratio > 0.0 && snap.cache_hit_ratio < 1.0);
        assert_eq!(snap.decodes_started, 1);
        assert_eq!(snap.decode_failures, 1);
        assert_eq!(snap.evictions, 3);
        assert_eq!(snap.cache_bytes_used, 16 * 1024 * 1024);
        assert_eq!(snap.pending_decodes, 2);

        let json = serde_json::to_value(&snap).expect("serialise snapshot");
        assert_eq!(json["cache_requests"], 2);
    }
}
