//! In-process metrics for the admin scrape endpoint.
//!
//! Counters are plain atomics and lock-free `scc` maps so the hot path never
//! blocks; the registry is built once at startup and shared by reference.
use std::{
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::Instant,
};

use scc::HashMap;

/// Global metrics registry, rendered in Prometheus text format on scrape.
pub struct MetricsRegistry {
    requests_total: AtomicU64,
    in_flight: AtomicI64,
    responses_by_status: HashMap<u16, AtomicU64>,
    upstream_attempts: HashMap<String, AtomicU64>,
    upstream_failures: HashMap<String, AtomicU64>,
    upstream_retries: AtomicU64,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            in_flight: AtomicI64::new(0),
            responses_by_status: HashMap::new(),
            upstream_attempts: HashMap::new(),
            upstream_failures: HashMap::new(),
            upstream_retries: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_request_start(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self, status: u16) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        increment(&self.responses_by_status, status);
    }

    pub fn record_upstream_attempt(&self, target: &str) {
        increment(&self.upstream_attempts, target.to_string());
    }

    pub fn record_upstream_retry(&self) {
        self.upstream_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self, target: &str) {
        increment(&self.upstream_failures, target.to_string());
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        use std::fmt::Write;

        let mut output = String::with_capacity(2048);

        output.push_str("# HELP myelin_uptime_seconds Server uptime in seconds\n");
        output.push_str("# TYPE myelin_uptime_seconds gauge\n");
        let _ = writeln!(output, "myelin_uptime_seconds {}", self.uptime_secs());

        output.push_str("# HELP myelin_requests_total Requests accepted\n");
        output.push_str("# TYPE myelin_requests_total counter\n");
        let _ = writeln!(output, "myelin_requests_total {}", self.requests_total());

        output.push_str("# HELP myelin_requests_in_flight Requests currently being served\n");
        output.push_str("# TYPE myelin_requests_in_flight gauge\n");
        let _ = writeln!(
            output,
            "myelin_requests_in_flight {}",
            self.in_flight.load(Ordering::Relaxed).max(0)
        );

        output.push_str("# HELP myelin_responses_total Responses by status code\n");
        output.push_str("# TYPE myelin_responses_total counter\n");
        let mut by_status = Vec::new();
        self.responses_by_status.iter_sync(|status, count| {
            by_status.push((*status, count.load(Ordering::Relaxed)));
            true
        });
        by_status.sort_unstable();
        for (status, count) in by_status {
            let _ = writeln!(output, "myelin_responses_total{{status=\"{status}\"}} {count}");
        }

        output.push_str("# HELP myelin_upstream_attempts_total Forward attempts per target\n");
        output.push_str("# TYPE myelin_upstream_attempts_total counter\n");
        let mut attempts = Vec::new();
        self.upstream_attempts.iter_sync(|target, count| {
            attempts.push((target.clone(), count.load(Ordering::Relaxed)));
            true
        });
        attempts.sort_unstable();
        for (target, count) in attempts {
            let _ = writeln!(
                output,
                "myelin_upstream_attempts_total{{target=\"{target}\"}} {count}"
            );
        }

        output.push_str("# HELP myelin_upstream_failures_total Failed forward attempts per target\n");
        output.push_str("# TYPE myelin_upstream_failures_total counter\n");
        let mut failures = Vec::new();
        self.upstream_failures.iter_sync(|target, count| {
            failures.push((target.clone(), count.load(Ordering::Relaxed)));
            true
        });
        failures.sort_unstable();
        for (target, count) in failures {
            let _ = writeln!(
                output,
                "myelin_upstream_failures_total{{target=\"{target}\"}} {count}"
            );
        }

        output.push_str("# HELP myelin_upstream_retries_total Retries after forwarding failures\n");
        output.push_str("# TYPE myelin_upstream_retries_total counter\n");
        let _ = writeln!(
            output,
            "myelin_upstream_retries_total {}",
            self.upstream_retries.load(Ordering::Relaxed)
        );

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn increment<K>(map: &HashMap<K, AtomicU64>, key: K)
where
    K: std::hash::Hash + Eq + 'static,
{
    match map.entry_sync(key) {
        scc::hash_map::Entry::Occupied(entry) => {
            entry.get().fetch_add(1, Ordering::Relaxed);
        }
        scc::hash_map::Entry::Vacant(entry) => {
            entry.insert_entry(AtomicU64::new(1));
        }
    }
}
