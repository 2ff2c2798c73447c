use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub events_in: u64,
    pub replies_out: u64,
    pub duplicates_skipped: u64,
    pub verify_failures: u64,
    pub upstream_errors: u64,
    pub send_errors: u64,
}

#[derive(Debug)]
pub struct MetricsStore {
    start_time: Instant,
    events_in: AtomicU64,
    replies_out: AtomicU64,
    duplicates_skipped: AtomicU64,
    verify_failures: AtomicU64,
    upstream_errors: AtomicU64,
    send_errors: AtomicU64,
}

impl MetricsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            events_in: AtomicU64::new(0),
            replies_out: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            verify_failures: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        })
    }

    pub fn inc_events_in(&self) {
        self.events_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies_out(&self) {
        self.replies_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates_skipped(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_verify_failures(&self) {
        self.verify_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_upstream_errors(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_errors(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            events_in: self.events_in.load(Ordering::Relaxed),
            replies_out: self.replies_out.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            verify_failures: self.verify_failures.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}
