//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations so the frame loop never waits on a
//! lock. Reporting swaps the periodic counters to get a consistent snapshot.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are
//! statistical counters only; nothing coordinates through them.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Upper bounds of the frame latency buckets in microseconds, doubling
/// from 250us; anything slower lands in a final overflow bucket
pub const LATENCY_BOUNDS_US: [u64; 10] = [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000];
pub const LATENCY_BUCKETS: usize = LATENCY_BOUNDS_US.len() + 1;

/// Lock-free latency histogram with sum and max, drained on report
struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS],
    sum_us: AtomicU64,
    max_us: AtomicU64,
}

/// Drained contents of a `LatencyHistogram`
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencySnapshot {
    pub buckets: [u64; LATENCY_BUCKETS],
    pub sum_us: u64,
    pub max_us: u64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record(&self, latency_us: u64) {
        let idx = LATENCY_BOUNDS_US.partition_point(|&bound| bound < latency_us);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.max_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    fn drain(&self) -> LatencySnapshot {
        LatencySnapshot {
            buckets: std::array::from_fn(|i| self.buckets[i].swap(0, Ordering::Relaxed)),
            sum_us: self.sum_us.swap(0, Ordering::Relaxed),
            max_us: self.max_us.swap(0, Ordering::Relaxed),
        }
    }
}

impl LatencySnapshot {
    pub fn count(&self) -> u64 {
        self.buckets.iter().sum()
    }

    pub fn mean_us(&self) -> u64 {
        self.sum_us.checked_div(self.count()).unwrap_or(0)
    }

    /// Upper bound of the bucket holding the given quantile
    ///
    /// The overflow bucket reports twice the last bound.
    pub fn quantile_us(&self, q: f64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }
        let target = ((total as f64) * q).ceil().max(1.0) as u64;
        let mut seen = 0u64;
        for (i, &count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= target {
                return LATENCY_BOUNDS_US.get(i).copied().unwrap_or(LATENCY_BOUNDS_US[9] * 2);
            }
        }
        LATENCY_BOUNDS_US[9] * 2
    }
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Total frames processed (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Per-frame processing latency (reset on report)
    frame_latency: LatencyHistogram,
    /// Tracker calls that returned an error
    tracker_errors: AtomicU64,
    /// Trigger requests received over HTTP
    triggers_received: AtomicU64,
    /// Triggers folded into an already-pending trigger
    triggers_coalesced: AtomicU64,
    /// Triggers that started a scan
    triggers_accepted: AtomicU64,
    /// Triggers consumed while a scan was already running
    triggers_ignored: AtomicU64,
    /// 1 while a scan window is open
    scanning: AtomicU64,
    scans_verified: AtomicU64,
    scans_unauthorized: AtomicU64,
    clips_stored: AtomicU64,
    clips_failed: AtomicU64,
    /// Clip jobs dropped because the export queue was full
    clips_dropped: AtomicU64,
    events_delivered: AtomicU64,
    /// Events that exhausted every delivery attempt
    events_failed: AtomicU64,
    /// Events dropped because the publish queue was full
    events_dropped: AtomicU64,
    /// Delivery retries (attempts beyond the first)
    event_retries: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            frame_latency: LatencyHistogram::new(),
            tracker_errors: AtomicU64::new(0),
            triggers_received: AtomicU64::new(0),
            triggers_coalesced: AtomicU64::new(0),
            triggers_accepted: AtomicU64::new(0),
            triggers_ignored: AtomicU64::new(0),
            scanning: AtomicU64::new(0),
            scans_verified: AtomicU64::new(0),
            scans_unauthorized: AtomicU64::new(0),
            clips_stored: AtomicU64::new(0),
            clips_failed: AtomicU64::new(0),
            clips_dropped: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            event_retries: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    /// Record a frame was fully processed with given latency (lock-free)
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.frame_latency.record(latency_us);
    }

    #[inline]
    pub fn record_tracker_error(&self) {
        self.tracker_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound trigger; `coalesced` when one was already pending
    #[inline]
    pub fn record_trigger_received(&self, coalesced: bool) {
        self.triggers_received.fetch_add(1, Ordering::Relaxed);
        if coalesced {
            self.triggers_coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_trigger_accepted(&self) {
        self.triggers_accepted.fetch_add(1, Ordering::Relaxed);
        self.scanning.store(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trigger_ignored(&self) {
        self.triggers_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed scan window
    #[inline]
    pub fn record_scan_closed(&self, unauthorized: bool) {
        self.scanning.store(0, Ordering::Relaxed);
        if unauthorized {
            self.scans_unauthorized.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scans_verified.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_clip(&self, stored: bool) {
        if stored {
            self.clips_stored.fetch_add(1, Ordering::Relaxed);
        } else {
            self.clips_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_clip_dropped(&self) {
        self.clips_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_retry(&self) {
        self.event_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Relaxed) == 1
    }

    #[inline]
    pub fn scans_unauthorized(&self) -> u64 {
        self.scans_unauthorized.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn scans_verified(&self) -> u64 {
        self.scans_verified.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn triggers_ignored(&self) -> u64 {
        self.triggers_ignored.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn event_retries(&self) -> u64 {
        self.event_retries.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn clips_stored(&self) -> u64 {
        self.clips_stored.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn clips_failed(&self) -> u64 {
        self.clips_failed.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let frame_latency = self.frame_latency.drain();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_per_sec,
            frame_latency,
            tracker_errors: self.tracker_errors.load(Ordering::Relaxed),
            triggers_received: self.triggers_received.load(Ordering::Relaxed),
            triggers_coalesced: self.triggers_coalesced.load(Ordering::Relaxed),
            triggers_accepted: self.triggers_accepted.load(Ordering::Relaxed),
            triggers_ignored: self.triggers_ignored.load(Ordering::Relaxed),
            scanning: self.scanning.load(Ordering::Relaxed),
            scans_verified: self.scans_verified.load(Ordering::Relaxed),
            scans_unauthorized: self.scans_unauthorized.load(Ordering::Relaxed),
            clips_stored: self.clips_stored.load(Ordering::Relaxed),
            clips_failed: self.clips_failed.load(Ordering::Relaxed),
            clips_dropped: self.clips_dropped.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            event_retries: self.event_retries.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    /// Frame processing latency since the previous report
    pub frame_latency: LatencySnapshot,
    pub tracker_errors: u64,
    pub triggers_received: u64,
    pub triggers_coalesced: u64,
    pub triggers_accepted: u64,
    pub triggers_ignored: u64,
    /// 1 while a scan window is open
    pub scanning: u64,
    pub scans_verified: u64,
    pub scans_unauthorized: u64,
    pub clips_stored: u64,
    pub clips_failed: u64,
    pub clips_dropped: u64,
    pub events_delivered: u64,
    pub events_failed: u64,
    pub events_dropped: u64,
    pub event_retries: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            fps = format!("{:.1}", self.frames_per_sec),
            avg_latency_us = %self.frame_latency.mean_us(),
            max_latency_us = %self.frame_latency.max_us,
            p99_us = %self.frame_latency.quantile_us(0.99),
            scans_verified = %self.scans_verified,
            scans_unauthorized = %self.scans_unauthorized,
            triggers_ignored = %self.triggers_ignored,
            clips_failed = %self.clips_failed,
            events_failed = %self.events_failed,
            events_dropped = %self.events_dropped,
            "metrics"
        );
    }
}
