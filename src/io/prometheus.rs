//! Prometheus text exposition of the runtime metrics
//!
//! Served at `/metrics` by the control server. Every sample carries a
//! `camera` label so several doors can share one Prometheus job.

use crate::infra::metrics::{LatencySnapshot, Metrics, MetricsSummary, LATENCY_BOUNDS_US};
use std::fmt::{Display, Write};

/// Text exposition buffer for one camera
struct Exposition {
    out: String,
    camera: String,
}

impl Exposition {
    fn new(camera: &str) -> Self {
        Self { out: String::with_capacity(4096), camera: camera.to_string() }
    }

    fn header(&mut self, name: &str, kind: &str, help: &str) {
        let _ = writeln!(self.out, "# HELP {name} {help}");
        let _ = writeln!(self.out, "# TYPE {name} {kind}");
    }

    fn sample(&mut self, name: &str, extra: Option<(&str, &str)>, value: impl Display) {
        let camera = &self.camera;
        let _ = match extra {
            Some((key, label)) => {
                writeln!(self.out, "{name}{{camera=\"{camera}\",{key}=\"{label}\"}} {value}")
            }
            None => writeln!(self.out, "{name}{{camera=\"{camera}\"}} {value}"),
        };
    }

    fn counter(&mut self, name: &str, help: &str, value: u64) {
        self.header(name, "counter", help);
        self.sample(name, None, value);
    }

    fn gauge(&mut self, name: &str, help: &str, value: impl Display) {
        self.header(name, "gauge", help);
        self.sample(name, None, value);
    }

    /// Counter family split by one extra label
    fn counter_by(&mut self, name: &str, help: &str, key: &str, values: &[(&str, u64)]) {
        self.header(name, "counter", help);
        for &(label, value) in values {
            self.sample(name, Some((key, label)), value);
        }
    }

    fn histogram(&mut self, name: &str, help: &str, latency: &LatencySnapshot) {
        self.header(name, "histogram", help);
        let bucket = format!("{name}_bucket");
        let mut cumulative = 0u64;
        for (count, bound) in latency.buckets.iter().zip(LATENCY_BOUNDS_US) {
            cumulative += count;
            let le = bound.to_string();
            self.sample(&bucket, Some(("le", le.as_str())), cumulative);
        }
        self.sample(&bucket, Some(("le", "+Inf")), latency.count());
        self.sample(&format!("{name}_sum"), None, latency.sum_us);
        self.sample(&format!("{name}_count"), None, latency.count());
    }
}

/// Format metrics in Prometheus text exposition format
///
/// Histogram and rate values cover the interval since the previous report.
pub fn format_prometheus_metrics(metrics: &Metrics, camera_id: &str) -> String {
    let summary = metrics.report();
    let mut exp = Exposition::new(camera_id);

    write_frame_metrics(&mut exp, &summary);
    write_scan_metrics(&mut exp, &summary);
    write_delivery_metrics(&mut exp, &summary);

    exp.out
}

fn write_frame_metrics(exp: &mut Exposition, summary: &MetricsSummary) {
    exp.counter("entry_guard_frames_total", "Total frames processed", summary.frames_total);
    exp.gauge(
        "entry_guard_frames_per_sec",
        "Frames processed per second",
        format!("{:.2}", summary.frames_per_sec),
    );
    exp.histogram(
        "entry_guard_frame_latency_us",
        "Per-frame processing latency in microseconds",
        &summary.frame_latency,
    );
    exp.gauge(
        "entry_guard_frame_latency_p99_us",
        "99th percentile frame latency",
        summary.frame_latency.quantile_us(0.99),
    );
    exp.counter(
        "entry_guard_tracker_errors_total",
        "Tracker calls that failed",
        summary.tracker_errors,
    );
}

fn write_scan_metrics(exp: &mut Exposition, summary: &MetricsSummary) {
    exp.gauge("entry_guard_scanning", "1 while a scan window is open", summary.scanning);
    exp.counter(
        "entry_guard_triggers_received_total",
        "Scan triggers received",
        summary.triggers_received,
    );
    exp.counter(
        "entry_guard_triggers_coalesced_total",
        "Triggers folded into a pending trigger",
        summary.triggers_coalesced,
    );
    exp.counter(
        "entry_guard_triggers_accepted_total",
        "Triggers that opened a scan window",
        summary.triggers_accepted,
    );
    exp.counter(
        "entry_guard_triggers_ignored_total",
        "Triggers that arrived during a scan",
        summary.triggers_ignored,
    );
    exp.counter_by(
        "entry_guard_scans_total",
        "Closed scan windows by verdict",
        "status",
        &[("verified", summary.scans_verified), ("unauthorized", summary.scans_unauthorized)],
    );
}

fn write_delivery_metrics(exp: &mut Exposition, summary: &MetricsSummary) {
    exp.counter_by(
        "entry_guard_clips_total",
        "Clip exports by outcome",
        "outcome",
        &[
            ("stored", summary.clips_stored),
            ("failed", summary.clips_failed),
            ("dropped", summary.clips_dropped),
        ],
    );
    exp.counter_by(
        "entry_guard_events_total",
        "Event deliveries by outcome",
        "outcome",
        &[
            ("delivered", summary.events_delivered),
            ("failed", summary.events_failed),
            ("dropped", summary.events_dropped),
        ],
    );
    exp.counter(
        "entry_guard_event_retries_total",
        "Event delivery retries",
        summary.event_retries,
    );
}
