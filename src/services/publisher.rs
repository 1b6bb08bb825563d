//! Event publisher - delivers scan events off the frame loop
//!
//! The frame loop and the clip worker hand events over through a bounded
//! channel with `try_send`; when the queue is full the event is dropped and
//! counted, never waited on. The worker retries failed deliveries with
//! exponential backoff and gives up after the configured attempt count.

use crate::domain::scan::ScanEvent;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::event_sink::EventSink;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};

/// Retry schedule for failed deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.events_max_attempts().max(1),
            initial_backoff: Duration::from_millis(config.events_initial_backoff_ms()),
            max_backoff: Duration::from_millis(config.events_max_backoff_ms()),
        }
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Non-blocking handle used by producers
#[derive(Clone)]
pub struct PublisherHandle {
    tx: mpsc::Sender<ScanEvent>,
    metrics: Arc<Metrics>,
}

impl PublisherHandle {
    /// Queue an event; returns `false` if it had to be dropped
    pub fn publish(&self, event: ScanEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.metrics.record_event_dropped();
                warn!(eid = %event.eid, status = %event.status.as_str(), "event_queue_full");
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.metrics.record_event_dropped();
                warn!(eid = %event.eid, status = %event.status.as_str(), "event_publisher_closed");
                false
            }
        }
    }
}

/// Worker that owns the sink and the retry loop
pub struct EventPublisher {
    sink: Box<dyn EventSink>,
    rx: mpsc::Receiver<ScanEvent>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl EventPublisher {
    /// Run until every `PublisherHandle` is dropped and the queue is drained
    pub async fn run(mut self) {
        info!(sink = %self.sink.name(), max_attempts = %self.policy.max_attempts, "event_publisher_started");

        while let Some(event) = self.rx.recv().await {
            self.deliver_with_retry(&event).await;
        }

        info!("event_publisher_stopped");
    }

    /// Returns whether the event was delivered
    async fn deliver_with_retry(&self, event: &ScanEvent) -> bool {
        let start = Instant::now();
        let mut attempt = 1;
        loop {
            match self.sink.deliver(event).await {
                Ok(()) => {
                    self.metrics.record_event_delivered();
                    info!(
                        eid = %event.eid,
                        status = %event.status.as_str(),
                        clip_status = %event.clip_status.as_str(),
                        attempts = %attempt,
                        latency_ms = %start.elapsed().as_millis(),
                        "event_delivered"
                    );
                    return true;
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    self.metrics.record_event_failed();
                    error!(
                        eid = %event.eid,
                        status = %event.status.as_str(),
                        attempts = %attempt,
                        error = %e,
                        "event_delivery_failed"
                    );
                    return false;
                }
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        eid = %event.eid,
                        attempt = %attempt,
                        retry_in_ms = %delay.as_millis(),
                        error = %e,
                        "event_delivery_retry"
                    );
                    self.metrics.record_event_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Create the publish channel and worker
///
/// Returns the handle (for producers) and the worker (to be spawned)
pub fn create_event_publisher(
    sink: Box<dyn EventSink>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
    queue_size: usize,
) -> (PublisherHandle, EventPublisher) {
    let (tx, rx) = mpsc::channel(queue_size.max(1));
    let handle = PublisherHandle { tx, metrics: metrics.clone() };
    let worker = EventPublisher { sink, rx, policy, metrics };
    (handle, worker)
}
