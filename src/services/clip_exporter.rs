//! Clip export worker
//!
//! Receives the buffer snapshot of every unauthorized scan, writes it through
//! the clip sink on the blocking pool, and only then publishes the scan event
//! with the clip outcome attached. An event therefore never points at a clip
//! that was not written.

use crate::domain::scan::{ScanEvent, ScanResult};
use crate::domain::types::Frame;
use crate::infra::metrics::Metrics;
use crate::io::clip_sink::ClipSink;
use crate::services::publisher::PublisherHandle;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};

/// One flagged scan and the frames to export for it
#[derive(Debug)]
pub struct ClipJob {
    pub result: ScanResult,
    /// Oldest first
    pub frames: Vec<Frame>,
    pub fps: u32,
}

/// Producer side of the clip queue, owned by the frame loop
#[derive(Clone)]
pub struct ClipQueue {
    tx: mpsc::Sender<ClipJob>,
    publisher: PublisherHandle,
    metrics: Arc<Metrics>,
}

impl ClipQueue {
    /// Enqueue a job without waiting
    ///
    /// When the export queue is full the clip is abandoned, but the scan
    /// verdict is still published with a failed clip status.
    pub fn submit(&self, job: ClipJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                self.metrics.record_clip_dropped();
                warn!(
                    camera_id = %job.result.camera_id,
                    frames = %job.frames.len(),
                    "clip_job_dropped"
                );
                self.publisher.publish(ScanEvent::clip_failed(&job.result));
                false
            }
        }
    }
}

pub struct ClipExporter {
    sink: Arc<dyn ClipSink>,
    rx: mpsc::Receiver<ClipJob>,
    publisher: PublisherHandle,
    metrics: Arc<Metrics>,
}

impl ClipExporter {
    /// Run until the queue closes and every pending job is exported
    pub async fn run(mut self) {
        info!("clip_exporter_started");

        while let Some(job) = self.rx.recv().await {
            let event = self.export(job).await;
            self.publisher.publish(event);
        }

        info!("clip_exporter_stopped");
    }

    async fn export(&self, job: ClipJob) -> ScanEvent {
        let ClipJob { result, frames, fps } = job;
        let Some(key) = result.clip_reference.clone() else {
            // Only flagged scans reach the exporter
            warn!(camera_id = %result.camera_id, "clip_job_without_reference");
            return ScanEvent::verified(&result);
        };

        let start = Instant::now();
        let frame_count = frames.len();
        let sink = self.sink.clone();
        let blocking_key = key.clone();
        let outcome =
            tokio::task::spawn_blocking(move || sink.write_clip(&blocking_key, &frames, fps)).await;

        match outcome {
            Ok(Ok(path)) => {
                self.metrics.record_clip(true);
                info!(
                    clip = %key,
                    path = %path,
                    frames = %frame_count,
                    fps = %fps,
                    duration_ms = %start.elapsed().as_millis(),
                    "clip_exported"
                );
                ScanEvent::with_clip(&result, path)
            }
            Ok(Err(e)) => {
                self.metrics.record_clip(false);
                error!(clip = %key, frames = %frame_count, error = %e, "clip_export_failed");
                ScanEvent::clip_failed(&result)
            }
            Err(e) => {
                self.metrics.record_clip(false);
                error!(clip = %key, error = %e, "clip_export_panicked");
                ScanEvent::clip_failed(&result)
            }
        }
    }
}

/// Create the clip queue and worker
///
/// Returns the queue (for the frame loop) and the worker (to be spawned)
pub fn create_clip_exporter(
    sink: Arc<dyn ClipSink>,
    publisher: PublisherHandle,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (ClipQueue, ClipExporter) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let queue = ClipQueue { tx, publisher: publisher.clone(), metrics: metrics.clone() };
    let worker = ClipExporter { sink, rx, publisher, metrics };
    (queue, worker)
}
