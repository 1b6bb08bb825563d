//! Frame loop - the sequential core of the pipeline
//!
//! Each frame is fully handled before the next one is pulled:
//! - track: detections from the object tracker (errors count as an empty frame)
//! - filter: ids whose centroid is inside the entry zone
//! - trigger: consume a pending scan request, if any
//! - buffer: append the frame to the rolling buffer
//! - update: advance the scan state machine; on close, hand the result off
//!
//! The buffer is appended before the update, so the clip of a flagged scan
//! ends with the frame that closed the window.

mod handlers;

use crate::domain::scan::ScanResult;
use crate::domain::types::{Detection, Frame};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::source::{FrameSource, FrameSourceError, ObjectTracker};
use crate::services::clip_exporter::ClipQueue;
use crate::services::publisher::PublisherHandle;
use crate::services::rolling_buffer::RollingBuffer;
use crate::services::scan_machine::{ScanState, ScanStateMachine};
use crate::services::status::ScanStatusBoard;
use crate::services::trigger::TriggerSlot;
use crate::services::zone_filter::ZoneFilter;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

/// Output channels of the frame loop
pub struct FrameLoopOutputs {
    pub clips: ClipQueue,
    pub publisher: PublisherHandle,
    pub status: Arc<ScanStatusBoard>,
}

pub struct FrameLoop {
    pub(crate) zone: ZoneFilter,
    pub(crate) machine: ScanStateMachine,
    pub(crate) buffer: RollingBuffer<Frame>,
    pub(crate) trigger: TriggerSlot,
    pub(crate) clips: ClipQueue,
    pub(crate) publisher: PublisherHandle,
    pub(crate) status: Arc<ScanStatusBoard>,
    pub(crate) metrics: Arc<Metrics>,
    /// Frame rate written into exported clips
    pub(crate) clip_fps: u32,
}

impl FrameLoop {
    /// `source_fps` is the frame source's rate hint; the configured rate is
    /// used when it has none.
    pub fn new(
        config: &Config,
        source_fps: Option<u32>,
        trigger: TriggerSlot,
        outputs: FrameLoopOutputs,
        metrics: Arc<Metrics>,
    ) -> Self {
        let capacity = config.buffer_capacity(source_fps);
        let clip_fps = source_fps.filter(|&f| f > 0).unwrap_or(config.frame_rate()).max(1);
        info!(
            camera_id = %config.camera_id(),
            buffer_frames = %capacity,
            clip_fps = %clip_fps,
            window_ms = %config.scan_window_ms(),
            tolerance_ms = %config.tolerance_ms(),
            "frame_loop_initialized"
        );

        Self {
            zone: ZoneFilter::from_config(config),
            machine: ScanStateMachine::from_config(config),
            buffer: RollingBuffer::new(capacity),
            trigger,
            clips: outputs.clips,
            publisher: outputs.publisher,
            status: outputs.status,
            metrics,
            clip_fps,
        }
    }

    /// Pull frames until the source ends or shutdown is signalled
    ///
    /// Returns the number of frames processed. A source error ends the loop
    /// and is returned to the caller.
    pub async fn run<S, T>(
        &mut self,
        source: &mut S,
        tracker: &mut T,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<u64, FrameSourceError>
    where
        S: FrameSource + ?Sized,
        T: ObjectTracker + ?Sized,
    {
        let mut processed = 0u64;
        // Cleared if the shutdown sender goes away
        let mut watching = true;
        info!("frame_loop_started");

        loop {
            let frame = tokio::select! {
                next = source.next_frame() => next,
                changed = shutdown.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    if *shutdown.borrow() {
                        info!(frames = %processed, "frame_loop_shutdown");
                        break;
                    }
                    continue;
                }
            };

            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(frames = %processed, "frame_source_ended");
                    break;
                }
                Err(e) => {
                    warn!(frames = %processed, error = %e, "frame_source_failed");
                    return Err(e);
                }
            };

            let start = Instant::now();
            let detections = match tracker.track(&frame).await {
                Ok(detections) => detections,
                Err(e) => {
                    self.metrics.record_tracker_error();
                    warn!(seq = %frame.seq, error = %e, "tracker_failed");
                    Vec::new()
                }
            };
            self.process_frame(frame, &detections);
            self.metrics.record_frame_processed(start.elapsed().as_micros() as u64);
            processed += 1;
        }

        if self.machine.state() == ScanState::Scanning {
            warn!("frame_loop_stopped_mid_scan");
        }
        Ok(processed)
    }

    /// Handle one frame and its detections
    ///
    /// Returns the scan result if this frame closed a window.
    pub fn process_frame(&mut self, frame: Frame, detections: &[Detection]) -> Option<ScanResult> {
        let now_ms = frame.ts_ms;
        let occupants = self.zone.occupants(frame.width, frame.height, detections);

        if self.trigger.take() {
            self.handle_trigger(now_ms);
        }

        self.buffer.push(frame);

        let result = self.machine.update(&occupants, now_ms)?;
        self.handle_scan_closed(&result);
        Some(result)
    }

    pub fn state(&self) -> ScanState {
        self.machine.state()
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }
}
