//! Side effects of scan transitions

use super::FrameLoop;
use crate::domain::scan::{ScanEvent, ScanResult};
use crate::services::clip_exporter::ClipJob;
use tracing::debug;

impl FrameLoop {
    /// A trigger was taken from the slot on this frame
    pub(crate) fn handle_trigger(&mut self, now_ms: u64) {
        if self.machine.trigger(now_ms) {
            self.metrics.record_trigger_accepted();
            self.status.scan_started(now_ms);
        } else {
            self.metrics.record_trigger_ignored();
        }
    }

    /// Route a closed scan: flagged scans go through the clip exporter,
    /// which publishes once the clip is written; verified ones publish now.
    pub(crate) fn handle_scan_closed(&mut self, result: &ScanResult) {
        self.metrics.record_scan_closed(result.is_flagged());
        self.status.scan_closed(result);

        if result.is_flagged() {
            let frames = self.buffer.snapshot();
            debug!(frames = %frames.len(), clip = ?result.clip_reference, "clip_job_submitted");
            self.clips.submit(ClipJob { result: result.clone(), frames, fps: self.clip_fps });
        } else {
            self.publisher.publish(ScanEvent::verified(result));
        }
    }
}
