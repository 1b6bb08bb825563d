//! JSONL replay of recorded tracker output
//!
//! Each non-empty line is one frame:
//!
//! ```text
//! {"ts_ms":1736012340000,"width":640,"height":480,
//!  "detections":[{"id":1,"bbox":[280,100,360,380]}],"trigger":false}
//! ```
//!
//! Lines starting with `#` are comments. `width`/`height` default to
//! 640x480, `detections` to empty and `trigger` to false. A feed splits into
//! a frame source producing blank frames and a tracker answering from the
//! recorded detections, so the full pipeline can run without a camera.

use crate::domain::types::{BoundingBox, Detection, Frame, TrackId};
use crate::infra::metrics::Metrics;
use crate::io::source::{FrameSource, FrameSourceError, ObjectTracker, TrackerError};
use crate::services::trigger::TriggerSlot;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ReplayDetection {
    id: i64,
    bbox: [f64; 4],
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    ts_ms: u64,
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
    #[serde(default)]
    detections: Vec<ReplayDetection>,
    #[serde(default)]
    trigger: bool,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

/// One parsed frame of a replay
#[derive(Debug, Clone)]
pub struct ReplayFrame {
    pub seq: u64,
    pub ts_ms: u64,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    pub trigger: bool,
}

/// A parsed replay capture
#[derive(Debug, Default)]
pub struct ReplayFeed {
    frames: Vec<ReplayFrame>,
}

impl ReplayFeed {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FrameSourceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| FrameSourceError::Open {
            uri: path.display().to_string(),
            source,
        })?;
        let feed = Self::parse(&content)?;
        info!(
            path = %path.display(),
            frames = %feed.len(),
            triggers = %feed.frames.iter().filter(|f| f.trigger).count(),
            "replay_loaded"
        );
        Ok(feed)
    }

    pub fn parse(content: &str) -> Result<Self, FrameSourceError> {
        let mut frames: Vec<ReplayFrame> = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }

            let line: ReplayLine = serde_json::from_str(raw).map_err(|e| {
                FrameSourceError::Malformed { line: line_no, reason: e.to_string() }
            })?;

            if let Some(prev) = frames.last() {
                if line.ts_ms < prev.ts_ms {
                    return Err(FrameSourceError::Malformed {
                        line: line_no,
                        reason: format!("ts_ms {} goes back from {}", line.ts_ms, prev.ts_ms),
                    });
                }
            }

            let detections = line
                .detections
                .into_iter()
                .map(|d| Detection {
                    track_id: TrackId(d.id),
                    bbox: BoundingBox::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
                })
                .collect();

            frames.push(ReplayFrame {
                seq: frames.len() as u64,
                ts_ms: line.ts_ms,
                width: line.width,
                height: line.height,
                detections,
                trigger: line.trigger,
            });
        }

        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[ReplayFrame] {
        &self.frames
    }

    /// Average frame rate over the capture, rounded
    pub fn estimated_fps(&self) -> Option<u32> {
        let first = self.frames.first()?;
        let last = self.frames.last()?;
        let span = last.ts_ms.checked_sub(first.ts_ms).filter(|&s| s > 0)?;
        let intervals = (self.frames.len() - 1) as f64;
        Some(((intervals * 1000.0) / span as f64).round().max(1.0) as u32)
    }

    /// Split into a frame source and a tracker over the same frames
    pub fn split(self, trigger: TriggerSlot, realtime: bool) -> (ReplaySource, ReplayTracker) {
        let fps = self.estimated_fps();
        let detections: FxHashMap<u64, Vec<Detection>> =
            self.frames.iter().map(|f| (f.seq, f.detections.clone())).collect();

        let source = ReplaySource {
            frames: self.frames.into(),
            trigger,
            realtime,
            fps,
            last_ts_ms: None,
            metrics: None,
        };
        (source, ReplayTracker { detections })
    }
}

/// Frame source yielding blank frames at the recorded timestamps
pub struct ReplaySource {
    frames: VecDeque<ReplayFrame>,
    trigger: TriggerSlot,
    realtime: bool,
    fps: Option<u32>,
    last_ts_ms: Option<u64>,
    metrics: Option<Arc<Metrics>>,
}

impl ReplaySource {
    /// Count replayed triggers as received triggers
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let Some(next_ts) = self.frames.front().map(|f| f.ts_ms) else {
            info!("replay_finished");
            return Ok(None);
        };

        // Pop only after pacing so a cancelled call loses nothing
        if self.realtime {
            if let Some(last) = self.last_ts_ms {
                let gap = next_ts.saturating_sub(last);
                if gap > 0 {
                    tokio::time::sleep(Duration::from_millis(gap)).await;
                }
            }
        }
        let Some(next) = self.frames.pop_front() else {
            return Ok(None);
        };
        self.last_ts_ms = Some(next.ts_ms);

        if next.trigger {
            let fresh = self.trigger.fire();
            if let Some(metrics) = &self.metrics {
                metrics.record_trigger_received(!fresh);
            }
            debug!(seq = %next.seq, ts_ms = %next.ts_ms, coalesced = %!fresh, "replay_trigger");
        }

        Ok(Some(Frame::blank(next.seq, next.ts_ms, next.width, next.height)))
    }

    fn frame_rate(&self) -> Option<u32> {
        self.fps
    }
}

/// Tracker answering with the recorded detections of each frame
pub struct ReplayTracker {
    detections: FxHashMap<u64, Vec<Detection>>,
}

#[async_trait]
impl ObjectTracker for ReplayTracker {
    async fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>, TrackerError> {
        self.detections.remove(&frame.seq).ok_or(TrackerError::MissingFrame { seq: frame.seq })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# two people, trigger on the second frame
{"ts_ms":1000,"detections":[]}
{"ts_ms":1100,"detections":[{"id":1,"bbox":[280,100,360,380]}],"trigger":true}

{"ts_ms":1200,"width":320,"height":240,"detections":[{"id":1,"bbox":[280,100,360,380]},{"id":2,"bbox":[0,0,10,10]}]}
"#;

    #[test]
    fn test_parse_sample() {
        let feed = ReplayFeed::parse(SAMPLE).unwrap();
        assert_eq!(feed.len(), 3);

        let frames = feed.frames();
        assert_eq!(frames[0].seq, 0);
        assert_eq!(frames[0].width, 640);
        assert!(frames[0].detections.is_empty());
        assert!(frames[1].trigger);
        assert_eq!(frames[2].width, 320);
        assert_eq!(frames[2].detections[1].track_id, TrackId(2));
        assert_eq!(feed.estimated_fps(), Some(10));
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        let err = ReplayFeed::parse("{\"ts_ms\":1}\nnot json\n").unwrap_err();
        assert!(matches!(err, FrameSourceError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_time_going_back() {
        let err = ReplayFeed::parse("{\"ts_ms\":200}\n{\"ts_ms\":100}\n").unwrap_err();
        assert!(matches!(err, FrameSourceError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ReplayFeed::load("/nonexistent/replay.jsonl").unwrap_err();
        assert!(matches!(err, FrameSourceError::Open { .. }));
    }

    #[test]
    fn test_single_frame_has_no_fps() {
        let feed = ReplayFeed::parse("{\"ts_ms\":5}").unwrap();
        assert_eq!(feed.estimated_fps(), None);
    }

    #[tokio::test]
    async fn test_source_and_tracker_line_up() {
        let slot = TriggerSlot::new();
        let (mut source, mut tracker) = ReplayFeed::parse(SAMPLE).unwrap().split(slot.clone(), false);
        assert_eq!(source.frame_rate(), Some(10));

        let f0 = source.next_frame().await.unwrap().unwrap();
        assert!(!slot.is_pending());
        assert!(tracker.track(&f0).await.unwrap().is_empty());

        let f1 = source.next_frame().await.unwrap().unwrap();
        assert!(slot.take());
        assert_eq!(f1.ts_ms, 1100);
        assert_eq!(tracker.track(&f1).await.unwrap().len(), 1);

        let f2 = source.next_frame().await.unwrap().unwrap();
        assert_eq!((f2.width, f2.height), (320, 240));
        assert_eq!(f2.data.len(), 320 * 240 * 3);
        assert_eq!(tracker.track(&f2).await.unwrap().len(), 2);

        assert!(source.next_frame().await.unwrap().is_none());
        assert!(matches!(tracker.track(&f2).await, Err(TrackerError::MissingFrame { seq: 2 })));
    }

    #[tokio::test]
    async fn test_realtime_pacing() {
        let feed = ReplayFeed::parse("{\"ts_ms\":0}\n{\"ts_ms\":30}\n{\"ts_ms\":60}\n").unwrap();
        let (mut source, _) = feed.split(TriggerSlot::new(), true);

        let start = std::time::Instant::now();
        while source.next_frame().await.unwrap().is_some() {}
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_replayed_triggers_counted() {
        let metrics = Arc::new(Metrics::new());
        let (source, _) = ReplayFeed::parse(SAMPLE).unwrap().split(TriggerSlot::new(), false);
        let mut source = source.with_metrics(metrics.clone());

        while source.next_frame().await.unwrap().is_some() {}
        assert_eq!(metrics.report().triggers_received, 1);
    }
}
