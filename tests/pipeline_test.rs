//! End-to-end replay through the frame loop, clip exporter and publisher

use entry_guard::infra::{ClipEncoder, Config, Metrics};
use entry_guard::io::{FrameSource, JsonlEventSink, RawClipSink, ReplayFeed};
use entry_guard::services::{
    create_clip_exporter, create_event_publisher, FrameLoop, FrameLoopOutputs, RetryPolicy,
    ScanStatusBoard, TriggerSlot,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::watch;

const T0: u64 = 1_736_012_340_000;

/// 64x48 capture at 10 fps: a lone entrant scanned at frame 2, then a
/// second scan at frame 40 with a follower from frame 45 on
fn capture() -> String {
    let inside = |id: i64| format!(r#"{{"id":{id},"bbox":[28,10,36,38]}}"#);
    let mut lines = Vec::new();
    for i in 0..80u64 {
        let mut detections = vec![r#"{"id":9,"bbox":[0,0,4,4]}"#.to_string()];
        if (2..=30).contains(&i) {
            detections.push(inside(1));
        }
        if i >= 40 {
            detections.push(inside(3));
        }
        if i >= 45 {
            detections.push(inside(4));
        }
        let trigger = i == 2 || i == 40;
        lines.push(format!(
            r#"{{"ts_ms":{},"width":64,"height":48,"detections":[{}],"trigger":{}}}"#,
            T0 + i * 100,
            detections.join(","),
            trigger
        ));
    }
    lines.join("\n")
}

fn read_events(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

struct Run {
    frames: u64,
    metrics: Arc<Metrics>,
    status: Arc<ScanStatusBoard>,
}

async fn run_pipeline(config: &Config, feed: ReplayFeed) -> Run {
    let metrics = Arc::new(Metrics::new());
    let policy = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
    };
    let (publisher, publisher_worker) = create_event_publisher(
        Box::new(JsonlEventSink::new(config.events_file())),
        policy,
        metrics.clone(),
        16,
    );
    let publisher_task = tokio::spawn(publisher_worker.run());

    let (clips, exporter) = create_clip_exporter(
        Arc::new(RawClipSink::new(config.clip_dir())),
        publisher.clone(),
        metrics.clone(),
        2,
    );
    let exporter_task = tokio::spawn(exporter.run());

    let trigger = TriggerSlot::new();
    let status = Arc::new(ScanStatusBoard::new());
    let (source, mut tracker) = feed.split(trigger.clone(), false);
    let mut source = source.with_metrics(metrics.clone());

    let outputs = FrameLoopOutputs { clips, publisher, status: status.clone() };
    let mut frame_loop =
        FrameLoop::new(config, source.frame_rate(), trigger, outputs, metrics.clone());

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let frames = frame_loop.run(&mut source, &mut tracker, shutdown_rx).await.unwrap();

    drop(frame_loop);
    exporter_task.await.unwrap();
    publisher_task.await.unwrap();

    Run { frames, metrics, status }
}

#[tokio::test]
async fn test_replay_publishes_verified_then_unauthorized() {
    let dir = tempdir().unwrap();
    let clip_dir = dir.path().join("clips");
    let events_file = dir.path().join("events.jsonl");
    let config = Config::default()
        .with_clips(clip_dir.to_str().unwrap(), ClipEncoder::Raw)
        .with_events_file(events_file.to_str().unwrap());

    let run = run_pipeline(&config, ReplayFeed::parse(&capture()).unwrap()).await;
    assert_eq!(run.frames, 80);

    let events = read_events(&events_file);
    assert_eq!(events.len(), 2);

    let verified = &events[0];
    assert_eq!(verified["status"], "VERIFIED");
    assert_eq!(verified["clip_status"], "none");
    assert!(verified["clip_path"].is_null());
    assert_eq!(verified["camera_id"], "CAM_01");
    assert_eq!(verified["timestamp"], T0 + 3300);

    let flagged = &events[1];
    assert_eq!(flagged["status"], "UNAUTHORIZED");
    assert_eq!(flagged["clip_status"], "stored");
    assert_eq!(flagged["primary_id"], 3);
    assert_eq!(flagged["timestamp"], T0 + 7100);
    assert_ne!(flagged["eid"], verified["eid"]);

    let clip_path = flagged["clip_path"].as_str().unwrap();
    assert!(clip_path.ends_with(".bgr"));
    assert!(clip_path.starts_with(clip_dir.to_str().unwrap()));
    let clip_len = std::fs::metadata(clip_path).unwrap().len();
    // Every frame since the start of the capture is still buffered
    assert_eq!(clip_len, 72 * 64 * 48 * 3);

    assert_eq!(run.metrics.scans_verified(), 1);
    assert_eq!(run.metrics.scans_unauthorized(), 1);
    assert_eq!(run.metrics.clips_stored(), 1);
    assert_eq!(run.metrics.events_delivered(), 2);

    let snapshot = run.status.snapshot();
    assert!(!snapshot.scanning);
    assert_eq!(snapshot.scans_completed, 2);
}

#[tokio::test]
async fn test_unwritable_clip_dir_publishes_clip_failed() {
    let dir = tempdir().unwrap();
    // A regular file where the clip directory should be
    let blocker = dir.path().join("clips");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let events_file = dir.path().join("events.jsonl");
    let config = Config::default()
        .with_clips(blocker.to_str().unwrap(), ClipEncoder::Raw)
        .with_events_file(events_file.to_str().unwrap());

    let run = run_pipeline(&config, ReplayFeed::parse(&capture()).unwrap()).await;

    let events = read_events(&events_file);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["status"], "UNAUTHORIZED");
    assert_eq!(events[1]["clip_status"], "failed");
    assert!(events[1]["clip_path"].is_null());
    assert_eq!(run.metrics.clips_failed(), 1);
}

#[tokio::test]
async fn test_bundled_sample_capture() {
    let dir = tempdir().unwrap();
    let events_file = dir.path().join("events.jsonl");
    let config = Config::default()
        .with_buffer(1, 10)
        .with_clips(dir.path().join("clips").to_str().unwrap(), ClipEncoder::Raw)
        .with_events_file(events_file.to_str().unwrap());

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/replay/sample.jsonl");
    let run = run_pipeline(&config, ReplayFeed::load(path).unwrap()).await;
    assert_eq!(run.frames, 120);

    let statuses: Vec<String> = read_events(&events_file)
        .iter()
        .map(|e| e["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["VERIFIED", "UNAUTHORIZED"]);
    assert_eq!(run.metrics.clips_stored(), 1);
}
