//! IO modules - external system interfaces
//!
//! - `source` - Frame source and object tracker traits
//! - `replay` - JSONL replay of recorded tracker output
//! - `clip_sink` - Clip storage (ffmpeg or raw frames)
//! - `event_sink` - Event delivery (JSONL file, HTTP backend, fanout)
//! - `mqtt_sink` - Event delivery over MQTT
//! - `control_server` - HTTP trigger, status and metrics endpoint
//! - `prometheus` - Prometheus text formatting

pub mod clip_sink;
pub mod control_server;
pub mod event_sink;
pub mod mqtt_sink;
pub mod prometheus;
pub mod replay;
pub mod source;

// Re-export commonly used types
pub use clip_sink::{create_clip_sink, ClipError, ClipSink, FfmpegClipSink, RawClipSink};
pub use control_server::{serve_control, start_control_server, ControlContext};
pub use event_sink::{
    create_event_sinks, EventSink, FanoutSink, HttpEventSink, JsonlEventSink, SinkError,
};
pub use mqtt_sink::MqttEventSink;
pub use replay::{ReplayFeed, ReplaySource, ReplayTracker};
pub use source::{FrameSource, FrameSourceError, ObjectTracker, TrackerError};
