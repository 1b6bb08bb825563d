//! Services - detection pipeline and background workers
//!
//! - `frame_loop` - Sequential per-frame orchestrator
//! - `zone_filter` - Entry-zone occupancy
//! - `scan_machine` - Scan window state machine (the tailgating decision)
//! - `rolling_buffer` - Recent-frame ring for clip export
//! - `trigger` - Single-slot trigger handoff from HTTP to the loop
//! - `clip_exporter` - Async clip export worker
//! - `publisher` - Async event delivery with retry
//! - `status` - Scan status shared with the control endpoint

pub mod clip_exporter;
pub mod frame_loop;
pub mod publisher;
pub mod rolling_buffer;
pub mod scan_machine;
pub mod status;
pub mod trigger;
pub mod zone_filter;

// Re-export commonly used types
pub use clip_exporter::{create_clip_exporter, ClipExporter, ClipJob, ClipQueue};
pub use frame_loop::{FrameLoop, FrameLoopOutputs};
pub use publisher::{create_event_publisher, EventPublisher, PublisherHandle, RetryPolicy};
pub use rolling_buffer::RollingBuffer;
pub use scan_machine::{ScanState, ScanStateMachine, ScanTiming};
pub use status::ScanStatusBoard;
pub use trigger::TriggerSlot;
pub use zone_filter::{OccupantSet, ZoneFilter};
