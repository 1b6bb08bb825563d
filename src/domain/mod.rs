//! Domain models - core types shared across the pipeline
//!
//! - `types` - frames, detections, track ids, zone geometry
//! - `scan` - scan results and the published `ScanEvent`

pub mod scan;
pub mod types;

pub use scan::{ClipStatus, ScanEvent, ScanResult, ScanStatus};
pub use types::{BoundingBox, Detection, Frame, Point, TrackId, TrackedEntity, ZoneRegion};
