//! Shared types for the entry guard

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Newtype wrapper for tracker-assigned track IDs
///
/// Opaque to the core: ids are only compared and ordered, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TrackId(pub i64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pixel coordinate in frame space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box `[x1, y1, x2, y2]` as reported by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline]
    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// One tracker output for a single frame
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub track_id: TrackId,
    pub bbox: BoundingBox,
}

/// Tracked subject as seen by the zone filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedEntity {
    pub id: TrackId,
    pub centroid: Point,
}

impl From<&Detection> for TrackedEntity {
    fn from(det: &Detection) -> Self {
        Self { id: det.track_id, centroid: det.bbox.centroid() }
    }
}

/// Entry zone rectangle in pixel coordinates
///
/// Membership is the strict interior: a centroid on an edge is outside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneRegion {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl ZoneRegion {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Scale a region given as fractions of the frame into pixels
    pub fn from_relative(rel: &ZoneRegion, width: u32, height: u32) -> Self {
        let w = f64::from(width);
        let h = f64::from(height);
        Self { x1: rel.x1 * w, y1: rel.y1 * h, x2: rel.x2 * w, y2: rel.y2 * h }
    }

    #[inline]
    pub fn contains(&self, p: Point) -> bool {
        self.x1 < p.x && p.x < self.x2 && self.y1 < p.y && p.y < self.y2
    }
}

/// A captured video frame
///
/// Pixel data is BGR24 behind a refcounted `Bytes`, so cloning a frame
/// never copies pixels and never aliases mutable state.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number assigned by the source
    pub seq: u64,
    /// Capture time (epoch ms)
    pub ts_ms: u64,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn new(seq: u64, ts_ms: u64, width: u32, height: u32, data: Bytes) -> Self {
        Self { seq, ts_ms, width, height, data }
    }

    /// Frame with an all-black BGR24 payload
    pub fn blank(seq: u64, ts_ms: u64, width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 3;
        Self::new(seq, ts_ms, width, height, Bytes::from(vec![0u8; len]))
    }
}
