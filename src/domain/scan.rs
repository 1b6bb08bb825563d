//! Scan outcome data model
//!
//! A `ScanResult` is produced once per closed scan window by the state
//! machine and never changes afterwards. The record handed to event sinks
//! is a `ScanEvent`, built from the result plus the outcome of the clip
//! export (if any).

use crate::domain::types::TrackId;
use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Convert epoch ms to local wall-clock time
pub fn local_time(ts_ms: u64) -> DateTime<Local> {
    let utc = DateTime::from_timestamp_millis(ts_ms as i64).unwrap_or_default();
    utc.with_timezone(&Local)
}

/// Human-readable local timestamp (`2024-05-01 13:45:10`)
pub fn readable_time(ts_ms: u64) -> String {
    local_time(ts_ms).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Storage key for the clip of a scan closed at `ts_ms` (`event_20240501_134510`)
///
/// Scan windows last longer than a second, so keys never collide.
pub fn clip_key(ts_ms: u64) -> String {
    format!("event_{}", local_time(ts_ms).format("%Y%m%d_%H%M%S"))
}

/// Verdict of a closed scan window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Verified,
    Unauthorized,
}

impl ScanStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Verified => "VERIFIED",
            ScanStatus::Unauthorized => "UNAUTHORIZED",
        }
    }
}

/// Emitted exactly once when a scan window closes
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Window close time (epoch ms)
    pub timestamp_ms: u64,
    pub status: ScanStatus,
    /// Clip key reserved for the export; only set when unauthorized
    pub clip_reference: Option<String>,
    pub camera_id: String,
    /// Trigger acceptance time (epoch ms)
    pub started_at_ms: u64,
    pub primary_id: Option<TrackId>,
    /// Frame time at which tailgating was confirmed
    pub flagged_at_ms: Option<u64>,
}

impl ScanResult {
    #[inline]
    pub fn is_flagged(&self) -> bool {
        self.status == ScanStatus::Unauthorized
    }
}

/// What happened to the clip of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipStatus {
    /// No clip was requested (verified scan)
    None,
    /// Clip written to storage
    Stored,
    /// Clip export failed; the event carries no clip path
    Failed,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::None => "none",
            ClipStatus::Stored => "stored",
            ClipStatus::Failed => "failed",
        }
    }
}

/// Record delivered to event sinks
#[derive(Debug, Clone, Serialize)]
pub struct ScanEvent {
    /// UUIDv7 event id, lets downstream consumers drop redelivered events
    pub eid: String,
    /// Window close time (epoch ms)
    pub timestamp: u64,
    /// Local wall-clock rendering of `timestamp`
    pub time: String,
    pub status: ScanStatus,
    pub clip_path: Option<String>,
    pub clip_status: ClipStatus,
    pub camera_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<TrackId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flagged_at: Option<u64>,
}

impl ScanEvent {
    /// Event for a scan without a clip
    pub fn verified(result: &ScanResult) -> Self {
        Self::build(result, None, ClipStatus::None)
    }

    /// Event for a flagged scan once its clip is safely stored
    pub fn with_clip(result: &ScanResult, clip_path: String) -> Self {
        Self::build(result, Some(clip_path), ClipStatus::Stored)
    }

    /// Event for a flagged scan whose clip could not be written
    pub fn clip_failed(result: &ScanResult) -> Self {
        Self::build(result, None, ClipStatus::Failed)
    }

    fn build(result: &ScanResult, clip_path: Option<String>, clip_status: ClipStatus) -> Self {
        Self {
            eid: new_uuid_v7(),
            timestamp: result.timestamp_ms,
            time: readable_time(result.timestamp_ms),
            status: result.status,
            clip_path,
            clip_status,
            camera_id: result.camera_id.clone(),
            primary_id: result.primary_id,
            flagged_at: result.flagged_at_ms,
        }
    }

    /// Compact JSON, one line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
