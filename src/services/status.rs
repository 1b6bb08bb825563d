//! Scan status shared with the control server
//!
//! Written by the frame loop, read by `/status` requests.

use crate::domain::scan::{readable_time, ScanResult, ScanStatus};
use crate::domain::types::TrackId;
use parking_lot::RwLock;
use serde::Serialize;

/// Most recent closed scan, as reported over HTTP
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LastScan {
    pub timestamp: u64,
    pub time: String,
    pub status: ScanStatus,
    /// Clip key reserved when the scan closed; the published event says
    /// whether the export stored it
    pub clip_key: Option<String>,
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<TrackId>,
}

impl From<&ScanResult> for LastScan {
    fn from(result: &ScanResult) -> Self {
        Self {
            timestamp: result.timestamp_ms,
            time: readable_time(result.timestamp_ms),
            status: result.status,
            clip_key: result.clip_reference.clone(),
            started_at: result.started_at_ms,
            primary_id: result.primary_id,
        }
    }
}

#[derive(Debug, Default)]
struct StatusInner {
    scanning: bool,
    scan_started_at: Option<u64>,
    scans_completed: u64,
    last_result: Option<LastScan>,
}

#[derive(Debug, Default)]
pub struct ScanStatusBoard {
    inner: RwLock<StatusInner>,
}

/// Point-in-time copy of the board
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub scanning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_started_at: Option<u64>,
    pub scans_completed: u64,
    pub last_result: Option<LastScan>,
}

impl ScanStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_started(&self, now_ms: u64) {
        let mut inner = self.inner.write();
        inner.scanning = true;
        inner.scan_started_at = Some(now_ms);
    }

    pub fn scan_closed(&self, result: &ScanResult) {
        let mut inner = self.inner.write();
        inner.scanning = false;
        inner.scan_started_at = None;
        inner.scans_completed += 1;
        inner.last_result = Some(LastScan::from(result));
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read();
        StatusSnapshot {
            scanning: inner.scanning,
            scan_started_at: inner.scan_started_at,
            scans_completed: inner.scans_completed,
            last_result: inner.last_result.clone(),
        }
    }
}
