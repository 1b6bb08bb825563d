//! Scan-window state machine
//!
//! Owns the one-and-only scan session. A trigger opens a window; every frame
//! inside the window updates primary/secondary bookkeeping; the first frame
//! past the window closes it and yields a `ScanResult`.
//!
//! Rules:
//! - The primary entrant is the lowest track id seen in the zone on the first
//!   frame with any occupant, and never changes for the rest of the session.
//! - Any other id in the zone is a secondary entrant. The session is flagged
//!   once secondaries have been present on every frame for `tolerance_ms`;
//!   a single frame without a secondary restarts that timer.
//! - Track ids are opaque. If the tracker reuses an id for a different
//!   person, or gives the primary a new id on re-entry, the verdict follows
//!   the ids it was given.

use crate::domain::scan::{clip_key, ScanResult, ScanStatus};
use crate::domain::types::TrackId;
use crate::infra::config::Config;
use crate::services::zone_filter::OccupantSet;
use tracing::{debug, info, warn};

/// Scan lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
        }
    }
}

/// Timing policy of a scan window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTiming {
    /// Window length after the trigger (ms)
    pub window_ms: u64,
    /// Continuous secondary presence needed to flag (ms)
    pub tolerance_ms: u64,
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self { window_ms: 3000, tolerance_ms: 1000 }
    }
}

/// State of the currently open scan window
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSession {
    pub start_ms: u64,
    pub primary_id: Option<TrackId>,
    /// Start of the current unbroken run of frames with a secondary entrant
    pub secondary_since_ms: Option<u64>,
    pub flagged: bool,
    pub flagged_at_ms: Option<u64>,
}

impl ScanSession {
    fn new(start_ms: u64) -> Self {
        Self {
            start_ms,
            primary_id: None,
            secondary_since_ms: None,
            flagged: false,
            flagged_at_ms: None,
        }
    }
}

/// Tailgating decision state machine
pub struct ScanStateMachine {
    session: Option<ScanSession>,
    timing: ScanTiming,
    camera_id: String,
}

impl ScanStateMachine {
    pub fn new(timing: ScanTiming, camera_id: &str) -> Self {
        Self { session: None, timing, camera_id: camera_id.to_string() }
    }

    pub fn from_config(config: &Config) -> Self {
        let timing = ScanTiming {
            window_ms: config.scan_window_ms(),
            tolerance_ms: config.tolerance_ms(),
        };
        Self::new(timing, config.camera_id())
    }

    #[inline]
    pub fn state(&self) -> ScanState {
        if self.session.is_some() {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }

    /// Current session, if scanning
    #[inline]
    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    pub fn timing(&self) -> ScanTiming {
        self.timing
    }

    /// Open a scan window at `now_ms`
    ///
    /// Returns `false` (and changes nothing) when a window is already open.
    pub fn trigger(&mut self, now_ms: u64) -> bool {
        if let Some(session) = &self.session {
            debug!(
                started_at = %session.start_ms,
                now = %now_ms,
                "trigger_ignored_scanning"
            );
            return false;
        }

        self.session = Some(ScanSession::new(now_ms));
        info!(
            camera_id = %self.camera_id,
            window_ms = %self.timing.window_ms,
            tolerance_ms = %self.timing.tolerance_ms,
            "scan_started"
        );
        true
    }

    /// Feed one frame's zone occupants
    ///
    /// Returns the result when this frame closes the window. A no-op while idle.
    pub fn update(&mut self, occupants: &OccupantSet, now_ms: u64) -> Option<ScanResult> {
        let tolerance_ms = self.timing.tolerance_ms;
        let session = self.session.as_mut()?;

        if session.primary_id.is_none() {
            if let Some(primary) = occupants.lowest() {
                session.primary_id = Some(primary);
                info!(
                    primary_id = %primary,
                    candidates = %occupants.len(),
                    elapsed_ms = %now_ms.saturating_sub(session.start_ms),
                    "primary_assigned"
                );
            }
        }

        if let Some(primary) = session.primary_id {
            let has_secondary = occupants.others(primary).next().is_some();
            if has_secondary {
                match session.secondary_since_ms {
                    None => {
                        session.secondary_since_ms = Some(now_ms);
                        debug!(
                            primary_id = %primary,
                            occupants = ?occupants.as_slice(),
                            "secondary_detected"
                        );
                    }
                    Some(since) => {
                        if !session.flagged && now_ms.saturating_sub(since) >= tolerance_ms {
                            session.flagged = true;
                            session.flagged_at_ms = Some(now_ms);
                            warn!(
                                primary_id = %primary,
                                occupants = ?occupants.as_slice(),
                                persisted_ms = %now_ms.saturating_sub(since),
                                "tailgate_flagged"
                            );
                        }
                    }
                }
            } else if session.secondary_since_ms.take().is_some() {
                debug!(primary_id = %primary, "secondary_cleared");
            }
        }

        if now_ms.saturating_sub(session.start_ms) > self.timing.window_ms {
            return self.close(now_ms);
        }
        None
    }

    fn close(&mut self, now_ms: u64) -> Option<ScanResult> {
        let session = self.session.take()?;
        let status = if session.flagged { ScanStatus::Unauthorized } else { ScanStatus::Verified };
        let clip_reference = session.flagged.then(|| clip_key(now_ms));

        info!(
            camera_id = %self.camera_id,
            status = %status.as_str(),
            primary_id = ?session.primary_id,
            duration_ms = %now_ms.saturating_sub(session.start_ms),
            clip = ?clip_reference,
            "scan_closed"
        );

        Some(ScanResult {
            timestamp_ms: now_ms,
            status,
            clip_reference,
            camera_id: self.camera_id.clone(),
            started_at_ms: session.start_ms,
            primary_id: session.primary_id,
            flagged_at_ms: session.flagged_at_ms,
        })
    }
}
