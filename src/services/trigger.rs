//! Single-slot trigger handoff
//!
//! The HTTP handler fires the slot; the frame loop takes it once per frame.
//! A trigger fired between polls is remembered, and any number of triggers
//! before the next poll collapse into one. Neither side ever blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to a shared single-slot trigger
#[derive(Debug, Clone, Default)]
pub struct TriggerSlot {
    pending: Arc<AtomicBool>,
}

impl TriggerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a scan. Returns `false` when a trigger was already pending
    /// (the new one was coalesced into it).
    #[inline]
    pub fn fire(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// Consume the pending trigger, if any
    #[inline]
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Whether a trigger is waiting to be consumed
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}
