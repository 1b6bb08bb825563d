//! Frame source and object tracker seams
//!
//! Camera capture and detection/tracking live outside this crate; the frame
//! loop only sees these two traits.

use crate::domain::types::{Detection, Frame};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameSourceError {
    #[error("failed to open source {uri:?}")]
    Open {
        uri: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed input at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("no tracking data for frame {seq}")]
    MissingFrame { seq: u64 },
    #[error("tracker failure: {0}")]
    Other(String),
}

/// Ordered stream of frames
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame; `Ok(None)` at end of stream
    async fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError>;

    /// Nominal frame rate, if the source knows it
    fn frame_rate(&self) -> Option<u32> {
        None
    }
}

/// Assigns persistent track ids to the people in a frame
#[async_trait]
pub trait ObjectTracker: Send {
    /// Detections in `frame`; an empty vec is a valid answer
    async fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>, TrackerError>;
}
