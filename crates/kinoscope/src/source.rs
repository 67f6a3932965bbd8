//! The capture device boundary.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{RawFrame, SourceFormat};

/// Faults at the device boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open capture device {device}: {message}")]
    Open { device: String, message: String },

    #[error("capture device used before open")]
    NotOpen,

    #[error("capture device disconnected")]
    Disconnected,

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single exclusive capture device.
///
/// A source is opened once per capture run and must be reopenable after
/// `close`. While open it produces a lazy, infinite, non-restartable
/// sequence of raw frames; a source that can no longer produce frames
/// reports an error from `next_frame` instead.
#[async_trait]
pub trait FrameSource: Send {
    /// Acquire the device and negotiate a format.
    async fn open(&mut self) -> Result<SourceFormat, SourceError>;

    /// Pull the next raw frame. Suspends until one is available.
    async fn next_frame(&mut self) -> Result<RawFrame, SourceError>;

    /// Release the device. Idempotent.
    async fn close(&mut self);
}
