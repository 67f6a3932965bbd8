//! Failure taxonomy for the capture pipeline.

use thiserror::Error;

use crate::format::FormatError;
use crate::source::SourceError;

/// A fault that ends a capture run.
///
/// Cancellation is not represented here: stopping the task is an
/// expected, clean exit. A fault tears the session down (device released,
/// sinks force-closed) and is logged when the task is reaped; it is never
/// thrown at the caller who attached a sink.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The device failed while opening or producing frames.
    #[error("capture device fault: {0}")]
    Source(#[from] SourceError),

    /// The formatter rejected the negotiated format or a frame.
    #[error("frame formatting fault: {0}")]
    Format(#[from] FormatError),
}
