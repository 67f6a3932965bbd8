//! Kinoscope: on-demand capture fan-out for a single webcam.
//!
//! One [`Camera`] owns one exclusive capture device. Any number of
//! consumers can attach to it concurrently, either as a live
//! [`FrameStream`] or as a one-shot [`Snapshot`]. A background capture
//! task pulls raw frames from the device, encodes each frame once, and
//! broadcasts the encoded bytes to every attached consumer.
//!
//! By default the camera is *on-demand*: the capture task runs only while
//! at least one consumer is attached, so the device LED goes dark the
//! moment the last viewer disconnects. An always-on camera instead
//! captures from construction until [`Camera::close`].
//!
//! The device and encoder boundaries are traits ([`FrameSource`],
//! [`FrameFormatter`]) so the session logic is independent of the
//! hardware stack. The crate ships a Video4Linux source (feature `v4l2`),
//! a synthetic test-pattern source, and a JPEG formatter.

pub mod camera;
pub mod error;
pub mod format;
pub mod sink;
pub mod source;
pub mod testpattern;
pub mod types;

#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2;

pub use camera::{Camera, CameraOptions};
pub use error::CameraError;
pub use format::{FormatError, FrameFormatter, JpegFormatter};
pub use sink::{FrameStream, Snapshot, STREAM_CAPACITY};
pub use source::{FrameSource, SourceError};
pub use testpattern::TestPatternSource;
pub use types::{PixelLayout, RawFrame, SourceFormat};

#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub use v4l2::V4l2Source;
