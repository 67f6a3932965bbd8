//! Video4Linux frame source.
//!
//! The `v4l` capture stream is blocking, so the device lives on a
//! dedicated capture thread for the duration of a run; frames cross into
//! async land over a bounded channel. `open` spawns the thread and waits
//! for it to negotiate a format; `close` flips the running flag, drops
//! the channel, and joins the thread.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::source::{FrameSource, SourceError};
use crate::types::{PixelLayout, RawFrame, SourceFormat};

/// Frames that may sit between the capture thread and the session before
/// the thread stalls on the driver's own buffers instead.
const CHANNEL_DEPTH: usize = 4;

/// Driver buffers to map.
const BUFFER_COUNT: u32 = 4;

#[derive(Debug, Clone)]
enum Target {
    Index(usize),
    Path(PathBuf),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "/dev/video{index}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

struct Running {
    frames: mpsc::Receiver<Result<RawFrame, SourceError>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// A V4L2 capture device.
pub struct V4l2Source {
    target: Target,
    running: Option<Running>,
}

impl V4l2Source {
    /// Capture from `/dev/video<index>`.
    pub fn new(index: usize) -> Self {
        Self {
            target: Target::Index(index),
            running: None,
        }
    }

    /// Capture from an explicit device node path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::Path(path.into()),
            running: None,
        }
    }
}

#[async_trait]
impl FrameSource for V4l2Source {
    async fn open(&mut self) -> Result<SourceFormat, SourceError> {
        self.close().await;

        let (format_tx, format_rx) = oneshot::channel();
        let (frame_tx, frame_rx) = mpsc::channel(CHANNEL_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));

        let target = self.target.clone();
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name(format!("v4l2-capture-{}", self.target))
            .spawn(move || capture_thread(target, format_tx, frame_tx, thread_stop))
            .map_err(|e| SourceError::Open {
                device: self.target.to_string(),
                message: e.to_string(),
            })?;

        let format = match format_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SourceError::Open {
                    device: self.target.to_string(),
                    message: "capture thread exited before negotiating a format".into(),
                })
            }
        };

        self.running = Some(Running {
            frames: frame_rx,
            stop,
            thread: Some(thread),
        });
        debug!(device = %self.target, "v4l2 device opened");
        Ok(format)
    }

    async fn next_frame(&mut self) -> Result<RawFrame, SourceError> {
        let running = self.running.as_mut().ok_or(SourceError::NotOpen)?;
        match running.frames.recv().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(err)) => Err(err),
            None => Err(SourceError::Disconnected),
        }
    }

    async fn close(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.stop.store(true, Ordering::Release);
        // dropping the receiver unblocks a capture thread stuck on send
        drop(running.frames);
        if let Some(thread) = running.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
        debug!(device = %self.target, "v4l2 device released");
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::Release);
            drop(running.frames);
            if let Some(thread) = running.thread {
                let _ = thread.join();
            }
        }
    }
}

fn capture_thread(
    target: Target,
    format_tx: oneshot::Sender<Result<SourceFormat, SourceError>>,
    frames: mpsc::Sender<Result<RawFrame, SourceError>>,
    stop: Arc<AtomicBool>,
) {
    let device = match open_device(&target) {
        Ok(device) => device,
        Err(err) => {
            let _ = format_tx.send(Err(err));
            return;
        }
    };

    let format = match negotiated_format(&device, &target) {
        Ok(format) => format,
        Err(err) => {
            let _ = format_tx.send(Err(err));
            return;
        }
    };
    if format_tx.send(Ok(format)).is_err() {
        // the session gave up while we were opening
        return;
    }

    let mut stream = match MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = frames.blocking_send(Err(SourceError::Io(err)));
            return;
        }
    };

    while !stop.load(Ordering::Acquire) {
        let (buffer, meta) = match stream.next() {
            Ok(captured) => captured,
            Err(err) => {
                warn!(device = %target, error = %err, "v4l2 capture stream failed");
                let _ = frames.blocking_send(Err(SourceError::Io(err)));
                return;
            }
        };
        let used = meta.bytesused as usize;
        let data = if used > 0 && used <= buffer.len() {
            Bytes::copy_from_slice(&buffer[..used])
        } else {
            Bytes::copy_from_slice(buffer)
        };
        let frame = RawFrame {
            data,
            sequence: u64::from(meta.sequence),
        };
        if frames.blocking_send(Ok(frame)).is_err() {
            // receiver dropped: the session is shutting the device down
            return;
        }
    }
    debug!(device = %target, "v4l2 capture thread stopping");
}

fn open_device(target: &Target) -> Result<Device, SourceError> {
    let opened = match target {
        Target::Index(index) => Device::new(*index),
        Target::Path(path) => Device::with_path(path),
    };
    opened.map_err(|e| SourceError::Open {
        device: target.to_string(),
        message: e.to_string(),
    })
}

fn negotiated_format(device: &Device, target: &Target) -> Result<SourceFormat, SourceError> {
    let format = device.format().map_err(|e| SourceError::Open {
        device: target.to_string(),
        message: format!("failed to query format: {e}"),
    })?;
    Ok(SourceFormat {
        width: format.width,
        height: format.height,
        layout: layout_from_fourcc(&format.fourcc.repr),
        buffer_size: format.size as usize,
    })
}

fn layout_from_fourcc(repr: &[u8; 4]) -> PixelLayout {
    match repr {
        b"YUYV" => PixelLayout::Yuyv,
        b"RGB3" => PixelLayout::Rgb24,
        other => PixelLayout::Unknown(u32::from_le_bytes(*other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_mapping() {
        assert_eq!(layout_from_fourcc(b"YUYV"), PixelLayout::Yuyv);
        assert_eq!(layout_from_fourcc(b"RGB3"), PixelLayout::Rgb24);
        assert!(matches!(
            layout_from_fourcc(b"MJPG"),
            PixelLayout::Unknown(_)
        ));
    }

    #[test]
    fn target_display() {
        assert_eq!(V4l2Source::new(2).target.to_string(), "/dev/video2");
        assert_eq!(
            V4l2Source::with_path("/dev/video-front").target.to_string(),
            "/dev/video-front"
        );
    }
}
