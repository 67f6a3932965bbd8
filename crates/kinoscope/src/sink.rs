//! Stream and snapshot sinks.
//!
//! A sink is the consumer half of a camera. The camera holds the sink in
//! its registry and delivers frames through the crate-internal feed
//! capability; the consumer drains through the public [`FrameStream`] /
//! [`Snapshot`] handle. Feeding never blocks and never errors; any
//! buffering pressure is absorbed inside the sink, not by the capture
//! loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use tokio::sync::{watch, Semaphore};
use tracing::debug;

use crate::camera::Shared;

/// Frames a live stream buffers before the oldest is dropped.
pub const STREAM_CAPACITY: usize = 64;

/// Registry entry: what the camera holds for each attached consumer.
pub(crate) enum Sink {
    Stream(Arc<StreamCore>),
    Snapshot(Arc<SnapshotCore>),
}

impl Sink {
    pub(crate) fn id(&self) -> u64 {
        match self {
            Self::Stream(core) => core.id,
            Self::Snapshot(core) => core.id,
        }
    }

    /// Deliver one encoded frame. Never blocks, never errors.
    pub(crate) fn feed(&self, frame: Bytes) {
        match self {
            Self::Stream(core) => core.feed(frame),
            Self::Snapshot(core) => core.feed(frame),
        }
    }

    /// Camera-side teardown; does not touch the registry.
    pub(crate) fn shut(&self) {
        match self {
            Self::Stream(core) => core.shut(),
            Self::Snapshot(core) => core.shut(),
        }
    }
}

pub(crate) fn stream_pair(id: u64, camera: Weak<Shared>) -> (Sink, FrameStream) {
    let core = Arc::new(StreamCore::new(id));
    let handle = FrameStream {
        core: Arc::clone(&core),
        camera,
        attached: true,
    };
    (Sink::Stream(core), handle)
}

pub(crate) fn snapshot_pair(id: u64, camera: Weak<Shared>) -> (Sink, Snapshot) {
    let core = Arc::new(SnapshotCore::new(id));
    let handle = Snapshot {
        core: Arc::clone(&core),
        camera,
        attached: true,
    };
    (Sink::Snapshot(core), handle)
}

pub(crate) struct StreamCore {
    id: u64,
    state: Mutex<StreamState>,
    /// Counts buffered frames; one extra permit is released on close so a
    /// parked reader wakes to observe end-of-stream.
    available: Semaphore,
}

struct StreamState {
    frames: VecDeque<Bytes>,
    closed: bool,
}

impl StreamCore {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(StreamState {
                frames: VecDeque::with_capacity(STREAM_CAPACITY),
                closed: false,
            }),
            available: Semaphore::new(0),
        }
    }

    fn feed(&self, frame: Bytes) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        if state.frames.len() == STREAM_CAPACITY {
            // ring is full: evict the oldest, permit count stays in step
            state.frames.pop_front();
        } else {
            self.available.add_permits(1);
        }
        state.frames.push_back(frame);
    }

    fn shut(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.frames.clear();
        self.available.add_permits(1);
    }

    async fn pop(&self) -> Option<Bytes> {
        match self.available.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return None,
        }
        self.state.lock().unwrap().frames.pop_front()
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.state.lock().unwrap().frames.len()
    }
}

/// Ordered live frame consumer returned by [`crate::Camera::stream`].
///
/// Single-consumer: one task drains it at a time. The handle detaches
/// itself from the camera once it observes end-of-stream, on `close`, or
/// on drop.
pub struct FrameStream {
    core: Arc<StreamCore>,
    camera: Weak<Shared>,
    attached: bool,
}

impl FrameStream {
    /// Wait for the next encoded frame. `None` is end-of-stream: the sink
    /// was closed by the camera (fault or shutdown) or by [`close`].
    ///
    /// [`close`]: FrameStream::close
    pub async fn next(&mut self) -> Option<Bytes> {
        match self.core.pop().await {
            Some(frame) => Some(frame),
            None => {
                self.detach().await;
                None
            }
        }
    }

    /// Detach from the camera and discard anything still buffered. A
    /// reader parked in [`next`] observes end-of-stream.
    ///
    /// [`next`]: FrameStream::next
    pub async fn close(&mut self) {
        self.detach().await;
        self.core.shut();
    }

    async fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        if let Some(camera) = self.camera.upgrade() {
            camera.remove_sink(self.core.id).await;
        }
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.core.shut();
        // deregistration needs the registry lock; hand it to the runtime
        if let Some(camera) = self.camera.upgrade() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let id = self.core.id;
                let _ = handle.spawn(async move { camera.remove_sink(id).await });
            } else {
                debug!(sink = self.core.id, "stream dropped outside a runtime");
            }
        }
    }
}

pub(crate) struct SnapshotCore {
    id: u64,
    slot: Mutex<Option<Bytes>>,
    done: watch::Sender<bool>,
}

impl SnapshotCore {
    fn new(id: u64) -> Self {
        Self {
            id,
            slot: Mutex::new(None),
            done: watch::Sender::new(false),
        }
    }

    fn feed(&self, frame: Bytes) {
        *self.slot.lock().unwrap() = Some(frame);
        self.done.send_replace(true);
    }

    fn shut(&self) {
        self.done.send_replace(true);
    }

    async fn wait(&self) -> Option<Bytes> {
        let mut rx = self.done.subscribe();
        // the sender lives on self, so wait_for cannot fail
        let _ = rx.wait_for(|done| *done).await;
        self.slot.lock().unwrap().clone()
    }
}

/// One-shot frame consumer returned by [`crate::Camera::snapshot_sink`].
pub struct Snapshot {
    core: Arc<SnapshotCore>,
    camera: Weak<Shared>,
    attached: bool,
}

impl Snapshot {
    /// Wait for a frame. `None` means the sink was closed before one
    /// arrived (camera fault or shutdown).
    pub async fn get(&self) -> Option<Bytes> {
        self.core.wait().await
    }

    /// Unblock any waiter and detach from the camera.
    pub async fn close(&mut self) {
        self.core.shut();
        self.detach().await;
    }

    async fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        if let Some(camera) = self.camera.upgrade() {
            camera.remove_sink(self.core.id).await;
        }
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.core.shut();
        if let Some(camera) = self.camera.upgrade() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let id = self.core.id;
                let _ = handle.spawn(async move { camera.remove_sink(id).await });
            } else {
                debug!(sink = self.core.id, "snapshot dropped outside a runtime");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_delivers_in_order() {
        let core = StreamCore::new(1);
        core.feed(Bytes::from_static(b"a"));
        core.feed(Bytes::from_static(b"b"));
        assert_eq!(core.pop().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(core.pop().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_without_faking_end_of_stream() {
        let core = StreamCore::new(1);
        for i in 0..STREAM_CAPACITY as u64 + 1 {
            core.feed(Bytes::from(i.to_be_bytes().to_vec()));
        }
        assert_eq!(core.buffered(), STREAM_CAPACITY);
        // permits stayed in step with the ring
        assert_eq!(core.available.available_permits(), STREAM_CAPACITY);
        // frame 0 was evicted; the drain starts at 1 and covers the rest
        for i in 1..STREAM_CAPACITY as u64 + 1 {
            let frame = core.pop().await.unwrap();
            assert_eq!(frame, Bytes::from(i.to_be_bytes().to_vec()));
        }
        assert_eq!(core.available.available_permits(), 0);
    }

    #[tokio::test]
    async fn shut_wakes_parked_reader() {
        let core = Arc::new(StreamCore::new(1));
        let reader = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.pop().await })
        };
        tokio::task::yield_now().await;
        core.shut();
        let popped = tokio::time::timeout(std::time::Duration::from_secs(5), reader)
            .await
            .expect("reader should wake")
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn feed_after_shut_is_ignored() {
        let core = StreamCore::new(1);
        core.shut();
        core.feed(Bytes::from_static(b"late"));
        assert_eq!(core.buffered(), 0);
    }

    #[tokio::test]
    async fn snapshot_returns_fed_frame() {
        let core = SnapshotCore::new(1);
        core.feed(Bytes::from_static(b"frame"));
        assert_eq!(core.wait().await.unwrap(), Bytes::from_static(b"frame"));
    }

    #[tokio::test]
    async fn snapshot_shut_unblocks_empty() {
        let core = Arc::new(SnapshotCore::new(1));
        let waiter = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.wait().await })
        };
        tokio::task::yield_now().await;
        core.shut();
        let got = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(got.is_none());
    }
}
