//! The capture session: device ownership, task lifecycle, frame fan-out.
//!
//! One [`Camera`] owns one exclusive device. Consumers attach stream or
//! snapshot sinks; a background capture task runs while the policy wants
//! it (at least one sink attached, or always for a non-on-demand camera)
//! and broadcasts every encoded frame to all attached sinks.
//!
//! Startup and shutdown are coordinated with a two-signal handshake:
//!
//! ```text
//! starter                       capture task
//!   re-arm ready                     .
//!   spawn, store handle ──────▶ raise ready
//!   wait ready ◀──────────────  wait begin
//!   raise begin ──────────────▶ open device, pull frames
//! ```
//!
//! The stopper also waits for ready and raises begin before cancelling.
//! A cancellation therefore never lands before the task has reached its
//! wait point, and can never strand a half-started task with the device
//! open and nobody left to close it. Both sequences run under one task
//! lock, so at most one start-or-stop is in flight at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CameraError;
use crate::format::FrameFormatter;
use crate::sink::{self, FrameStream, Sink, Snapshot};
use crate::source::FrameSource;

/// Capture policy and identification for a [`Camera`].
#[derive(Debug, Clone)]
pub struct CameraOptions {
    /// Device label used in logs.
    pub label: String,
    /// Capture only while at least one sink is attached. When false the
    /// capture task starts at construction and runs until [`Camera::close`].
    pub on_demand: bool,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            label: "camera".into(),
            on_demand: true,
        }
    }
}

/// Handle to a launched capture task. Exists iff the task has been
/// spawned and not yet reaped; only ever touched under the task lock.
struct CaptureTask {
    handle: JoinHandle<Result<(), CameraError>>,
    cancel: CancellationToken,
}

pub(crate) struct Shared {
    options: CameraOptions,
    /// Device slot. Held by the capture task for its whole run; public
    /// teardown touches it only after the task has been reaped.
    source: Mutex<Box<dyn FrameSource>>,
    /// Same discipline as the device slot.
    formatter: Mutex<Box<dyn FrameFormatter>>,
    /// The task-mutation lock.
    task: Mutex<Option<CaptureTask>>,
    /// The sink registry; shared by attach, detach, and broadcast.
    sinks: Mutex<Vec<Sink>>,
    ready: watch::Sender<bool>,
    begin: watch::Sender<bool>,
    next_sink_id: AtomicU64,
}

/// An exclusive capture device with on-demand fan-out to stream and
/// snapshot sinks.
pub struct Camera {
    shared: Arc<Shared>,
}

impl Camera {
    /// Take ownership of a source and formatter. A non-on-demand camera
    /// starts capturing immediately and runs until [`Camera::close`].
    pub async fn open(
        source: Box<dyn FrameSource>,
        formatter: Box<dyn FrameFormatter>,
        options: CameraOptions,
    ) -> Self {
        let on_demand = options.on_demand;
        let camera = Self {
            shared: Arc::new(Shared {
                options,
                source: Mutex::new(source),
                formatter: Mutex::new(formatter),
                task: Mutex::new(None),
                sinks: Mutex::new(Vec::new()),
                ready: watch::Sender::new(false),
                begin: watch::Sender::new(false),
                next_sink_id: AtomicU64::new(1),
            }),
        };
        if !on_demand {
            Shared::ensure_started(&camera.shared, true).await;
        }
        camera
    }

    /// Attach a live stream sink, starting capture if the policy wants it.
    /// Never blocks on capture itself.
    pub async fn stream(&self) -> FrameStream {
        let id = self.shared.next_sink_id.fetch_add(1, Ordering::Relaxed);
        let (entry, handle) = sink::stream_pair(id, Arc::downgrade(&self.shared));
        self.shared.sinks.lock().await.push(entry);
        Shared::ensure_started(&self.shared, false).await;
        debug!(sink = id, camera = %self.shared.options.label, "stream attached");
        handle
    }

    /// Attach a one-shot snapshot sink, starting capture if the policy
    /// wants it.
    pub async fn snapshot_sink(&self) -> Snapshot {
        let id = self.shared.next_sink_id.fetch_add(1, Ordering::Relaxed);
        let (entry, handle) = sink::snapshot_pair(id, Arc::downgrade(&self.shared));
        self.shared.sinks.lock().await.push(entry);
        Shared::ensure_started(&self.shared, false).await;
        debug!(sink = id, camera = %self.shared.options.label, "snapshot attached");
        handle
    }

    /// Grab one encoded frame: attach a snapshot sink, wait for delivery,
    /// detach. `None` means the camera faulted or was closed before a
    /// frame arrived.
    pub async fn snapshot(&self) -> Option<Bytes> {
        let mut snapshot = self.snapshot_sink().await;
        let frame = snapshot.get().await;
        snapshot.close().await;
        frame
    }

    /// Stop capture regardless of policy, release the device, and
    /// force-close every attached sink. Idempotent.
    pub async fn close(&self) {
        self.shared.ensure_stopped(true).await;
        self.shared.source.lock().await.close().await;
        self.shared.close_sinks().await;
        info!(camera = %self.shared.options.label, "camera closed");
    }

    /// Force-close and detach every sink without touching the device.
    /// Used to evict consumers at process shutdown while the camera
    /// object stays alive for the final [`Camera::close`].
    pub async fn close_sinks(&self) {
        self.shared.close_sinks().await;
    }

    /// Whether the background capture task is currently present.
    pub async fn is_capturing(&self) -> bool {
        self.shared.task.lock().await.is_some()
    }

    /// Number of currently attached sinks.
    pub async fn sink_count(&self) -> usize {
        self.shared.sinks.lock().await.len()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        // last-resort stop for a camera dropped without close(); the task
        // closes the device itself on cancellation
        if let Ok(mut task) = self.shared.task.try_lock() {
            if let Some(task) = task.take() {
                task.cancel.cancel();
            }
        }
    }
}

impl Shared {
    /// Start sequence. Serialized with the stop sequence by the task lock.
    async fn ensure_started(this: &Arc<Self>, force: bool) {
        let mut task = this.task.lock().await;
        if task.is_some() {
            return;
        }
        let wanted = force || (this.options.on_demand && !this.sinks.lock().await.is_empty());
        if !wanted {
            return;
        }
        this.ready.send_replace(false);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::capture_task(Arc::clone(this), cancel.clone()));
        *task = Some(CaptureTask { handle, cancel });
        // the task raises ready once it is parked at its wait point; until
        // then nobody may observe (or cancel) the stored handle
        let mut ready = this.ready.subscribe();
        let _ = ready.wait_for(|raised| *raised).await;
        this.begin.send_replace(true);
        debug!(camera = %this.options.label, "capture task started");
    }

    /// Stop sequence. `force` ignores the on-demand policy.
    async fn ensure_stopped(&self, force: bool) {
        let mut task = self.task.lock().await;
        if task.is_none() {
            return;
        }
        let wanted = force || (self.options.on_demand && self.sinks.lock().await.is_empty());
        if !wanted {
            return;
        }
        // never cancel a task that has not checked in yet; it may be about
        // to open the device with nobody left to close it
        let mut ready = self.ready.subscribe();
        let _ = ready.wait_for(|raised| *raised).await;
        // unblock a task still parked at its wait point so the
        // cancellation always lands past the handshake
        self.begin.send_replace(true);
        if let Some(CaptureTask { handle, cancel }) = task.take() {
            cancel.cancel();
            match handle.await {
                Ok(Ok(())) => debug!(camera = %self.options.label, "capture task stopped"),
                Ok(Err(err)) => {
                    warn!(camera = %self.options.label, error = %err, "capture task failed")
                }
                Err(err) => {
                    warn!(camera = %self.options.label, error = %err, "capture task aborted")
                }
            }
        }
        self.begin.send_replace(false);
    }

    /// Detach one sink by id (idempotent), then stop capture if idle.
    pub(crate) async fn remove_sink(&self, id: u64) {
        {
            let mut sinks = self.sinks.lock().await;
            if let Some(pos) = sinks.iter().position(|sink| sink.id() == id) {
                sinks.remove(pos);
                debug!(sink = id, camera = %self.options.label, "sink detached");
            }
        }
        self.ensure_stopped(false).await;
    }

    pub(crate) async fn close_sinks(&self) {
        let mut sinks = self.sinks.lock().await;
        for sink in sinks.drain(..) {
            sink.shut();
        }
    }

    /// Background capture task: handshake, device scope, frame loop.
    async fn capture_task(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<(), CameraError> {
        self.ready.send_replace(true);
        let mut begin = self.begin.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = begin.wait_for(|raised| *raised) => {}
        }

        let mut source = self.source.lock().await;
        let mut formatter = self.formatter.lock().await;
        let outcome =
            Self::capture_loop(source.as_mut(), formatter.as_mut(), &self, &cancel).await;
        // the device is released on every exit path, faults included
        source.close().await;
        drop(formatter);
        drop(source);

        if let Err(err) = outcome {
            // a capture fault tears the consumers down here; the error
            // itself is reaped and logged by the next stop sequence
            self.close_sinks().await;
            return Err(err);
        }
        Ok(())
    }

    async fn capture_loop(
        source: &mut dyn FrameSource,
        formatter: &mut dyn FrameFormatter,
        shared: &Shared,
        cancel: &CancellationToken,
    ) -> Result<(), CameraError> {
        let format = source.open().await?;
        info!(
            camera = %shared.options.label,
            width = format.width,
            height = format.height,
            layout = %format.layout,
            "capture running"
        );
        formatter.configure(&format)?;
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = source.next_frame() => frame?,
            };
            let sinks = shared.sinks.lock().await;
            if sinks.is_empty() {
                continue;
            }
            // encode once per frame, under the registry lock: a frame is
            // never delivered to a sink mid-detach
            let encoded = formatter.encode(&frame)?;
            for sink in sinks.iter() {
                sink.feed(encoded.clone());
            }
        }
    }
}
