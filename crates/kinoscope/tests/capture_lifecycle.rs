//! Session lifecycle scenarios driven through a scripted device.
//!
//! The scripted source hands the capture loop exactly the frames (or
//! faults) a test pushes into it, and exposes counters so tests can
//! observe opens, closes, and loop progress without timing games.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use kinoscope::{
    Camera, CameraOptions, FormatError, FrameFormatter, FrameSource, PixelLayout, RawFrame,
    SourceError, SourceFormat,
};

const TICK: Duration = Duration::from_millis(10);
const GUARD: Duration = Duration::from_secs(5);

#[derive(Default)]
struct SourceProbe {
    opens: AtomicUsize,
    closes: AtomicUsize,
    open_now: AtomicBool,
    /// Incremented at each `next_frame` entry: `pulls == n + 1` proves the
    /// first `n` frames are fully broadcast and the loop is parked again.
    pulls: AtomicUsize,
}

struct ScriptedSource {
    frames: mpsc::UnboundedReceiver<Result<RawFrame, SourceError>>,
    probe: Arc<SourceProbe>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn open(&mut self) -> Result<SourceFormat, SourceError> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        self.probe.open_now.store(true, Ordering::SeqCst);
        Ok(SourceFormat {
            width: 4,
            height: 2,
            layout: PixelLayout::Yuyv,
            buffer_size: 16,
        })
    }

    async fn next_frame(&mut self) -> Result<RawFrame, SourceError> {
        self.probe.pulls.fetch_add(1, Ordering::SeqCst);
        match self.frames.recv().await {
            Some(result) => result,
            None => Err(SourceError::Disconnected),
        }
    }

    async fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.probe.open_now.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct Feeder {
    tx: mpsc::UnboundedSender<Result<RawFrame, SourceError>>,
    sequence: Arc<AtomicUsize>,
}

impl Feeder {
    fn frame(&self, payload: &[u8]) -> Bytes {
        let data = Bytes::copy_from_slice(payload);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) as u64;
        self.tx
            .send(Ok(RawFrame {
                data: data.clone(),
                sequence,
            }))
            .expect("capture loop gone");
        data
    }

    fn fault(&self) {
        self.tx
            .send(Err(SourceError::Disconnected))
            .expect("capture loop gone");
    }
}

#[derive(Default)]
struct FormatterProbe {
    configures: AtomicUsize,
    encodes: AtomicUsize,
}

/// Passes raw frame bytes through untouched, counting calls.
struct PassthroughFormatter {
    probe: Arc<FormatterProbe>,
}

impl FrameFormatter for PassthroughFormatter {
    fn configure(&mut self, _format: &SourceFormat) -> Result<(), FormatError> {
        self.probe.configures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn encode(&mut self, frame: &RawFrame) -> Result<Bytes, FormatError> {
        self.probe.encodes.fetch_add(1, Ordering::SeqCst);
        Ok(frame.data.clone())
    }
}

async fn scripted_camera(
    on_demand: bool,
) -> (Camera, Feeder, Arc<SourceProbe>, Arc<FormatterProbe>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let source_probe = Arc::new(SourceProbe::default());
    let formatter_probe = Arc::new(FormatterProbe::default());
    let camera = Camera::open(
        Box::new(ScriptedSource {
            frames: rx,
            probe: Arc::clone(&source_probe),
        }),
        Box::new(PassthroughFormatter {
            probe: Arc::clone(&formatter_probe),
        }),
        CameraOptions {
            label: "scripted".into(),
            on_demand,
        },
    )
    .await;
    let feeder = Feeder {
        tx,
        sequence: Arc::new(AtomicUsize::new(0)),
    };
    (camera, feeder, source_probe, formatter_probe)
}

/// Wait until the capture loop has entered `next_frame` `n` times.
async fn wait_for_pulls(probe: &SourceProbe, n: usize) {
    timeout(GUARD, async {
        while probe.pulls.load(Ordering::SeqCst) < n {
            tokio::time::sleep(TICK).await;
        }
    })
    .await
    .expect("capture loop never reached the expected pull");
}

#[tokio::test]
async fn on_demand_starts_and_stops_with_registry() {
    let (camera, _feeder, probe, _) = scripted_camera(true).await;
    assert!(!camera.is_capturing().await);
    assert_eq!(probe.opens.load(Ordering::SeqCst), 0);

    let mut stream = camera.stream().await;
    assert!(camera.is_capturing().await);
    assert_eq!(camera.sink_count().await, 1);

    stream.close().await;
    assert!(!camera.is_capturing().await);
    assert_eq!(camera.sink_count().await, 0);
    assert_eq!(probe.opens.load(Ordering::SeqCst), 1);
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    assert!(!probe.open_now.load(Ordering::SeqCst));
}

#[tokio::test]
async fn stream_yields_frames_in_order_then_removal_stops_capture() {
    let (camera, feeder, probe, _) = scripted_camera(true).await;
    let mut stream = camera.stream().await;

    let a = feeder.frame(b"frame-a");
    let b = feeder.frame(b"frame-b");
    let c = feeder.frame(b"frame-c");

    assert_eq!(timeout(GUARD, stream.next()).await.unwrap().unwrap(), a);
    assert_eq!(timeout(GUARD, stream.next()).await.unwrap().unwrap(), b);
    assert_eq!(timeout(GUARD, stream.next()).await.unwrap().unwrap(), c);

    stream.close().await;
    assert!(!camera.is_capturing().await);
    assert!(!probe.open_now.load(Ordering::SeqCst));
}

#[tokio::test]
async fn always_on_captures_without_sinks_and_discards_frames() {
    let (camera, feeder, probe, formatter) = scripted_camera(false).await;
    assert!(camera.is_capturing().await);
    assert_eq!(camera.sink_count().await, 0);

    feeder.frame(b"unseen-1");
    feeder.frame(b"unseen-2");
    // pull 3 means both frames went through the broadcast check
    wait_for_pulls(&probe, 3).await;
    assert_eq!(formatter.encodes.load(Ordering::SeqCst), 0);

    let mut stream = camera.stream().await;
    let seen = feeder.frame(b"seen");
    assert_eq!(timeout(GUARD, stream.next()).await.unwrap().unwrap(), seen);
    assert_eq!(formatter.encodes.load(Ordering::SeqCst), 1);

    // removing the only sink does not stop an always-on camera
    stream.close().await;
    assert!(camera.is_capturing().await);

    camera.close().await;
    assert!(!camera.is_capturing().await);
}

#[tokio::test]
async fn close_is_idempotent() {
    let (camera, _feeder, probe, _) = scripted_camera(true).await;
    let mut stream = camera.stream().await;

    camera.close().await;
    assert!(!camera.is_capturing().await);
    assert_eq!(camera.sink_count().await, 0);
    assert!(!probe.open_now.load(Ordering::SeqCst));
    assert!(timeout(GUARD, stream.next()).await.unwrap().is_none());

    camera.close().await;
    assert!(!camera.is_capturing().await);
    assert_eq!(camera.sink_count().await, 0);
    assert!(!probe.open_now.load(Ordering::SeqCst));
}

#[tokio::test]
async fn close_sinks_unblocks_parked_stream_reader() {
    let (camera, _feeder, _probe, _) = scripted_camera(true).await;
    let mut stream = camera.stream().await;

    let reader = tokio::spawn(async move { stream.next().await });
    tokio::task::yield_now().await;

    camera.close_sinks().await;
    let got = timeout(GUARD, reader)
        .await
        .expect("parked reader should observe end-of-stream")
        .unwrap();
    assert!(got.is_none());
    assert_eq!(camera.sink_count().await, 0);
}

#[tokio::test]
async fn snapshot_delivers_the_fed_frame() {
    let (camera, feeder, _probe, _) = scripted_camera(true).await;
    let snapshot = camera.snapshot_sink().await;
    let fed = feeder.frame(b"one-shot");
    assert_eq!(timeout(GUARD, snapshot.get()).await.unwrap().unwrap(), fed);
}

#[tokio::test]
async fn snapshot_convenience_returns_a_frame() {
    let (camera, feeder, _probe, _) = scripted_camera(true).await;
    let grab = tokio::spawn(async move {
        let frame = camera.snapshot().await;
        (camera, frame)
    });
    // the snapshot sink starts capture; feed it one frame
    let fed = feeder.frame(b"grabbed");
    let (camera, frame) = timeout(GUARD, grab).await.unwrap().unwrap();
    assert_eq!(frame.unwrap(), fed);
    // the convenience path detaches its sink and stops on-demand capture
    assert_eq!(camera.sink_count().await, 0);
    assert!(!camera.is_capturing().await);
}

#[tokio::test]
async fn snapshot_closed_before_feed_yields_none() {
    let (camera, _feeder, _probe, _) = scripted_camera(true).await;
    let mut snapshot = camera.snapshot_sink().await;
    snapshot.close().await;
    assert!(timeout(GUARD, snapshot.get()).await.unwrap().is_none());
    assert_eq!(camera.sink_count().await, 0);
}

#[tokio::test]
async fn device_fault_tears_the_session_down() {
    let (camera, feeder, probe, _) = scripted_camera(true).await;
    let mut stream = camera.stream().await;
    let snapshot = camera.snapshot_sink().await;

    feeder.fault();

    assert!(timeout(GUARD, stream.next()).await.unwrap().is_none());
    assert!(timeout(GUARD, snapshot.get()).await.unwrap().is_none());
    // the faulted task closed the device and was reaped on detach
    assert!(!camera.is_capturing().await);
    assert!(!probe.open_now.load(Ordering::SeqCst));
    assert_eq!(camera.sink_count().await, 0);
}

#[tokio::test]
async fn no_frame_reaches_a_removed_sink() {
    let (camera, feeder, _probe, _) = scripted_camera(true).await;
    let mut first = camera.stream().await;
    let mut second = camera.stream().await;

    let shared = feeder.frame(b"both");
    assert_eq!(
        timeout(GUARD, first.next()).await.unwrap().unwrap(),
        shared
    );
    assert_eq!(
        timeout(GUARD, second.next()).await.unwrap().unwrap(),
        shared
    );

    first.close().await;
    assert_eq!(camera.sink_count().await, 1);
    assert!(camera.is_capturing().await);

    let late = feeder.frame(b"late");
    assert_eq!(timeout(GUARD, second.next()).await.unwrap().unwrap(), late);
    // the closed stream observes end-of-stream, not the late frame
    assert!(timeout(GUARD, first.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn registry_accounting_matches_adds_minus_removes() {
    let (camera, _feeder, _probe, _) = scripted_camera(true).await;
    let mut streams = Vec::new();
    for _ in 0..3 {
        streams.push(camera.stream().await);
    }
    let mut snapshot = camera.snapshot_sink().await;
    assert_eq!(camera.sink_count().await, 4);

    streams.pop().unwrap().close().await;
    snapshot.close().await;
    assert_eq!(camera.sink_count().await, 2);

    camera.close_sinks().await;
    assert_eq!(camera.sink_count().await, 0);
}

#[tokio::test]
async fn concurrent_attach_detach_storm_settles_clean() {
    let (camera, _feeder, _probe, _) = scripted_camera(true).await;
    let camera = Arc::new(camera);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let camera = Arc::clone(&camera);
        tasks.push(tokio::spawn(async move {
            for _ in 0..4 {
                let mut stream = camera.stream().await;
                tokio::task::yield_now().await;
                stream.close().await;
            }
        }));
    }
    for task in tasks {
        timeout(GUARD, task).await.expect("storm deadlocked").unwrap();
    }

    assert_eq!(camera.sink_count().await, 0);
    assert!(!camera.is_capturing().await);
}

#[tokio::test]
async fn dropped_stream_detaches_itself() {
    let (camera, _feeder, _probe, _) = scripted_camera(true).await;
    let stream = camera.stream().await;
    assert_eq!(camera.sink_count().await, 1);

    drop(stream);
    timeout(GUARD, async {
        while camera.sink_count().await > 0 {
            tokio::time::sleep(TICK).await;
        }
    })
    .await
    .expect("dropped stream was never deregistered");
    timeout(GUARD, async {
        while camera.is_capturing().await {
            tokio::time::sleep(TICK).await;
        }
    })
    .await
    .expect("capture kept running after the only sink was dropped");
}
