//! Synthetic frame source for development and tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::source::{FrameSource, SourceError};
use crate::types::{PixelLayout, RawFrame, SourceFormat};

/// Produces a horizontally scrolling YUYV luma gradient at a fixed rate.
///
/// Stands in for real hardware in tests, demos, and `device = "test"`
/// deployments where no camera is present.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    ticker: Option<Interval>,
    sequence: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, rate_hz: u32) -> Self {
        let rate_hz = rate_hz.max(1);
        Self {
            width,
            height,
            frame_interval: Duration::from_micros((1_000_000 / u64::from(rate_hz)).max(1)),
            ticker: None,
            sequence: 0,
        }
    }

    fn format(&self) -> SourceFormat {
        SourceFormat {
            width: self.width,
            height: self.height,
            layout: PixelLayout::Yuyv,
            buffer_size: (self.width * self.height * 2) as usize,
        }
    }

    fn render(&self) -> Bytes {
        let width = self.width as usize;
        let shift = (self.sequence * 4) as u8;
        let mut data = vec![0u8; width * self.height as usize * 2];
        for row in data.chunks_exact_mut(width * 2) {
            for (x, pair) in row.chunks_exact_mut(4).enumerate() {
                let luma = (((x * 2 * 255) / width) as u8).wrapping_add(shift);
                pair[0] = luma;
                pair[1] = 128;
                pair[2] = luma;
                pair[3] = 128;
            }
        }
        Bytes::from(data)
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new(640, 480, 15)
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn open(&mut self) -> Result<SourceFormat, SourceError> {
        let mut ticker = interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.sequence = 0;
        Ok(self.format())
    }

    async fn next_frame(&mut self) -> Result<RawFrame, SourceError> {
        let ticker = self.ticker.as_mut().ok_or(SourceError::NotOpen)?;
        ticker.tick().await;
        let frame = RawFrame {
            data: self.render(),
            sequence: self.sequence,
        };
        self.sequence += 1;
        Ok(frame)
    }

    async fn close(&mut self) {
        self.ticker = None;
    }
}
