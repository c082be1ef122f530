//! Test doubles for export sessions: a scripted encoder backend and a
//! synthetic surface that counts what it hands out.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::RgbaImage;

use cardcast_common::config::RgbColor;
use cardcast_common::error::{CardcastError, CardcastResult};
use cardcast_export_engine::encoder::{ChunkSender, EncoderBackend, EncoderConfig};
use cardcast_export_engine::surface::{SyntheticCard, SyntheticCardSurface};
use cardcast_export_engine::{Frame, RenderSurface, SurfaceProvider};
use cardcast_webm::{ChunkType, EncodedChunk, VideoCodec};

pub const KEY_CHUNK_BYTES: usize = 4096;
pub const DELTA_CHUNK_BYTES: usize = 1024;

#[derive(Debug, Default)]
pub struct EncoderStats {
    pub configured: Mutex<Option<EncoderConfig>>,
    pub closes: AtomicUsize,
    pub frames: AtomicU64,
    pub key_requests: Mutex<Vec<u64>>,
    /// Top-left pixel of every frame received.
    pub corner_pixels: Mutex<Vec<[u8; 3]>>,
}

impl EncoderStats {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn key_requests(&self) -> Vec<u64> {
        self.key_requests.lock().unwrap().clone()
    }

    pub fn corner_pixels(&self) -> Vec<[u8; 3]> {
        self.corner_pixels.lock().unwrap().clone()
    }

    pub fn configured_codec(&self) -> Option<VideoCodec> {
        self.configured.lock().unwrap().as_ref().map(|c| c.codec)
    }
}

/// Encoder that "compresses" a frame by sampling its pixels.
///
/// Keyframes are [`KEY_CHUNK_BYTES`] long, delta frames
/// [`DELTA_CHUNK_BYTES`]. Up to `hold_back` chunks stay queued until a later
/// frame or `flush` pushes them out.
pub struct ScriptedEncoder {
    supported: Vec<VideoCodec>,
    hold_back: usize,
    fail_on_frame: Option<u64>,
    output: Option<ChunkSender>,
    pending: VecDeque<EncodedChunk>,
    stats: Arc<EncoderStats>,
}

impl ScriptedEncoder {
    pub fn new(supported: &[VideoCodec]) -> Self {
        Self {
            supported: supported.to_vec(),
            hold_back: 0,
            fail_on_frame: None,
            output: None,
            pending: VecDeque::new(),
            stats: Arc::new(EncoderStats::default()),
        }
    }

    pub fn vp9_and_vp8() -> Self {
        Self::new(&[VideoCodec::Vp9, VideoCodec::Vp8])
    }

    pub fn with_hold_back(mut self, chunks: usize) -> Self {
        self.hold_back = chunks;
        self
    }

    pub fn failing_on_frame(mut self, index: u64) -> Self {
        self.fail_on_frame = Some(index);
        self
    }

    pub fn stats(&self) -> Arc<EncoderStats> {
        self.stats.clone()
    }

    fn emit_while(&mut self, keep: usize) {
        while self.pending.len() > keep {
            let Some(chunk) = self.pending.pop_front() else {
                break;
            };
            if let Some(output) = &self.output {
                let _ = output.send(chunk);
            }
        }
    }
}

#[async_trait]
impl EncoderBackend for ScriptedEncoder {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn is_config_supported(&self, config: &EncoderConfig) -> bool {
        self.supported.contains(&config.codec)
    }

    fn configure(&mut self, config: &EncoderConfig, output: ChunkSender) -> CardcastResult<()> {
        *self.stats.configured.lock().unwrap() = Some(config.clone());
        self.output = Some(output);
        Ok(())
    }

    fn encode(&mut self, frame: Frame, key_frame: bool) -> CardcastResult<()> {
        if self.fail_on_frame == Some(frame.index()) {
            return Err(CardcastError::encode(format!(
                "scripted fault on frame {}",
                frame.index()
            )));
        }
        self.stats.frames.fetch_add(1, Ordering::SeqCst);
        self.stats
            .corner_pixels
            .lock()
            .unwrap()
            .push(frame.image().get_pixel(0, 0).0);
        let (len, chunk_type) = if key_frame {
            self.stats.key_requests.lock().unwrap().push(frame.index());
            (KEY_CHUNK_BYTES, ChunkType::Key)
        } else {
            (DELTA_CHUNK_BYTES, ChunkType::Delta)
        };
        let payload: Vec<u8> = frame.image().as_raw().iter().copied().cycle().take(len).collect();
        self.pending
            .push_back(EncodedChunk::new(payload, frame.timestamp_us(), chunk_type));
        self.emit_while(self.hold_back);
        Ok(())
    }

    async fn flush(&mut self) -> CardcastResult<()> {
        self.emit_while(0);
        Ok(())
    }

    fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.output = None;
        self.pending.clear();
    }
}

#[derive(Debug, Default)]
pub struct SurfaceStats {
    pub loads: AtomicUsize,
    pub releases: AtomicUsize,
    pub live: AtomicI64,
    pub snapshots: AtomicU64,
    /// When each snapshot was taken, in order.
    pub snapshot_times: Mutex<Vec<Instant>>,
}

impl SurfaceStats {
    pub fn live(&self) -> i64 {
        self.live.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn snapshot_times(&self) -> Vec<Instant> {
        self.snapshot_times.lock().unwrap().clone()
    }
}

/// Provider of synthetic card surfaces that tracks every handle it issues.
pub struct CountingProvider {
    card: SyntheticCard,
    bounds: Option<Option<(u32, u32)>>,
    fail_snapshot_at: Option<u64>,
    stats: Arc<SurfaceStats>,
}

impl CountingProvider {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            card: SyntheticCard::new(width, height)
                .with_background(RgbColor([0xfa, 0xf0, 0xe6]))
                .with_paint_interval(Duration::from_millis(2)),
            bounds: None,
            fail_snapshot_at: None,
            stats: Arc::new(SurfaceStats::default()),
        }
    }

    /// Report these bounds instead of the card's size.
    pub fn with_bounds(mut self, bounds: Option<(u32, u32)>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Fail the snapshot with this zero-based index.
    pub fn failing_snapshot(mut self, index: u64) -> Self {
        self.fail_snapshot_at = Some(index);
        self
    }

    pub fn stats(&self) -> Arc<SurfaceStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl SurfaceProvider for CountingProvider {
    async fn load(&self) -> CardcastResult<Box<dyn RenderSurface>> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSurface {
            inner: SyntheticCardSurface::new(self.card.clone()),
            bounds: self.bounds,
            fail_snapshot_at: self.fail_snapshot_at,
            stats: self.stats.clone(),
            released: false,
        }))
    }
}

struct CountingSurface {
    inner: SyntheticCardSurface,
    bounds: Option<Option<(u32, u32)>>,
    fail_snapshot_at: Option<u64>,
    stats: Arc<SurfaceStats>,
    released: bool,
}

#[async_trait]
impl RenderSurface for CountingSurface {
    fn name(&self) -> &str {
        "counting-card"
    }

    fn bounds(&self) -> Option<(u32, u32)> {
        match self.bounds {
            Some(bounds) => bounds,
            None => self.inner.bounds(),
        }
    }

    fn background(&self) -> Option<RgbColor> {
        self.inner.background()
    }

    async fn next_paint(&mut self) -> CardcastResult<()> {
        self.inner.next_paint().await
    }

    fn snapshot(&mut self) -> CardcastResult<RgbaImage> {
        self.stats.snapshot_times.lock().unwrap().push(Instant::now());
        let index = self.stats.snapshots.fetch_add(1, Ordering::SeqCst);
        if self.fail_snapshot_at == Some(index) {
            return Err(CardcastError::capture(format!("scripted snapshot failure {index}")));
        }
        self.inner.snapshot()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stats.releases.fetch_add(1, Ordering::SeqCst);
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.release();
    }
}
