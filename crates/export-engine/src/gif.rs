//! Animated GIF output.
//!
//! Frames are quantized and written on a blocking worker while capture
//! continues, so only frames the worker has not reached yet are held in
//! memory.

use std::time::Duration;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame as GifFrame, ImageError, RgbaImage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cardcast_common::error::{CardcastError, CardcastResult};

use crate::frame::Frame;

/// NeuQuant sampling speed, 1 (best) to 30 (fastest).
const QUANTIZER_SPEED: i32 = 10;

/// GIF stores delays in centiseconds and most players clamp anything below
/// 2cs, so faster animations play back slower than captured.
const MAX_FAITHFUL_FPS: u32 = 50;

pub const GIF_MIME_TYPE: &str = "image/gif";

/// Streams captured frames into an infinitely looping animated GIF.
pub struct GifWriter {
    width: u32,
    height: u32,
    fps: u32,
    frames: Option<mpsc::UnboundedSender<RgbaImage>>,
    worker: JoinHandle<CardcastResult<Vec<u8>>>,
    frame_count: u64,
}

impl GifWriter {
    /// Start a writer for `width` x `height` frames shown at `fps`.
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        let fps = fps.max(1);
        if fps > MAX_FAITHFUL_FPS {
            tracing::warn!(fps, "GIF players clamp frame delays; animation will play slower");
        }
        let delay = Delay::from_numer_denom_ms(1000, fps);
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::task::spawn_blocking(move || encode_stream(rx, delay));
        Self {
            width,
            height,
            fps,
            frames: Some(tx),
            worker,
            frame_count: 0,
        }
    }

    /// Frames accepted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Playback length of the frames accepted so far.
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.frame_count * 1_000_000_000 / u64::from(self.fps))
    }

    /// Queue one frame.
    pub fn push(&mut self, frame: Frame) -> CardcastResult<()> {
        if (frame.width(), frame.height()) != (self.width, self.height) {
            return Err(CardcastError::encode(format!(
                "Frame {} is {}x{}, GIF is {}x{}",
                frame.index(),
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let index = frame.index();
        let rgba = DynamicImage::ImageRgb8(frame.into_image()).into_rgba8();
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| CardcastError::encode("GIF writer already finished"))?;
        frames.send(rgba).map_err(|_| {
            CardcastError::encode(format!("GIF encoder stopped before frame {index}"))
        })?;
        self.frame_count += 1;
        Ok(())
    }

    /// Wait for the worker to write every queued frame and return the file.
    pub async fn finish(mut self) -> CardcastResult<Vec<u8>> {
        self.frames = None;
        let bytes = self
            .worker
            .await
            .map_err(|e| CardcastError::encode(format!("GIF encoder task failed: {e}")))??;
        if self.frame_count == 0 {
            return Err(CardcastError::encode("No frames to write"));
        }
        tracing::debug!(
            frames = self.frame_count,
            bytes = bytes.len(),
            "GIF written"
        );
        Ok(bytes)
    }
}

fn encode_stream(
    mut frames: mpsc::UnboundedReceiver<RgbaImage>,
    delay: Delay,
) -> CardcastResult<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut bytes, QUANTIZER_SPEED);
        encoder.set_repeat(Repeat::Infinite).map_err(gif_error)?;
        while let Some(image) = frames.blocking_recv() {
            encoder
                .encode_frame(GifFrame::from_parts(image, 0, 0, delay))
                .map_err(gif_error)?;
        }
    }
    Ok(bytes)
}

fn gif_error(e: ImageError) -> CardcastError {
    CardcastError::encode(format!("GIF encoding failed: {e}"))
}
