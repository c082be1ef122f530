//! Frame capture: turn surface snapshots into opaque, timestamped frames.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use cardcast_common::clock::FrameSchedule;
use cardcast_common::config::RgbColor;
use cardcast_common::error::{CardcastError, CardcastResult};

use crate::surface::RenderSurface;

/// Paints to wait for before each snapshot. The first may still show the
/// previous frame's layout; after the second the region is settled.
const PAINTS_PER_CAPTURE: usize = 2;

/// One captured, fully opaque frame ready for encoding.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    index: u64,
    timestamp_us: u64,
    key_frame: bool,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64, timestamp_us: u64, key_frame: bool) -> Self {
        Self {
            image,
            index,
            timestamp_us,
            key_frame,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Position in the export, starting at 0.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Nominal presentation time in microseconds since capture start.
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Whether the schedule asks for this frame to be a keyframe.
    pub fn key_frame(&self) -> bool {
        self.key_frame
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw RGB bytes with each row padded to `stride` bytes.
    ///
    /// Encoders that align rows (GStreamer rounds RGB rows up to a multiple
    /// of 4) need this when `width * 3` is not already aligned.
    pub fn into_strided_rows(self, stride: usize) -> CardcastResult<Vec<u8>> {
        let row_bytes = self.image.width() as usize * 3;
        if stride < row_bytes {
            return Err(CardcastError::encode(format!(
                "Row stride {stride} is shorter than a {row_bytes}-byte row"
            )));
        }
        let packed = self.image.into_raw();
        if stride == row_bytes || row_bytes == 0 {
            return Ok(packed);
        }

        let rows = packed.len() / row_bytes;
        let mut padded = vec![0u8; stride * rows];
        for (dst, src) in padded
            .chunks_exact_mut(stride)
            .zip(packed.chunks_exact(row_bytes))
        {
            dst[..row_bytes].copy_from_slice(src);
        }
        Ok(padded)
    }
}

/// Captures frames of a fixed size from a render surface.
#[derive(Debug, Clone)]
pub struct FrameSource {
    width: u32,
    height: u32,
    background: Rgb<u8>,
    schedule: FrameSchedule,
    debug_frame_counter: bool,
    captured: u64,
    /// Composite buffer reused across frames; frames receive a copy.
    canvas: Option<RgbImage>,
}

impl FrameSource {
    pub fn new(width: u32, height: u32, background: RgbColor, schedule: FrameSchedule) -> Self {
        Self {
            width,
            height,
            background: Rgb(background.channels()),
            schedule,
            debug_frame_counter: false,
            captured: 0,
            canvas: None,
        }
    }

    /// Burn a progress bar into the top-left corner of every frame.
    pub fn with_debug_frame_counter(mut self, enabled: bool) -> Self {
        self.debug_frame_counter = enabled;
        self
    }

    /// Frames captured so far.
    pub fn captured(&self) -> u64 {
        self.captured
    }

    /// Off-surface buffers currently held.
    pub fn live_buffers(&self) -> usize {
        usize::from(self.canvas.is_some())
    }

    /// Drop the composite buffer. The next capture allocates a fresh one.
    pub fn release(&mut self) {
        self.canvas = None;
    }

    /// Capture frame `index`: wait for the surface to settle, snapshot it,
    /// and flatten the snapshot onto the background.
    pub async fn capture(
        &mut self,
        surface: &mut dyn RenderSurface,
        index: u64,
    ) -> CardcastResult<Frame> {
        for _ in 0..PAINTS_PER_CAPTURE {
            surface.next_paint().await?;
        }
        let snapshot = surface.snapshot()?;
        if snapshot.width() == 0 || snapshot.height() == 0 {
            return Err(CardcastError::capture(format!(
                "{} returned an empty snapshot for frame {index}",
                surface.name()
            )));
        }

        let (width, height) = (self.width, self.height);
        let canvas = self
            .canvas
            .get_or_insert_with(|| RgbImage::new(width, height));
        composite_into(canvas, &snapshot, self.background);
        if self.debug_frame_counter {
            draw_frame_counter(canvas, index, self.schedule.total_frames());
        }

        self.captured += 1;
        Ok(Frame::new(
            canvas.clone(),
            index,
            self.schedule.timestamp_us(index),
            self.schedule.is_keyframe(index),
        ))
    }
}

/// Flatten a possibly translucent snapshot onto an opaque background,
/// scaling it to `width` x `height` first when the sizes differ.
pub fn composite(snapshot: &RgbaImage, width: u32, height: u32, background: Rgb<u8>) -> RgbImage {
    let mut canvas = RgbImage::new(width, height);
    composite_into(&mut canvas, snapshot, background);
    canvas
}

/// [`composite`] into an existing buffer, which fixes the output size.
pub fn composite_into(canvas: &mut RgbImage, snapshot: &RgbaImage, background: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    let scaled;
    let source = if snapshot.dimensions() == (width, height) {
        snapshot
    } else {
        tracing::trace!(
            from = ?snapshot.dimensions(),
            to = ?(width, height),
            "Scaling snapshot to export size"
        );
        scaled = imageops::resize(snapshot, width, height, FilterType::Triangle);
        &scaled
    };

    for (out, px) in canvas.pixels_mut().zip(source.pixels()) {
        let alpha = u16::from(px[3]);
        let blend = |fg: u8, bg: u8| -> u8 {
            ((u16::from(fg) * alpha + u16::from(bg) * (255 - alpha) + 127) / 255) as u8
        };
        *out = Rgb([
            blend(px[0], background[0]),
            blend(px[1], background[1]),
            blend(px[2], background[2]),
        ]);
    }
}

/// Draw a progress bar for frame `index` of `total` in the top-left corner.
///
/// The bar spans a quarter of the frame width and fills left to right, so
/// dropped or duplicated frames are visible when scrubbing the output.
pub fn draw_frame_counter(image: &mut RgbImage, index: u64, total: u64) {
    let track_w = (image.width() / 4).max(2);
    let track_h = (image.height() / 40).clamp(2, 12);
    if image.width() < track_w + 2 || image.height() < track_h + 2 {
        return;
    }

    draw_filled_rect_mut(
        image,
        Rect::at(1, 1).of_size(track_w, track_h),
        Rgb([0, 0, 0]),
    );
    let total = total.max(1);
    let filled = ((index + 1).min(total) * u64::from(track_w) / total) as u32;
    if filled > 0 {
        draw_filled_rect_mut(
            image,
            Rect::at(1, 1).of_size(filled, track_h),
            Rgb([0, 255, 64]),
        );
    }
}
