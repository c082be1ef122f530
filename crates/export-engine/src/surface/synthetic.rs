//! Procedurally drawn card, used for smoke exports and tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;

use cardcast_common::config::RgbColor;
use cardcast_common::error::{CardcastError, CardcastResult};

use super::{RenderSurface, SurfaceProvider};

/// Parameters for a [`SyntheticCardSurface`].
#[derive(Debug, Clone)]
pub struct SyntheticCard {
    pub width: u32,
    pub height: u32,
    pub background: RgbColor,
    /// Time between paints, standing in for the display refresh.
    pub paint_interval: Duration,
}

impl SyntheticCard {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: RgbColor::WHITE,
            paint_interval: Duration::from_millis(4),
        }
    }

    pub fn with_background(mut self, background: RgbColor) -> Self {
        self.background = background;
        self
    }

    pub fn with_paint_interval(mut self, interval: Duration) -> Self {
        self.paint_interval = interval;
        self
    }
}

#[async_trait]
impl SurfaceProvider for SyntheticCard {
    async fn load(&self) -> CardcastResult<Box<dyn RenderSurface>> {
        Ok(Box::new(SyntheticCardSurface::new(self.clone())))
    }
}

/// An animated card: a gradient panel inside a transparent margin, a
/// translucent ribbon, and a dot that travels along the ribbon.
pub struct SyntheticCardSurface {
    card: SyntheticCard,
    started: Instant,
    paints: u64,
    released: bool,
}

impl SyntheticCardSurface {
    pub fn new(card: SyntheticCard) -> Self {
        Self {
            card,
            started: Instant::now(),
            paints: 0,
            released: false,
        }
    }

    /// Paints presented so far.
    pub fn paints(&self) -> u64 {
        self.paints
    }

    /// Draw the card as it looks `t` seconds into the animation.
    pub fn render(&self, t: f64) -> RgbaImage {
        let (width, height) = (self.card.width, self.card.height);
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));

        let margin_x = width / 12;
        let margin_y = height / 12;
        let panel_w = width.saturating_sub(2 * margin_x).max(1);
        let panel_h = height.saturating_sub(2 * margin_y).max(1);
        let shift = ((t * 40.0) as u32 % 64) as u8;
        for y in 0..panel_h {
            let shade = (y * 160 / panel_h) as u8;
            for x in 0..panel_w {
                let px = margin_x + x;
                let py = margin_y + y;
                if px < width && py < height {
                    canvas.put_pixel(
                        px,
                        py,
                        Rgba([200u8.wrapping_sub(shade / 2), 60 + shift, 90 + shade / 2, 255]),
                    );
                }
            }
        }

        let ribbon_h = (height / 8).max(1);
        let ribbon_y = (height / 2).saturating_sub(ribbon_h / 2) as i32;
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(0, ribbon_y).of_size(width, ribbon_h),
            Rgba([250, 220, 120, 140]),
        );

        let phase = (t * 0.5).fract();
        let cx = (phase * width as f64) as i32;
        let radius = (ribbon_h as i32 / 2).max(1);
        draw_filled_circle_mut(
            &mut canvas,
            (cx, ribbon_y + radius),
            radius,
            Rgba([255, 255, 255, 220]),
        );
        canvas
    }
}

#[async_trait]
impl RenderSurface for SyntheticCardSurface {
    fn name(&self) -> &str {
        "synthetic-card"
    }

    fn bounds(&self) -> Option<(u32, u32)> {
        Some((self.card.width, self.card.height))
    }

    fn background(&self) -> Option<RgbColor> {
        Some(self.card.background)
    }

    async fn next_paint(&mut self) -> CardcastResult<()> {
        if self.released {
            return Err(CardcastError::capture("Surface already released"));
        }
        tokio::time::sleep(self.card.paint_interval).await;
        self.paints += 1;
        Ok(())
    }

    fn snapshot(&mut self) -> CardcastResult<RgbaImage> {
        if self.released {
            return Err(CardcastError::capture("Surface already released"));
        }
        Ok(self.render(self.started.elapsed().as_secs_f64()))
    }

    fn release(&mut self) {
        if !self.released {
            tracing::debug!(paints = self.paints, "Releasing synthetic card surface");
        }
        self.released = true;
    }
}
