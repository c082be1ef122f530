//! Render surfaces: where captured frames come from.
//!
//! A [`RenderSurface`] is a handle to something that paints the card
//! animation (a procedural renderer, a directory of pre-rendered frames).
//! Export sessions never construct surfaces themselves; they receive a
//! [`SurfaceProvider`] and ask it for one once configuration begins, so
//! loading can be slow and fallible without blocking the caller.

use async_trait::async_trait;
use image::RgbaImage;

use cardcast_common::config::RgbColor;
use cardcast_common::error::CardcastResult;

pub mod sequence;
pub mod synthetic;

pub use sequence::{ImageSequence, ImageSequenceSurface};
pub use synthetic::{SyntheticCard, SyntheticCardSurface};

/// A live, paintable card region that frames can be read back from.
#[async_trait]
pub trait RenderSurface: Send {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Pixel size of the card region, or `None` if the region cannot be located.
    fn bounds(&self) -> Option<(u32, u32)>;

    /// Background color the card is drawn over, if the surface defines one.
    fn background(&self) -> Option<RgbColor>;

    /// Resolve once the surface has presented its next painted frame.
    async fn next_paint(&mut self) -> CardcastResult<()>;

    /// Read back the current contents of the card region.
    ///
    /// Pixels may be translucent; compositing onto an opaque background is
    /// the caller's job.
    fn snapshot(&mut self) -> CardcastResult<RgbaImage>;

    /// Release everything the surface holds. Called exactly once by the
    /// session, on success and on failure.
    fn release(&mut self);
}

/// Asynchronous loader for a [`RenderSurface`].
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn load(&self) -> CardcastResult<Box<dyn RenderSurface>>;
}
