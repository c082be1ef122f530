//! A card pre-rendered to a directory of PNG frames.
//!
//! Frames are shown in file-name order and advance with wall-clock time at
//! the sequence's own frame rate, looping at the end, so the exported clip
//! samples the animation the same way a live display would.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::RgbaImage;

use cardcast_common::config::RgbColor;
use cardcast_common::error::{CardcastError, CardcastResult};

use super::{RenderSurface, SurfaceProvider};

/// Loader for an [`ImageSequenceSurface`].
#[derive(Debug, Clone)]
pub struct ImageSequence {
    pub dir: PathBuf,
    /// Rate at which the sequence was rendered.
    pub frame_rate: f64,
    pub background: Option<RgbColor>,
    pub paint_interval: Duration,
}

impl ImageSequence {
    pub fn new(dir: impl Into<PathBuf>, frame_rate: f64) -> Self {
        Self {
            dir: dir.into(),
            frame_rate,
            background: None,
            paint_interval: Duration::from_millis(16),
        }
    }

    pub fn with_background(mut self, background: RgbColor) -> Self {
        self.background = Some(background);
        self
    }
}

#[async_trait]
impl SurfaceProvider for ImageSequence {
    async fn load(&self) -> CardcastResult<Box<dyn RenderSurface>> {
        if self.frame_rate.is_nan() || self.frame_rate <= 0.0 {
            return Err(CardcastError::configuration(format!(
                "Sequence frame rate must be positive, got {}",
                self.frame_rate
            )));
        }
        let dir = self.dir.clone();
        let frames = tokio::task::spawn_blocking(move || load_frames(&dir))
            .await
            .map_err(|e| CardcastError::capture(format!("Frame loader task failed: {e}")))??;

        tracing::info!(
            dir = %self.dir.display(),
            frames = frames.len(),
            "Loaded image sequence"
        );
        Ok(Box::new(ImageSequenceSurface {
            name: format!("sequence:{}", self.dir.display()),
            frames: Some(Arc::from(frames)),
            frame_rate: self.frame_rate,
            background: self.background,
            paint_interval: self.paint_interval,
            started: Instant::now(),
        }))
    }
}

fn load_frames(dir: &Path) -> CardcastResult<Vec<RgbaImage>> {
    if !dir.is_dir() {
        return Err(CardcastError::capture(format!(
            "Frame directory not found: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(CardcastError::capture(format!(
            "No PNG frames in {}",
            dir.display()
        )));
    }

    let mut frames: Vec<RgbaImage> = Vec::with_capacity(paths.len());
    for path in &paths {
        let frame = image::open(path)
            .map_err(|e| {
                CardcastError::capture(format!("Failed to decode {}: {e}", path.display()))
            })?
            .to_rgba8();
        if let Some(first) = frames.first() {
            if first.dimensions() != frame.dimensions() {
                return Err(CardcastError::capture(format!(
                    "{} is {}x{}, expected {}x{}",
                    path.display(),
                    frame.width(),
                    frame.height(),
                    first.width(),
                    first.height()
                )));
            }
        }
        frames.push(frame);
    }
    Ok(frames)
}

/// Surface backed by decoded PNG frames.
pub struct ImageSequenceSurface {
    name: String,
    /// `None` once released.
    frames: Option<Arc<[RgbaImage]>>,
    frame_rate: f64,
    background: Option<RgbColor>,
    paint_interval: Duration,
    started: Instant,
}

impl ImageSequenceSurface {
    fn frames(&self) -> CardcastResult<&Arc<[RgbaImage]>> {
        self.frames
            .as_ref()
            .ok_or_else(|| CardcastError::capture("Surface already released"))
    }

    /// Frame shown `elapsed` after the surface was loaded.
    fn frame_index(&self, elapsed: Duration, len: usize) -> usize {
        (elapsed.as_secs_f64() * self.frame_rate) as usize % len
    }
}

#[async_trait]
impl RenderSurface for ImageSequenceSurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn bounds(&self) -> Option<(u32, u32)> {
        self.frames
            .as_ref()
            .and_then(|frames| frames.first())
            .map(|frame| frame.dimensions())
    }

    fn background(&self) -> Option<RgbColor> {
        self.background
    }

    async fn next_paint(&mut self) -> CardcastResult<()> {
        self.frames()?;
        tokio::time::sleep(self.paint_interval).await;
        Ok(())
    }

    fn snapshot(&mut self) -> CardcastResult<RgbaImage> {
        let frames = self.frames()?;
        let index = self.frame_index(self.started.elapsed(), frames.len());
        Ok(frames[index].clone())
    }

    fn release(&mut self) {
        self.frames = None;
    }
}
