//! Export session management.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use cardcast_common::clock::{ExportClock, FrameLag, FrameSchedule};
use cardcast_common::config::{validate_export_params, ExportDefaults, RgbColor};
use cardcast_common::error::{CardcastError, CardcastResult};
use cardcast_webm::{MuxError, Track, VideoCodec, WebmMuxer, DEFAULT_APP_NAME, MIME_TYPE};

use crate::encoder::{EncoderAdapter, EncoderBackend};
use crate::frame::FrameSource;
use crate::gif::{GifWriter, GIF_MIME_TYPE};
use crate::surface::{RenderSurface, SurfaceProvider};

/// Configuration for one export.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Frames per second.
    pub fps: u32,

    /// Clip length in milliseconds.
    pub duration_ms: u64,

    /// Target bitrate in bits per second.
    pub bitrate: u32,

    /// Overrides the surface's own background when set.
    pub background: Option<RgbColor>,

    /// Burn a frame progress marker into each frame.
    pub debug_frame_counter: bool,

    /// Written to the container's MuxingApp and WritingApp fields.
    pub app_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self::from(&ExportDefaults::default())
    }
}

impl From<&ExportDefaults> for ExportConfig {
    fn from(defaults: &ExportDefaults) -> Self {
        Self {
            fps: defaults.fps,
            duration_ms: defaults.duration_ms,
            bitrate: defaults.bitrate,
            background: Some(defaults.background),
            debug_frame_counter: defaults.debug_frame_counter,
            app_name: DEFAULT_APP_NAME.to_string(),
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> CardcastResult<()> {
        validate_export_params(self.fps, self.duration_ms, self.bitrate)
    }
}

/// File format an export produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// VP9 or VP8 video in a WebM container.
    #[default]
    Webm,
    /// Looping animated GIF.
    Gif,
}

impl ExportFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Webm => MIME_TYPE,
            ExportFormat::Gif => GIF_MIME_TYPE,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Webm => "webm",
            ExportFormat::Gif => "gif",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = CardcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webm" => Ok(ExportFormat::Webm),
            "gif" => Ok(ExportFormat::Gif),
            other => Err(CardcastError::configuration(format!(
                "Unknown export format '{other}' (expected webm or gif)"
            ))),
        }
    }
}

/// State of an export session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    /// Session created but not started.
    Idle,
    /// Loading the surface and negotiating the encoder.
    Configuring,
    /// Capturing and encoding frames.
    Capturing,
    /// Waiting for the video encoder to emit its last chunks.
    Draining,
    /// Serializing the container or writing out the GIF.
    Finalizing,
    /// Artifact produced.
    Done,
    /// An error occurred; no artifact was produced.
    Failed,
}

/// A progress update delivered to the [`ProgressSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportProgress {
    pub stage: ExportState,
    pub frames_captured: u64,
    pub total_frames: u64,
    pub message: String,
}

impl ExportProgress {
    /// Fraction of frames captured, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        self.frames_captured as f64 / self.total_frames as f64
    }
}

/// Callback receiving progress updates.
pub type ProgressSink = Box<dyn Fn(&ExportProgress) + Send + Sync>;

/// A finished export.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub format: ExportFormat,
    pub mime_type: &'static str,
    /// Negotiated video codec; `None` for GIF.
    pub codec: Option<VideoCodec>,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub duration: Duration,
}

impl ExportArtifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write the container to `path`.
    pub fn write_to(&self, path: &Path) -> CardcastResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.bytes)?;
        tracing::info!(path = %path.display(), bytes = self.bytes.len(), "Export written");
        Ok(())
    }
}

/// Where captured frames go.
enum Output {
    Webm { codec: VideoCodec, muxer: WebmMuxer },
    Gif(GifWriter),
}

/// Owns the whole export lifecycle: surface, encoder, and output.
pub struct ExportSession {
    config: ExportConfig,
    format: ExportFormat,
    state: ExportState,
    provider: Box<dyn SurfaceProvider>,
    /// Present for WebM exports only.
    encoder: Option<EncoderAdapter>,
    progress: Option<ProgressSink>,
    stop_flag: Arc<AtomicBool>,
    frames_captured: u64,
    total_frames: u64,
    live_buffers: usize,
}

impl ExportSession {
    /// Create a WebM session that captures from the surface `provider` loads
    /// and encodes with `backend`.
    pub fn new(
        config: ExportConfig,
        provider: Box<dyn SurfaceProvider>,
        backend: Box<dyn EncoderBackend>,
    ) -> Self {
        Self::build(
            config,
            ExportFormat::Webm,
            provider,
            Some(EncoderAdapter::new(backend)),
        )
    }

    /// Create a session that writes the captured frames as an animated GIF.
    pub fn gif(config: ExportConfig, provider: Box<dyn SurfaceProvider>) -> Self {
        Self::build(config, ExportFormat::Gif, provider, None)
    }

    fn build(
        config: ExportConfig,
        format: ExportFormat,
        provider: Box<dyn SurfaceProvider>,
        encoder: Option<EncoderAdapter>,
    ) -> Self {
        Self {
            config,
            format,
            state: ExportState::Idle,
            provider,
            encoder,
            progress: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            frames_captured: 0,
            total_frames: 0,
            live_buffers: 0,
        }
    }

    /// Receive progress updates. A panicking sink is logged and ignored.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Current session state.
    pub fn state(&self) -> ExportState {
        self.state
    }

    /// Set to `true` to cancel the export before the next frame.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    /// Off-surface capture buffers still held. Zero once `run` returns.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers
    }

    /// Whether the video encoder has been closed. Always true for GIF.
    pub fn encoder_closed(&self) -> bool {
        self.encoder.as_ref().map_or(true, EncoderAdapter::is_closed)
    }

    fn encoder_mut(&mut self) -> CardcastResult<&mut EncoderAdapter> {
        self.encoder
            .as_mut()
            .ok_or_else(|| CardcastError::encode("Session has no video encoder"))
    }

    /// Run the export to completion.
    ///
    /// Whatever the outcome, the encoder is closed and the surface released
    /// before this returns. A session runs once.
    pub async fn run(&mut self) -> CardcastResult<ExportArtifact> {
        if self.state != ExportState::Idle {
            return Err(CardcastError::configuration("Export session already used"));
        }

        tracing::info!(
            format = %self.format,
            fps = self.config.fps,
            duration_ms = self.config.duration_ms,
            bitrate = self.config.bitrate,
            "Starting export session"
        );

        let mut surface: Option<Box<dyn RenderSurface>> = None;
        let mut frames: Option<FrameSource> = None;
        let result = self.export(&mut surface, &mut frames).await;

        // Cleanup runs on every path.
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.close();
        }
        if let Some(mut frames) = frames.take() {
            frames.release();
        }
        self.live_buffers = 0;
        if let Some(mut surface) = surface.take() {
            tracing::debug!(surface = surface.name(), "Releasing render surface");
            surface.release();
        }

        match result {
            Ok(artifact) => {
                self.state = ExportState::Done;
                tracing::info!(
                    format = %artifact.format,
                    codec = ?artifact.codec,
                    frames = artifact.frame_count,
                    bytes = artifact.bytes.len(),
                    "Export session finished"
                );
                Ok(artifact)
            }
            Err(e) => {
                let failed_in = self.state;
                self.state = ExportState::Failed;
                tracing::error!(
                    error = %e,
                    kind = e.kind(),
                    stage = ?failed_in,
                    frames_captured = self.frames_captured,
                    "Export failed"
                );
                self.report(e.to_string());
                Err(e)
            }
        }
    }

    async fn export(
        &mut self,
        surface_slot: &mut Option<Box<dyn RenderSurface>>,
        frames_slot: &mut Option<FrameSource>,
    ) -> CardcastResult<ExportArtifact> {
        self.state = ExportState::Configuring;
        self.config.validate()?;

        let surface = surface_slot.insert(self.provider.load().await?);
        let (width, height) = surface.bounds().ok_or_else(|| {
            CardcastError::capture(format!("{} has no card region", surface.name()))
        })?;
        if width == 0 || height == 0 {
            return Err(CardcastError::configuration(format!(
                "Card region of {} is {width}x{height}",
                surface.name()
            )));
        }
        let background = self
            .config
            .background
            .or_else(|| surface.background())
            .unwrap_or(RgbColor::WHITE);

        let schedule = FrameSchedule::new(self.config.fps, self.config.duration_ms);
        self.total_frames = schedule.total_frames();
        let (fps, bitrate) = (self.config.fps, self.config.bitrate);
        let mut output = match self.format {
            ExportFormat::Webm => {
                let codec = self
                    .encoder_mut()?
                    .configure(width, height, fps, bitrate)
                    .await?;
                let track = Track::new(width, height, f64::from(fps), codec);
                Output::Webm {
                    codec,
                    muxer: WebmMuxer::with_app_name(track, self.config.app_name.clone()),
                }
            }
            ExportFormat::Gif => Output::Gif(GifWriter::new(width, height, fps)),
        };
        let frames = frames_slot.insert(
            FrameSource::new(width, height, background, schedule)
                .with_debug_frame_counter(self.config.debug_frame_counter),
        );

        tracing::info!(
            surface = surface.name(),
            width,
            height,
            format = %self.format,
            %background,
            total_frames = self.total_frames,
            "Export configured"
        );

        self.state = ExportState::Capturing;
        let clock = ExportClock::start();
        let start = tokio::time::Instant::from_std(clock.epoch());
        tracing::debug!(started_at = clock.epoch_wall(), "Capture started");
        let verb = match self.format {
            ExportFormat::Webm => "Encoding",
            ExportFormat::Gif => "Rendering",
        };
        for index in 0..self.total_frames {
            if self.stop_flag.load(Ordering::SeqCst) {
                tracing::info!(frames_captured = self.frames_captured, "Export cancelled");
                return Err(CardcastError::Cancelled {
                    frames_captured: self.frames_captured,
                });
            }

            tokio::time::sleep_until(start + schedule.deadline(index)).await;
            let frame = frames.capture(surface.as_mut(), index).await?;
            self.live_buffers = frames.live_buffers();

            let lag = FrameLag {
                scheduled_us: schedule.timestamp_us(index),
                actual_us: clock.elapsed_us(),
            };
            if lag.exceeds(schedule.interval()) {
                tracing::warn!(index, lag_ms = lag.lag_ms(), "Frame captured behind schedule");
            }

            let key_frame = frame.key_frame();
            match &mut output {
                Output::Webm { muxer, .. } => {
                    let encoder = self.encoder_mut()?;
                    encoder.encode(frame, key_frame)?;
                    for chunk in encoder.drain_ready() {
                        muxer.add_chunk(&chunk).map_err(mux_error)?;
                    }
                }
                Output::Gif(gif) => gif.push(frame)?,
            }
            self.frames_captured += 1;
            tracing::debug!(index, key_frame, "Frame submitted");
            self.report(format!("{verb} frame {}/{}", index + 1, self.total_frames));
        }
        tracing::debug!(
            frames = self.frames_captured,
            elapsed_s = clock.elapsed_secs(),
            "Capture finished"
        );

        let (bytes, codec, duration) = match output {
            Output::Webm { codec, mut muxer } => {
                self.state = ExportState::Draining;
                let remaining = self.encoder_mut()?.flush().await?;
                for chunk in remaining {
                    muxer.add_chunk(&chunk).map_err(mux_error)?;
                }
                if muxer.block_count() as u64 != self.frames_captured {
                    tracing::warn!(
                        frames = self.frames_captured,
                        blocks = muxer.block_count(),
                        "Encoder output does not match frame count"
                    );
                }
                tracing::debug!(
                    blocks = muxer.block_count(),
                    payload_bytes = muxer.payload_bytes(),
                    "Encoder drained"
                );

                self.state = ExportState::Finalizing;
                self.report("Muxing".to_string());
                let duration = Duration::from_secs_f64(muxer.duration_secs());
                (muxer.finalize().map_err(mux_error)?, Some(codec), duration)
            }
            Output::Gif(gif) => {
                self.state = ExportState::Finalizing;
                self.report("Encoding GIF".to_string());
                let duration = gif.duration();
                (gif.finish().await?, None, duration)
            }
        };

        let artifact = ExportArtifact {
            bytes,
            format: self.format,
            mime_type: self.format.mime_type(),
            codec,
            width,
            height,
            frame_count: self.frames_captured,
            duration,
        };
        self.state = ExportState::Done;
        self.report("Done".to_string());
        Ok(artifact)
    }

    fn report(&self, message: String) {
        let Some(sink) = self.progress.as_ref() else {
            return;
        };
        let progress = ExportProgress {
            stage: self.state,
            frames_captured: self.frames_captured,
            total_frames: self.total_frames,
            message,
        };
        if catch_unwind(AssertUnwindSafe(|| sink(&progress))).is_err() {
            tracing::warn!(stage = ?progress.stage, "Progress sink panicked; ignoring");
        }
    }
}

fn mux_error(e: MuxError) -> CardcastError {
    CardcastError::mux(e.to_string())
}
