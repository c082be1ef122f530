//! Cardcast Export Engine
//!
//! Turns a rendered card animation into a WebM clip or an animated GIF. An
//! export session captures frames from a render surface on a fixed schedule.
//! For WebM it encodes them with the first codec the encoder backend accepts
//! (VP9, then VP8) and muxes the chunks into an in-memory container; for GIF
//! it quantizes them into a looping animation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  ExportSession                   │
//! │                                                  │
//! │  SurfaceProvider ──load──▶ RenderSurface         │
//! │                               │ paint, snapshot  │
//! │                               ▼                  │
//! │                          FrameSource             │
//! │                               │ Frame (RGB)      │
//! │                               ▼                  │
//! │              ┌────────────────┴───────┐          │
//! │              ▼                        ▼          │
//! │       EncoderAdapter              GifWriter      │
//! │  (EncoderBackend: VP9|VP8)                       │
//! │              │ EncodedChunk                      │
//! │              ▼                                   │
//! │          WebmMuxer                               │
//! └──────────────────────────────┬───────────────────┘
//!                                ▼
//!              ExportArtifact (video/webm | image/gif)
//! ```

pub mod encoder;
pub mod frame;
pub mod gif;
pub mod session;
pub mod surface;

pub use encoder::{EncoderAdapter, EncoderBackend, EncoderConfig, CODEC_PREFERENCE};
pub use frame::{Frame, FrameSource};
pub use gif::GifWriter;
pub use session::*;
pub use surface::{RenderSurface, SurfaceProvider};
