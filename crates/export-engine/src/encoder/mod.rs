//! Video encoding: codec negotiation and the backend seam.
//!
//! An [`EncoderBackend`] wraps a concrete VP8/VP9 encoder. Backends emit
//! chunks asynchronously through a channel handed to them at configure
//! time; the [`EncoderAdapter`] owns the receiving end and the negotiated
//! configuration, and guarantees the backend is closed exactly once.

use async_trait::async_trait;
use tokio::sync::mpsc;

use cardcast_common::error::{CardcastError, CardcastResult};
use cardcast_webm::{EncodedChunk, VideoCodec};

use crate::frame::Frame;

#[cfg(feature = "gstreamer")]
pub mod gst;

#[cfg(feature = "gstreamer")]
pub use gst::GstEncoderBackend;

/// Codecs tried during negotiation, most preferred first.
pub const CODEC_PREFERENCE: [VideoCodec; 2] = [VideoCodec::Vp9, VideoCodec::Vp8];

/// Sending half of the chunk channel, held by the backend.
pub type ChunkSender = mpsc::UnboundedSender<EncodedChunk>;
/// Receiving half of the chunk channel, held by the adapter.
pub type ChunkReceiver = mpsc::UnboundedReceiver<EncodedChunk>;

/// Encoder parameters for one export.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
}

impl EncoderConfig {
    /// Codec string as used in capability queries, e.g. `vp09.00.10.08`.
    pub fn codec_string(&self) -> &'static str {
        self.codec.codec_string()
    }
}

/// A concrete video encoder.
///
/// Implementations may emit chunks from any thread at any time between
/// `configure` and the end of `flush`. Errors that surface on a background
/// thread are reported from the next `encode` or from `flush`.
#[async_trait]
pub trait EncoderBackend: Send {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Whether this backend can encode with `config`. Must not start encoding.
    async fn is_config_supported(&self, config: &EncoderConfig) -> bool;

    /// Start an encoder for `config`, sending every output chunk to `output`.
    fn configure(&mut self, config: &EncoderConfig, output: ChunkSender) -> CardcastResult<()>;

    /// Submit one frame. `key_frame` forces an independently decodable chunk.
    fn encode(&mut self, frame: Frame, key_frame: bool) -> CardcastResult<()>;

    /// Resolve once every chunk for the frames submitted so far has been sent.
    async fn flush(&mut self) -> CardcastResult<()>;

    /// Tear the encoder down. Must tolerate being called without `configure`.
    fn close(&mut self);
}

/// Negotiates a codec with a backend and drives it for one export.
pub struct EncoderAdapter {
    backend: Box<dyn EncoderBackend>,
    config: Option<EncoderConfig>,
    chunks: Option<ChunkReceiver>,
    frames_submitted: u64,
    chunks_received: u64,
    closed: bool,
}

impl EncoderAdapter {
    pub fn new(backend: Box<dyn EncoderBackend>) -> Self {
        Self {
            backend,
            config: None,
            chunks: None,
            frames_submitted: 0,
            chunks_received: 0,
            closed: false,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// The negotiated configuration, once `configure` has succeeded.
    pub fn config(&self) -> Option<&EncoderConfig> {
        self.config.as_ref()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn chunks_received(&self) -> u64 {
        self.chunks_received
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Configure the backend with the first supported codec in
    /// [`CODEC_PREFERENCE`] and return it.
    pub async fn configure(
        &mut self,
        width: u32,
        height: u32,
        frame_rate: u32,
        bitrate: u32,
    ) -> CardcastResult<VideoCodec> {
        if self.closed {
            return Err(CardcastError::configuration("Encoder already closed"));
        }
        if self.config.is_some() {
            return Err(CardcastError::configuration("Encoder already configured"));
        }

        for codec in CODEC_PREFERENCE {
            let candidate = EncoderConfig {
                codec,
                width,
                height,
                frame_rate,
                bitrate,
            };
            if !self.backend.is_config_supported(&candidate).await {
                tracing::info!(
                    backend = self.backend.name(),
                    codec = candidate.codec_string(),
                    "Codec not supported, trying next"
                );
                continue;
            }

            let (tx, rx) = mpsc::unbounded_channel();
            self.backend.configure(&candidate, tx)?;
            tracing::info!(
                backend = self.backend.name(),
                codec = candidate.codec_string(),
                width,
                height,
                frame_rate,
                bitrate,
                "Encoder configured"
            );
            self.chunks = Some(rx);
            self.config = Some(candidate);
            return Ok(codec);
        }

        Err(CardcastError::configuration(format!(
            "No supported codec for {width}x{height} @ {frame_rate}fps (tried {})",
            CODEC_PREFERENCE
                .iter()
                .map(|c| c.codec_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Submit a frame for encoding.
    pub fn encode(&mut self, frame: Frame, key_frame: bool) -> CardcastResult<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| CardcastError::encode("Encoder used before configure"))?;
        if self.closed {
            return Err(CardcastError::encode("Encoder already closed"));
        }
        if (frame.width(), frame.height()) != (config.width, config.height) {
            return Err(CardcastError::encode(format!(
                "Frame {} is {}x{}, encoder expects {}x{}",
                frame.index(),
                frame.width(),
                frame.height(),
                config.width,
                config.height
            )));
        }
        self.backend.encode(frame, key_frame)?;
        self.frames_submitted += 1;
        Ok(())
    }

    /// Chunks emitted since the last call, in emission order.
    pub fn drain_ready(&mut self) -> Vec<EncodedChunk> {
        let mut ready = Vec::new();
        if let Some(rx) = self.chunks.as_mut() {
            while let Ok(chunk) = rx.try_recv() {
                ready.push(chunk);
            }
        }
        self.chunks_received += ready.len() as u64;
        ready
    }

    /// Wait for every outstanding chunk, then return all chunks not yet drained.
    pub async fn flush(&mut self) -> CardcastResult<Vec<EncodedChunk>> {
        if self.config.is_none() {
            return Err(CardcastError::encode("Encoder flushed before configure"));
        }
        if self.closed {
            return Err(CardcastError::encode("Encoder already closed"));
        }
        self.backend.flush().await?;
        let remaining = self.drain_ready();
        tracing::debug!(
            frames = self.frames_submitted,
            chunks = self.chunks_received,
            "Encoder flushed"
        );
        Ok(remaining)
    }

    /// Close the backend. Safe to call any number of times; only the first
    /// call reaches the backend.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.backend.close();
        self.chunks = None;
        tracing::debug!(backend = self.backend.name(), "Encoder closed");
    }
}

impl Drop for EncoderAdapter {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(
                backend = self.backend.name(),
                "Encoder dropped without close, closing now"
            );
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use cardcast_webm::ChunkType;
    use image::RgbImage;

    /// Echoes one chunk per frame; accepts only the listed codecs.
    struct EchoBackend {
        supported: Vec<VideoCodec>,
        output: Option<ChunkSender>,
        closes: Arc<AtomicUsize>,
        deferred: Vec<EncodedChunk>,
    }

    impl EchoBackend {
        fn new(supported: Vec<VideoCodec>) -> (Self, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    supported,
                    output: None,
                    closes: closes.clone(),
                    deferred: Vec::new(),
                },
                closes,
            )
        }
    }

    #[async_trait]
    impl EncoderBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn is_config_supported(&self, config: &EncoderConfig) -> bool {
            self.supported.contains(&config.codec)
        }

        fn configure(
            &mut self,
            _config: &EncoderConfig,
            output: ChunkSender,
        ) -> CardcastResult<()> {
            self.output = Some(output);
            Ok(())
        }

        fn encode(&mut self, frame: Frame, key_frame: bool) -> CardcastResult<()> {
            let chunk_type = if key_frame { ChunkType::Key } else { ChunkType::Delta };
            // Hold odd frames back until flush, like a lookahead encoder.
            let chunk =
                EncodedChunk::new(vec![frame.index() as u8], frame.timestamp_us(), chunk_type);
            if frame.index() % 2 == 1 {
                self.deferred.push(chunk);
                return Ok(());
            }
            if let Some(out) = &self.output {
                let _ = out.send(chunk);
            }
            Ok(())
        }

        async fn flush(&mut self) -> CardcastResult<()> {
            if let Some(out) = &self.output {
                for chunk in self.deferred.drain(..) {
                    let _ = out.send(chunk);
                }
            }
            Ok(())
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.output = None;
        }
    }

    fn frame(index: u64) -> Frame {
        Frame::new(RgbImage::new(8, 8), index, index * 100_000, index == 0)
    }

    #[tokio::test]
    async fn test_prefers_vp9() {
        let (backend, _) = EchoBackend::new(vec![VideoCodec::Vp8, VideoCodec::Vp9]);
        let mut adapter = EncoderAdapter::new(Box::new(backend));
        assert_eq!(adapter.configure(8, 8, 10, 1_000_000).await.unwrap(), VideoCodec::Vp9);
        assert_eq!(adapter.config().unwrap().codec_string(), "vp09.00.10.08");
        adapter.close();
    }

    #[tokio::test]
    async fn test_falls_back_to_vp8() {
        let (backend, _) = EchoBackend::new(vec![VideoCodec::Vp8]);
        let mut adapter = EncoderAdapter::new(Box::new(backend));
        assert_eq!(adapter.configure(8, 8, 10, 1_000_000).await.unwrap(), VideoCodec::Vp8);
        adapter.close();
    }

    #[tokio::test]
    async fn test_no_supported_codec_is_configuration_error() {
        let (backend, closes) = EchoBackend::new(vec![]);
        let mut adapter = EncoderAdapter::new(Box::new(backend));
        let err = adapter.configure(8, 8, 10, 1_000_000).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(adapter.config().is_none());
        adapter.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flush_returns_deferred_chunks_in_order() {
        let (backend, _) = EchoBackend::new(vec![VideoCodec::Vp9]);
        let mut adapter = EncoderAdapter::new(Box::new(backend));
        adapter.configure(8, 8, 10, 1_000_000).await.unwrap();

        for i in 0..4 {
            adapter.encode(frame(i), i == 0).unwrap();
        }
        let early: Vec<u8> = adapter.drain_ready().iter().map(|c| c.data()[0]).collect();
        assert_eq!(early, vec![0, 2]);

        let late: Vec<u8> = adapter.flush().await.unwrap().iter().map(|c| c.data()[0]).collect();
        assert_eq!(late, vec![1, 3]);
        assert_eq!(adapter.frames_submitted(), 4);
        assert_eq!(adapter.chunks_received(), 4);
        adapter.close();
    }

    #[tokio::test]
    async fn test_rejects_misuse() {
        let (backend, _) = EchoBackend::new(vec![VideoCodec::Vp9]);
        let mut adapter = EncoderAdapter::new(Box::new(backend));
        assert!(adapter.encode(frame(0), true).is_err());
        assert!(adapter.flush().await.is_err());

        adapter.configure(8, 8, 10, 1_000_000).await.unwrap();
        assert!(adapter.configure(8, 8, 10, 1_000_000).await.is_err());
        let wrong_size = Frame::new(RgbImage::new(4, 4), 0, 0, true);
        assert!(adapter.encode(wrong_size, true).is_err());
        adapter.close();
        assert!(adapter.encode(frame(0), true).is_err());
    }

    #[tokio::test]
    async fn test_close_reaches_backend_once() {
        let (backend, closes) = EchoBackend::new(vec![VideoCodec::Vp9]);
        let mut adapter = EncoderAdapter::new(Box::new(backend));
        adapter.configure(8, 8, 10, 1_000_000).await.unwrap();
        adapter.close();
        adapter.close();
        assert!(adapter.is_closed());
        drop(adapter);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_closes_unclosed_encoder() {
        let (backend, closes) = EchoBackend::new(vec![VideoCodec::Vp9]);
        let mut adapter = EncoderAdapter::new(Box::new(backend));
        adapter.configure(8, 8, 10, 1_000_000).await.unwrap();
        drop(adapter);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
