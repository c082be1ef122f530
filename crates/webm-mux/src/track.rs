//! Track and chunk data model shared by the encoder side and the muxer.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Compressed video codecs the muxer can label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    /// VP9 profile 0, 8-bit.
    Vp9,
    /// VP8, the legacy fallback every WebM player understands.
    Vp8,
}

impl VideoCodec {
    /// Matroska `CodecID` string.
    pub fn codec_id(&self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "V_VP9",
            VideoCodec::Vp8 => "V_VP8",
        }
    }

    /// Codec string used during encoder negotiation.
    pub fn codec_string(&self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "vp09.00.10.08",
            VideoCodec::Vp8 => "vp8",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::Vp9 => write!(f, "VP9"),
            VideoCodec::Vp8 => write!(f, "VP8"),
        }
    }
}

/// The single video track of an export. Fixed once the encoder is negotiated.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub width: u32,
    pub height: u32,
    /// Nominal frames per second.
    pub frame_rate: f64,
    pub codec: VideoCodec,
}

impl Track {
    /// Track number written into every block. There is only ever one track.
    pub const NUMBER: u8 = 1;

    pub fn new(width: u32, height: u32, frame_rate: f64, codec: VideoCodec) -> Self {
        Self {
            width,
            height,
            frame_rate,
            codec,
        }
    }

    /// Nominal duration of one frame, in whole microseconds.
    pub fn frame_interval_us(&self) -> u64 {
        if self.frame_rate > 0.0 {
            (1_000_000.0 / self.frame_rate).round() as u64
        } else {
            0
        }
    }
}

/// Whether a chunk decodes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Key,
    Delta,
}

/// One compressed frame as emitted by an encoder.
///
/// The payload is reference-counted so the encoder side and the muxer can
/// hold the same bytes; nothing mutates it after emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    data: Arc<[u8]>,
    timestamp_us: u64,
    chunk_type: ChunkType,
}

impl EncodedChunk {
    pub fn new(data: impl Into<Arc<[u8]>>, timestamp_us: u64, chunk_type: ChunkType) -> Self {
        Self {
            data: data.into(),
            timestamp_us,
            chunk_type,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Microseconds since capture start.
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.chunk_type
    }

    pub fn is_key(&self) -> bool {
        self.chunk_type == ChunkType::Key
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
