//! Cardcast WebM Muxer
//!
//! Builds a WebM container from already-encoded VP8/VP9 chunks, entirely
//! in memory.
//!
//! # Layout
//!
//! ```text
//! EBML header (doc type "webm")
//! Segment
//! ├── SeekHead   (empty)
//! ├── Info       timecode scale 1ms, app name, duration
//! ├── Tracks
//! │   └── TrackEntry #1  video, V_VP9 | V_VP8, width x height
//! └── Cluster
//!     ├── Timecode  ms since first chunk
//!     ├── SimpleBlock
//!     ├── Timecode
//!     ├── SimpleBlock
//!     └── ...
//! ```
//!
//! The muxer writes one cluster and no cues. That is enough for playback or
//! download right after export but not for seeking in long recordings.
//!
//! # Example
//!
//! ```
//! use cardcast_webm::{ChunkType, EncodedChunk, Track, VideoCodec, WebmMuxer};
//!
//! let mut muxer = WebmMuxer::new(Track::new(300, 500, 10.0, VideoCodec::Vp8));
//! muxer.add_chunk(&EncodedChunk::new(vec![0u8; 32], 0, ChunkType::Key))?;
//! muxer.add_chunk(&EncodedChunk::new(vec![0u8; 8], 100_000, ChunkType::Delta))?;
//! let bytes = muxer.finalize()?;
//! assert_eq!(&bytes[..4], &[0x1a, 0x45, 0xdf, 0xa3]);
//! # Ok::<(), cardcast_webm::MuxError>(())
//! ```

pub mod ebml;
pub mod error;
pub mod inspect;
pub mod muxer;
pub mod track;

pub use error::{MuxError, MuxResult};
pub use inspect::{inspect, BlockSummary, ContainerSummary};
pub use muxer::{WebmMuxer, DEFAULT_APP_NAME, MAX_CLUSTER_SPAN_MS, MIME_TYPE};
pub use track::{ChunkType, EncodedChunk, Track, VideoCodec};
