//! One-pass WebM writer.
//!
//! Chunks are accumulated as serialized blocks and the whole document is
//! built by a single call to [`WebmMuxer::finalize`]. The output holds one
//! cluster and an empty seek index, which is enough for immediate playback
//! or download but not for seeking in long clips.
//!
//! Each block carries a zero relative timecode inside the block itself; the
//! real offset from the first chunk is written as a `Timecode` element just
//! before the block. Lenient players accept this layout. Strict conformance
//! checkers may not.

use crate::ebml::{self, ids};
use crate::error::{MuxError, MuxResult};
use crate::track::{EncodedChunk, Track};

/// Default `MuxingApp` / `WritingApp` string.
pub const DEFAULT_APP_NAME: &str = "cardcast-webm";

/// Timecode scale in nanoseconds: block timecodes are whole milliseconds.
pub const TIMECODE_SCALE_NS: u64 = 1_000_000;

/// Largest cluster-relative offset, in milliseconds, that a single cluster may hold.
pub const MAX_CLUSTER_SPAN_MS: u64 = i16::MAX as u64;

/// Media type of the finished buffer.
pub const MIME_TYPE: &str = "video/webm";

const BLOCK_KEYFRAME_FLAG: u8 = 0x80;

/// A chunk converted to its in-cluster form.
#[derive(Debug, Clone)]
struct Block {
    /// Whole milliseconds since the first chunk.
    timecode_ms: u64,
    /// Serialized block record: header plus payload.
    record: Vec<u8>,
}

/// Accumulates encoded chunks for one video track and serializes them once.
#[derive(Debug)]
pub struct WebmMuxer {
    track: Track,
    app_name: String,
    blocks: Vec<Block>,
    first_timestamp_us: Option<u64>,
    last_timestamp_us: Option<u64>,
    payload_bytes: u64,
    finalized: bool,
}

impl WebmMuxer {
    pub fn new(track: Track) -> Self {
        Self::with_app_name(track, DEFAULT_APP_NAME)
    }

    /// Muxer that writes `app_name` as the muxing and writing application.
    pub fn with_app_name(track: Track, app_name: impl Into<String>) -> Self {
        Self {
            track,
            app_name: app_name.into(),
            blocks: Vec::new(),
            first_timestamp_us: None,
            last_timestamp_us: None,
            payload_bytes: 0,
            finalized: false,
        }
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Number of blocks accepted so far.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Total compressed payload bytes accepted so far.
    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Clip duration: the last block's offset plus one nominal frame.
    pub fn duration_secs(&self) -> f64 {
        match (self.first_timestamp_us, self.last_timestamp_us) {
            (Some(first), Some(last)) => {
                (last - first + self.track.frame_interval_us()) as f64 / 1_000_000.0
            }
            _ => 0.0,
        }
    }

    /// Append one chunk as a block.
    ///
    /// The chunk is rejected, and the muxer left untouched, if it arrives
    /// after `finalize`, if it is the first chunk and not a keyframe, if its
    /// timestamp is earlier than the previous chunk's, or if it lies beyond
    /// the single-cluster span.
    pub fn add_chunk(&mut self, chunk: &EncodedChunk) -> MuxResult<()> {
        if self.finalized {
            return Err(MuxError::AlreadyFinalized);
        }

        let timestamp_us = chunk.timestamp_us();
        let first_us = match (self.first_timestamp_us, self.last_timestamp_us) {
            (Some(first), Some(previous)) => {
                if timestamp_us < previous {
                    return Err(MuxError::NonMonotonicTimestamp {
                        previous_us: previous,
                        current_us: timestamp_us,
                    });
                }
                first
            }
            _ => {
                if !chunk.is_key() {
                    return Err(MuxError::FirstChunkMustBeKeyframe);
                }
                timestamp_us
            }
        };

        let relative_ms = (timestamp_us - first_us) / 1_000;
        if relative_ms > MAX_CLUSTER_SPAN_MS {
            return Err(MuxError::ClusterSpanExceeded {
                relative_ms,
                limit_ms: MAX_CLUSTER_SPAN_MS,
            });
        }

        self.blocks.push(Block {
            timecode_ms: relative_ms,
            record: block_record(Track::NUMBER, chunk.is_key(), chunk.data()),
        });
        self.first_timestamp_us = Some(first_us);
        self.last_timestamp_us = Some(timestamp_us);
        self.payload_bytes += chunk.len() as u64;
        Ok(())
    }

    /// Serialize the header and segment. May be called once.
    pub fn finalize(&mut self) -> MuxResult<Vec<u8>> {
        if self.finalized {
            return Err(MuxError::AlreadyFinalized);
        }
        self.finalized = true;

        if self.blocks.is_empty() {
            tracing::warn!("Finalizing WebM container without any blocks");
        }

        let header = build_ebml_header()?;
        let segment = ebml::master_element(
            ids::SEGMENT,
            &[
                ebml::master_element(ids::SEEK_HEAD, &[])?,
                self.build_info()?,
                self.build_tracks()?,
                self.build_cluster()?,
            ],
        )?;

        let mut out = Vec::with_capacity(header.len() + segment.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&segment);

        tracing::debug!(
            blocks = self.blocks.len(),
            bytes = out.len(),
            duration_secs = self.duration_secs(),
            codec = %self.track.codec,
            "WebM container finalized"
        );
        Ok(out)
    }

    fn build_info(&self) -> MuxResult<Vec<u8>> {
        ebml::master_element(
            ids::INFO,
            &[
                ebml::uint_element(ids::TIMECODE_SCALE, TIMECODE_SCALE_NS)?,
                ebml::string_element(ids::MUXING_APP, &self.app_name)?,
                ebml::string_element(ids::WRITING_APP, &self.app_name)?,
                ebml::float_element(ids::DURATION, self.duration_secs())?,
            ],
        )
    }

    fn build_tracks(&self) -> MuxResult<Vec<u8>> {
        let video = ebml::master_element(
            ids::VIDEO,
            &[
                ebml::uint_element(ids::PIXEL_WIDTH, u64::from(self.track.width))?,
                ebml::uint_element(ids::PIXEL_HEIGHT, u64::from(self.track.height))?,
            ],
        )?;
        let entry = ebml::master_element(
            ids::TRACK_ENTRY,
            &[
                ebml::uint_element(ids::TRACK_NUMBER, u64::from(Track::NUMBER))?,
                ebml::uint_element(ids::TRACK_UID, u64::from(Track::NUMBER))?,
                ebml::uint_element(ids::FLAG_LACING, 0)?,
                ebml::uint_element(ids::TRACK_TYPE, 1)?,
                ebml::string_element(ids::CODEC_ID, self.track.codec.codec_id())?,
                video,
            ],
        )?;
        ebml::master_element(ids::TRACKS, &[entry])
    }

    fn build_cluster(&self) -> MuxResult<Vec<u8>> {
        let mut children = Vec::with_capacity(self.blocks.len() * 2);
        for block in &self.blocks {
            children.push(ebml::uint_element(ids::TIMECODE, block.timecode_ms)?);
            children.push(ebml::element(ids::SIMPLE_BLOCK, &block.record)?);
        }
        ebml::master_element(ids::CLUSTER, &children)
    }
}

fn build_ebml_header() -> MuxResult<Vec<u8>> {
    ebml::master_element(
        ids::EBML,
        &[
            ebml::uint_element(ids::EBML_VERSION, 1)?,
            ebml::uint_element(ids::EBML_READ_VERSION, 1)?,
            ebml::uint_element(ids::EBML_MAX_ID_LENGTH, 4)?,
            ebml::uint_element(ids::EBML_MAX_SIZE_LENGTH, 8)?,
            ebml::string_element(ids::DOC_TYPE, "webm")?,
            ebml::uint_element(ids::DOC_TYPE_VERSION, 2)?,
            ebml::uint_element(ids::DOC_TYPE_READ_VERSION, 2)?,
        ],
    )
}

/// Block record: track byte, 16-bit relative timecode (always 0), flags, payload.
fn block_record(track_number: u8, key_frame: bool, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(4 + payload.len());
    record.push(0x80 | (track_number & 0x7f));
    record.extend_from_slice(&0i16.to_be_bytes());
    record.push(if key_frame { BLOCK_KEYFRAME_FLAG } else { 0 });
    record.extend_from_slice(payload);
    record
}
