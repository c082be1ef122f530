//! Structural reader for WebM buffers.
//!
//! Walks the element tree far enough to report the track layout and the
//! per-block timing of a single-segment file. It does not decode frames and
//! is not a general demuxer: lacing, block groups and cues are ignored.

use serde::Serialize;

use crate::ebml::{self, ids};
use crate::error::{MuxError, MuxResult};

/// What a WebM buffer contains, as far as the export pipeline cares.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerSummary {
    pub doc_type: String,
    pub muxing_app: Option<String>,
    pub timecode_scale: Option<u64>,
    /// Duration exactly as stored in the Info element. This crate writes seconds.
    pub duration: Option<f64>,
    pub track_count: usize,
    pub codec_id: Option<String>,
    pub track_type: Option<u64>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub cluster_count: usize,
    pub blocks: Vec<BlockSummary>,
}

/// One simple block, with its absolute timecode in timecode-scale units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub track_number: u64,
    pub timecode: i64,
    pub key_frame: bool,
    pub payload_len: usize,
}

impl ContainerSummary {
    /// Whether block timecodes never go backwards.
    pub fn timecodes_non_decreasing(&self) -> bool {
        self.blocks.windows(2).all(|w| w[0].timecode <= w[1].timecode)
    }

    pub fn key_frame_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.key_frame).count()
    }
}

struct Element<'a> {
    id: &'a [u8],
    payload: &'a [u8],
    /// Offset of the payload in the original buffer.
    payload_offset: usize,
}

/// Iterate the sibling elements inside `data`, which starts at `base` in the original buffer.
fn children(data: &[u8], base: usize) -> impl Iterator<Item = MuxResult<Element<'_>>> {
    let mut cursor = 0usize;
    std::iter::from_fn(move || {
        if cursor >= data.len() {
            return None;
        }
        let result = read_element(data, cursor, base);
        match &result {
            Ok((_, next)) => cursor = *next,
            Err(_) => cursor = data.len(),
        }
        Some(result.map(|(element, _)| element))
    })
}

fn read_element(data: &[u8], cursor: usize, base: usize) -> MuxResult<(Element<'_>, usize)> {
    let rest = &data[cursor..];
    let id = ebml::read_id(rest).ok_or(MuxError::Truncated {
        offset: base + cursor,
        context: "element id",
    })?;
    let (size, size_width) =
        ebml::read_vint(&rest[id.len()..]).ok_or(MuxError::Truncated {
            offset: base + cursor + id.len(),
            context: "element size",
        })?;
    let start = cursor + id.len() + size_width;
    let end = usize::try_from(size)
        .ok()
        .and_then(|size| start.checked_add(size))
        .filter(|&end| end <= data.len())
        .ok_or(MuxError::Truncated {
            offset: base + start,
            context: "element payload",
        })?;
    Ok((
        Element {
            id,
            payload: &data[start..end],
            payload_offset: base + start,
        },
        end,
    ))
}

fn uint(element: &Element<'_>) -> MuxResult<u64> {
    ebml::read_uint(element.payload).ok_or_else(|| MuxError::Malformed {
        offset: element.payload_offset,
        message: format!("invalid unsigned integer of {} bytes", element.payload.len()),
    })
}

fn text(element: &Element<'_>) -> MuxResult<String> {
    String::from_utf8(element.payload.to_vec()).map_err(|_| MuxError::Malformed {
        offset: element.payload_offset,
        message: "string element is not UTF-8".to_string(),
    })
}

/// Read the structure of a WebM buffer.
pub fn inspect(data: &[u8]) -> MuxResult<ContainerSummary> {
    let mut summary = ContainerSummary::default();
    let mut saw_header = false;
    let mut saw_segment = false;

    for element in children(data, 0) {
        let element = element?;
        match element.id {
            id if id == ids::EBML => {
                saw_header = true;
                read_header(&element, &mut summary)?;
            }
            id if id == ids::SEGMENT => {
                if !saw_header {
                    return Err(MuxError::Malformed {
                        offset: element.payload_offset,
                        message: "segment before EBML header".to_string(),
                    });
                }
                saw_segment = true;
                read_segment(&element, &mut summary)?;
            }
            _ => {}
        }
    }

    if !saw_header {
        return Err(MuxError::Malformed {
            offset: 0,
            message: "missing EBML header".to_string(),
        });
    }
    if !saw_segment {
        return Err(MuxError::Malformed {
            offset: data.len(),
            message: "missing segment".to_string(),
        });
    }
    Ok(summary)
}

fn read_header(header: &Element<'_>, summary: &mut ContainerSummary) -> MuxResult<()> {
    for child in children(header.payload, header.payload_offset) {
        let child = child?;
        if child.id == ids::DOC_TYPE {
            summary.doc_type = text(&child)?;
        }
    }
    Ok(())
}

fn read_segment(segment: &Element<'_>, summary: &mut ContainerSummary) -> MuxResult<()> {
    for child in children(segment.payload, segment.payload_offset) {
        let child = child?;
        match child.id {
            id if id == ids::INFO => read_info(&child, summary)?,
            id if id == ids::TRACKS => read_tracks(&child, summary)?,
            id if id == ids::CLUSTER => {
                summary.cluster_count += 1;
                read_cluster(&child, summary)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_info(info: &Element<'_>, summary: &mut ContainerSummary) -> MuxResult<()> {
    for child in children(info.payload, info.payload_offset) {
        let child = child?;
        match child.id {
            id if id == ids::TIMECODE_SCALE => summary.timecode_scale = Some(uint(&child)?),
            id if id == ids::MUXING_APP => summary.muxing_app = Some(text(&child)?),
            id if id == ids::DURATION => {
                summary.duration = Some(ebml::read_float(child.payload).ok_or_else(|| {
                    MuxError::Malformed {
                        offset: child.payload_offset,
                        message: "duration is not a 4 or 8 byte float".to_string(),
                    }
                })?);
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_tracks(tracks: &Element<'_>, summary: &mut ContainerSummary) -> MuxResult<()> {
    for entry in children(tracks.payload, tracks.payload_offset) {
        let entry = entry?;
        if entry.id != ids::TRACK_ENTRY {
            continue;
        }
        summary.track_count += 1;
        for field in children(entry.payload, entry.payload_offset) {
            let field = field?;
            match field.id {
                id if id == ids::CODEC_ID => summary.codec_id = Some(text(&field)?),
                id if id == ids::TRACK_TYPE => summary.track_type = Some(uint(&field)?),
                id if id == ids::VIDEO => {
                    for dimension in children(field.payload, field.payload_offset) {
                        let dimension = dimension?;
                        match dimension.id {
                            id if id == ids::PIXEL_WIDTH => {
                                summary.width = Some(uint(&dimension)?)
                            }
                            id if id == ids::PIXEL_HEIGHT => {
                                summary.height = Some(uint(&dimension)?)
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn read_cluster(cluster: &Element<'_>, summary: &mut ContainerSummary) -> MuxResult<()> {
    // Either one Timecode per cluster or, as this crate writes, one before each block.
    let mut base_timecode: i64 = 0;
    for child in children(cluster.payload, cluster.payload_offset) {
        let child = child?;
        match child.id {
            id if id == ids::TIMECODE => base_timecode = uint(&child)? as i64,
            id if id == ids::SIMPLE_BLOCK => {
                summary.blocks.push(read_simple_block(&child, base_timecode)?);
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_simple_block(block: &Element<'_>, base_timecode: i64) -> MuxResult<BlockSummary> {
    let truncated = MuxError::Truncated {
        offset: block.payload_offset,
        context: "block header",
    };
    let (track_number, track_width) = ebml::read_vint(block.payload).ok_or(truncated.clone())?;
    let header = block
        .payload
        .get(track_width..track_width + 3)
        .ok_or(truncated)?;
    let relative = i16::from_be_bytes([header[0], header[1]]);
    Ok(BlockSummary {
        track_number,
        timecode: base_timecode + i64::from(relative),
        key_frame: header[2] & 0x80 != 0,
        payload_len: block.payload.len() - track_width - 3,
    })
}
