//! EBML binary primitives.
//!
//! Every element is `id ++ size_vint(payload length) ++ payload`. Element ids are
//! written as their raw bytes (the marker bits are already part of the id).

use crate::error::{MuxError, MuxResult};

/// Element ids used by the WebM subset this crate writes.
pub mod ids {
    pub const EBML: &[u8] = &[0x1a, 0x45, 0xdf, 0xa3];
    pub const EBML_VERSION: &[u8] = &[0x42, 0x86];
    pub const EBML_READ_VERSION: &[u8] = &[0x42, 0xf7];
    pub const EBML_MAX_ID_LENGTH: &[u8] = &[0x42, 0xf2];
    pub const EBML_MAX_SIZE_LENGTH: &[u8] = &[0x42, 0xf3];
    pub const DOC_TYPE: &[u8] = &[0x42, 0x82];
    pub const DOC_TYPE_VERSION: &[u8] = &[0x42, 0x87];
    pub const DOC_TYPE_READ_VERSION: &[u8] = &[0x42, 0x85];

    pub const SEGMENT: &[u8] = &[0x18, 0x53, 0x80, 0x67];
    pub const SEEK_HEAD: &[u8] = &[0x11, 0x4d, 0x9b, 0x74];

    pub const INFO: &[u8] = &[0x15, 0x49, 0xa9, 0x66];
    pub const TIMECODE_SCALE: &[u8] = &[0x2a, 0xd7, 0xb1];
    pub const MUXING_APP: &[u8] = &[0x4d, 0x80];
    pub const WRITING_APP: &[u8] = &[0x57, 0x41];
    pub const DURATION: &[u8] = &[0x44, 0x89];

    pub const TRACKS: &[u8] = &[0x16, 0x54, 0xae, 0x6b];
    pub const TRACK_ENTRY: &[u8] = &[0xae];
    pub const TRACK_NUMBER: &[u8] = &[0xd7];
    pub const TRACK_UID: &[u8] = &[0x73, 0xc5];
    pub const FLAG_LACING: &[u8] = &[0x9c];
    pub const TRACK_TYPE: &[u8] = &[0x83];
    pub const CODEC_ID: &[u8] = &[0x86];
    pub const VIDEO: &[u8] = &[0xe0];
    pub const PIXEL_WIDTH: &[u8] = &[0xb0];
    pub const PIXEL_HEIGHT: &[u8] = &[0xba];

    pub const CLUSTER: &[u8] = &[0x1f, 0x43, 0xb6, 0x75];
    pub const TIMECODE: &[u8] = &[0xe7];
    pub const SIMPLE_BLOCK: &[u8] = &[0xa3];
}

/// Largest value an 8-byte vint can carry.
pub const VINT_MAX: u64 = (1 << 56) - 1;

/// Number of bytes `vint` uses for `value`: the smallest `w` in `1..=8`
/// with `value <= 2^(7w) - 1`.
pub fn vint_width(value: u64) -> MuxResult<usize> {
    (1..=8usize)
        .find(|&width| value <= (1u64 << (7 * width)) - 1)
        .ok_or(MuxError::VintOverflow { value })
}

/// Encode `value` as a variable-length integer.
///
/// The value is written big-endian in `w` bytes and the length marker
/// `1 << (8 - w)` is OR-ed into the first byte.
pub fn vint(value: u64) -> MuxResult<Vec<u8>> {
    Ok(vint_with_width(value, vint_width(value)?))
}

/// Encode an element payload length.
///
/// Same as [`vint`] except that a length whose encoding would be all ones,
/// the reserved "unknown size" marker, is written one byte wider.
pub fn size_vint(len: u64) -> MuxResult<Vec<u8>> {
    let mut width = vint_width(len)?;
    if len == (1u64 << (7 * width)) - 1 {
        width += 1;
        if width > 8 {
            return Err(MuxError::VintOverflow { value: len });
        }
    }
    Ok(vint_with_width(len, width))
}

fn vint_with_width(value: u64, width: usize) -> Vec<u8> {
    let mut bytes = uint_be(value, width);
    bytes[0] |= 1 << (8 - width);
    bytes
}

/// Minimal number of bytes needed to hold `value` big-endian (at least 1).
pub fn uint_width(value: u64) -> usize {
    let significant = 64 - value.leading_zeros() as usize;
    significant.div_ceil(8).max(1)
}

fn uint_be(value: u64, width: usize) -> Vec<u8> {
    value.to_be_bytes()[8 - width..].to_vec()
}

/// Raw element: id, payload length, payload.
pub fn element(id: &[u8], payload: &[u8]) -> MuxResult<Vec<u8>> {
    let size = size_vint(payload.len() as u64)?;
    let mut out = Vec::with_capacity(id.len() + size.len() + payload.len());
    out.extend_from_slice(id);
    out.extend_from_slice(&size);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Unsigned integer element with the value in its minimal big-endian width.
pub fn uint_element(id: &[u8], value: u64) -> MuxResult<Vec<u8>> {
    element(id, &uint_be(value, uint_width(value)))
}

/// UTF-8 string element, not NUL-terminated.
pub fn string_element(id: &[u8], text: &str) -> MuxResult<Vec<u8>> {
    element(id, text.as_bytes())
}

/// 64-bit IEEE-754 float element, big-endian.
pub fn float_element(id: &[u8], value: f64) -> MuxResult<Vec<u8>> {
    element(id, &value.to_be_bytes())
}

/// Master element whose payload is `children` concatenated in order.
pub fn master_element(id: &[u8], children: &[Vec<u8>]) -> MuxResult<Vec<u8>> {
    element(id, &children.concat())
}

/// Decode a vint at the start of `data`, returning `(value, width)`.
///
/// Returns `None` when the first byte is zero (width above 8) or the input
/// is shorter than the declared width.
pub fn read_vint(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let width = first.leading_zeros() as usize + 1;
    let bytes = data.get(..width)?;
    let mut value = u64::from(first) & (0xff >> width);
    for byte in &bytes[1..] {
        value = (value << 8) | u64::from(*byte);
    }
    Some((value, width))
}

/// Decode an element id at the start of `data`. Ids keep their marker bits.
pub fn read_id(data: &[u8]) -> Option<&[u8]> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let width = first.leading_zeros() as usize + 1;
    if width > 4 {
        return None;
    }
    data.get(..width)
}

/// Big-endian unsigned integer payload.
pub fn read_uint(payload: &[u8]) -> Option<u64> {
    if payload.is_empty() || payload.len() > 8 {
        return None;
    }
    Some(
        payload
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
    )
}

/// Big-endian float payload (4 or 8 bytes).
pub fn read_float(payload: &[u8]) -> Option<f64> {
    match payload.len() {
        4 => Some(f64::from(f32::from_be_bytes(payload.try_into().ok()?))),
        8 => Some(f64::from_be_bytes(payload.try_into().ok()?)),
        _ => None,
    }
}
