// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Block codec that stores byte payloads inside raster pixels
///
/// Every bit of the payload occupies one `size`x`size` block followed by
/// `offset` blank pixels. Blocks fill a row left to right and wrap to the
/// next band of rows when the canvas width is used up.
///
/// # Format
///
/// ```text
/// [length: u64 LE, 8 bytes][payload bytes]
/// ```
///
/// Each byte is written most significant bit first. With a block size of 1
/// a bit is a black (0) or white (255) pixel. With larger blocks the whole
/// block is painted with the original byte value and the decoder thresholds
/// the dominant value of channel 0, so only bytes above 127 survive as
/// `0xFF` and everything else reads back as `0x00`.
///
/// Encoding past the end of the canvas silently truncates.
use thiserror::Error;
use tracing::debug;

use crate::raster::Raster;

/// Width of the length header in bytes
pub const HEADER_LEN: usize = 8;

/// Channels of a canvas produced by [`estimate_canvas`]
pub const CANVAS_CHANNELS: usize = 3;

const BIT_THRESHOLD: u8 = 127;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("length header of {0} bytes exceeds the {HEADER_LEN}-byte maximum")]
    HeaderTooWide(usize),

    #[error("malformed meta header: {0}")]
    MalformedMeta(String),
}

/// Block size and spacing of an encoded region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub size: usize,
    pub offset: usize,
}

impl BlockLayout {
    pub fn new(size: usize, offset: usize) -> Self {
        Self { size, offset }
    }

    fn step(&self) -> usize {
        self.size + self.offset
    }
}

impl Default for BlockLayout {
    fn default() -> Self {
        Self { size: 1, offset: 1 }
    }
}

/// Position of the next block, advanced by every codec call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub x: usize,
    pub y: usize,
}

impl Cursor {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// First block of a canvas built by [`estimate_canvas`]
    pub fn origin(layout: BlockLayout) -> Self {
        Self {
            x: layout.offset,
            y: layout.offset,
        }
    }

    fn fits(&self, canvas: &Raster, layout: BlockLayout) -> bool {
        layout.size > 0
            && self.x + layout.size <= canvas.width()
            && self.y + layout.step() < canvas.height()
    }

    fn advance(&mut self, canvas: &Raster, layout: BlockLayout) {
        self.x += layout.step();
        if self.x + layout.step() >= canvas.width() {
            self.x = layout.offset;
            self.y += layout.step();
        }
    }
}

fn blocks_per_row(width: usize, layout: BlockLayout) -> usize {
    if layout.size == 0 || width < layout.offset + layout.size {
        return 0;
    }
    let mut x = layout.offset;
    let mut count = 1;
    loop {
        x += layout.step();
        if x + layout.step() >= width {
            return count;
        }
        count += 1;
    }
}

/// Smallest zeroed canvas of `width` columns able to hold the header and
/// `max_payload_bytes`, with two spare block rows as margin
pub fn estimate_canvas(
    width: usize,
    max_payload_bytes: usize,
    block_size: usize,
    block_offset: usize,
) -> Raster {
    let layout = BlockLayout::new(block_size, block_offset);
    let per_row = blocks_per_row(width, layout);
    let bits = (HEADER_LEN + max_payload_bytes) * 8;
    let block_rows = if per_row == 0 {
        0
    } else {
        bits.div_ceil(per_row)
    };
    let height = block_offset + (block_rows + 2) * layout.step();
    debug!(
        "Estimated codec canvas {}x{} ({} blocks per row, {} block rows)",
        width, height, per_row, block_rows
    );
    Raster::new(width, height, CANVAS_CHANNELS)
}

fn write_byte(value: u8, canvas: &mut Raster, cursor: &mut Cursor, layout: BlockLayout) -> bool {
    for i in (0..8).rev() {
        if !cursor.fits(canvas, layout) {
            return false;
        }
        if layout.size > 1 {
            canvas.fill_block(cursor.x, cursor.y, layout.size, value);
        } else {
            let bit = (value >> i) & 1;
            canvas.set_pixel(cursor.x, cursor.y, bit * 255);
        }
        cursor.advance(canvas, layout);
    }
    true
}

/// Most frequent channel-0 value of a block, lowest value on ties
fn block_mode(canvas: &Raster, x: usize, y: usize, size: usize) -> u8 {
    let mut histogram = [0usize; 256];
    for row in y..y + size {
        for col in x..x + size {
            if let Some(v) = canvas.get(col, row, 0) {
                histogram[v as usize] += 1;
            }
        }
    }
    let mut best = 0usize;
    for (value, &count) in histogram.iter().enumerate() {
        if count > histogram[best] {
            best = value;
        }
    }
    best as u8
}

fn read_byte(canvas: &Raster, cursor: &mut Cursor, layout: BlockLayout) -> Option<u8> {
    let mut value = 0u8;
    for i in (0..8).rev() {
        if !cursor.fits(canvas, layout) {
            return None;
        }
        let sample = if layout.size > 1 {
            block_mode(canvas, cursor.x, cursor.y, layout.size)
        } else {
            canvas.get(cursor.x, cursor.y, 0).unwrap_or(0)
        };
        if sample > BIT_THRESHOLD {
            value |= 1 << i;
        }
        cursor.advance(canvas, layout);
    }
    Some(value)
}

fn write_header(len: usize, canvas: &mut Raster, cursor: &mut Cursor, layout: BlockLayout) -> bool {
    (len as u64)
        .to_le_bytes()
        .iter()
        .all(|&b| write_byte(b, canvas, cursor, layout))
}

/// Encode a length header followed by `bytes`
///
/// Returns how many payload bytes were fully written; fewer than
/// `bytes.len()` means the canvas ran out.
pub fn encode(bytes: &[u8], canvas: &mut Raster, cursor: &mut Cursor, layout: BlockLayout) -> usize {
    if !write_header(bytes.len(), canvas, cursor, layout) {
        debug!("Codec canvas exhausted while writing the length header");
        return 0;
    }
    for (written, &b) in bytes.iter().enumerate() {
        if !write_byte(b, canvas, cursor, layout) {
            debug!(
                "Codec canvas exhausted after {} of {} bytes",
                written,
                bytes.len()
            );
            return written;
        }
    }
    bytes.len()
}

/// Encode all `strings` behind one header holding their total length
///
/// Boundaries between the strings are not stored.
pub fn merge_strings<S: AsRef<[u8]>>(
    strings: &[S],
    canvas: &mut Raster,
    cursor: &mut Cursor,
    layout: BlockLayout,
) -> usize {
    let total: usize = strings.iter().map(|s| s.as_ref().len()).sum();
    if !write_header(total, canvas, cursor, layout) {
        return 0;
    }
    let mut written = 0;
    for s in strings {
        for &b in s.as_ref() {
            if !write_byte(b, canvas, cursor, layout) {
                return written;
            }
            written += 1;
        }
    }
    written
}

/// Decode a payload written by [`encode`] into `out`
///
/// `None` when the header cannot be read or the announced length does not
/// fit `out`; in the latter case the payload is left unread. Otherwise the
/// number of bytes read, which is short only if the canvas ends early.
pub fn decode(canvas: &Raster, cursor: &mut Cursor, layout: BlockLayout, out: &mut [u8]) -> Option<usize> {
    decode_with_header_len(canvas, cursor, layout, HEADER_LEN, out).unwrap_or(None)
}

/// Like [`decode`] with a caller-chosen header width
pub fn decode_with_header_len(
    canvas: &Raster,
    cursor: &mut Cursor,
    layout: BlockLayout,
    header_len: usize,
    out: &mut [u8],
) -> Result<Option<usize>, CodecError> {
    if header_len > HEADER_LEN {
        return Err(CodecError::HeaderTooWide(header_len));
    }
    let mut header = [0u8; HEADER_LEN];
    for slot in header.iter_mut().take(header_len) {
        match read_byte(canvas, cursor, layout) {
            Some(b) => *slot = b,
            None => return Ok(None),
        }
    }
    let len = u64::from_le_bytes(header);
    if len > out.len() as u64 {
        debug!(
            "Decoded length {} exceeds the {}-byte output buffer, skipping payload",
            len,
            out.len()
        );
        return Ok(None);
    }
    let len = len as usize;
    for (read, slot) in out.iter_mut().take(len).enumerate() {
        match read_byte(canvas, cursor, layout) {
            Some(b) => *slot = b,
            None => return Ok(Some(read)),
        }
    }
    Ok(Some(len))
}

/// Decode into a fresh buffer of at most `max_len` bytes
///
/// The buffer never exceeds what the canvas can hold at one pixel per bit.
pub fn decode_to_vec(
    canvas: &Raster,
    cursor: &mut Cursor,
    layout: BlockLayout,
    max_len: usize,
) -> Option<Vec<u8>> {
    let capacity = canvas.width() * canvas.height() / 8;
    let mut out = vec![0u8; max_len.min(capacity)];
    let len = decode(canvas, cursor, layout, &mut out)?;
    out.truncate(len);
    Some(out)
}

/// Decode a payload as text, replacing invalid UTF-8
pub fn decode_string(
    canvas: &Raster,
    cursor: &mut Cursor,
    layout: BlockLayout,
    max_len: usize,
) -> Option<String> {
    decode_to_vec(canvas, cursor, layout, max_len)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_single_pixel_blocks() {
        let layout = BlockLayout::new(1, 1);
        let payload = b"imu 0.12 -0.98 9.81";
        let mut canvas = estimate_canvas(64, payload.len(), 1, 1);
        let mut cursor = Cursor::origin(layout);
        assert_eq!(encode(payload, &mut canvas, &mut cursor, layout), payload.len());

        let mut cursor = Cursor::origin(layout);
        let decoded = decode_to_vec(&canvas, &mut cursor, layout, 64).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_estimated_canvas_holds_max_payload() {
        let layout = BlockLayout::new(2, 1);
        let payload = vec![0xFFu8; 100];
        let mut canvas = estimate_canvas(50, payload.len(), 2, 1);
        let mut cursor = Cursor::origin(layout);
        assert_eq!(encode(&payload, &mut canvas, &mut cursor, layout), 100);
    }

    #[test]
    fn test_large_blocks_threshold_byte_values() {
        let layout = BlockLayout::new(3, 1);
        let mut canvas = estimate_canvas(40, 4, 3, 1);
        let mut cursor = Cursor::origin(layout);
        encode(&[0xC8, 0x10], &mut canvas, &mut cursor, layout);

        // A length header of 2 is all bytes <= 127, so it decodes to zero
        let mut cursor = Cursor::origin(layout);
        let mut out = [0u8; 8];
        assert_eq!(decode(&canvas, &mut cursor, layout, &mut out), Some(0));
        assert_eq!(read_byte(&canvas, &mut cursor, layout), Some(0xFF));
        assert_eq!(read_byte(&canvas, &mut cursor, layout), Some(0x00));
    }

    #[test]
    fn test_truncates_on_small_canvas() {
        let layout = BlockLayout::new(1, 1);
        let mut canvas = Raster::new(20, 6, 3);
        let mut cursor = Cursor::origin(layout);
        let written = encode(&[0xAA; 32], &mut canvas, &mut cursor, layout);
        assert_eq!(written, 0);
    }

    #[test]
    fn test_payload_longer_than_output_is_skipped() {
        let layout = BlockLayout::default();
        let mut canvas = estimate_canvas(80, 16, 1, 1);
        let mut cursor = Cursor::origin(layout);
        encode(b"0123456789", &mut canvas, &mut cursor, layout);

        let mut cursor = Cursor::origin(layout);
        let mut out = [0u8; 4];
        assert_eq!(decode(&canvas, &mut cursor, layout, &mut out), None);
    }

    #[test]
    fn test_header_too_wide() {
        let canvas = Raster::new(8, 8, 3);
        let mut cursor = Cursor::default();
        let mut out = [0u8; 4];
        let result = decode_with_header_len(&canvas, &mut cursor, BlockLayout::default(), 9, &mut out);
        assert_eq!(result, Err(CodecError::HeaderTooWide(9)));
    }

    #[test]
    fn test_merge_strings_concatenates() {
        let layout = BlockLayout::default();
        let mut canvas = estimate_canvas(64, 8, 1, 1);
        let mut cursor = Cursor::origin(layout);
        merge_strings(&["ab", "cd"], &mut canvas, &mut cursor, layout);

        let mut cursor = Cursor::origin(layout);
        assert_eq!(
            decode_string(&canvas, &mut cursor, layout, 16).as_deref(),
            Some("abcd")
        );
    }

    #[test]
    fn test_zero_size_block_writes_nothing() {
        let layout = BlockLayout::new(0, 1);
        let mut canvas = Raster::new(16, 16, 3);
        let mut cursor = Cursor::origin(layout);
        assert_eq!(encode(b"x", &mut canvas, &mut cursor, layout), 0);
        assert!(canvas.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_decode_to_vec_ignores_absurd_limit() {
        let layout = BlockLayout::default();
        let mut canvas = estimate_canvas(32, 4, 1, 1);
        let mut cursor = Cursor::origin(layout);
        encode(b"ok", &mut canvas, &mut cursor, layout);

        let mut cursor = Cursor::origin(layout);
        assert_eq!(
            decode_to_vec(&canvas, &mut cursor, layout, usize::MAX),
            Some(b"ok".to_vec())
        );
    }
}
