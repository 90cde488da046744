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

use frame_recorder::codec::{self, BlockLayout, CodecError, Cursor, HEADER_LEN};
use frame_recorder::raster::Raster;

#[test]
fn test_binary_payload_round_trip() {
    let layout = BlockLayout::new(1, 1);
    let payload: Vec<u8> = (0..=255).collect();
    let mut canvas = codec::estimate_canvas(200, payload.len(), 1, 1);

    let mut cursor = Cursor::origin(layout);
    assert_eq!(codec::encode(&payload, &mut canvas, &mut cursor, layout), payload.len());

    let mut out = vec![0u8; 512];
    let mut cursor = Cursor::origin(layout);
    assert_eq!(codec::decode(&canvas, &mut cursor, layout, &mut out), Some(256));
    assert_eq!(&out[..256], &payload[..]);
}

#[test]
fn test_consecutive_payloads_share_cursor() {
    let layout = BlockLayout::default();
    let mut canvas = codec::estimate_canvas(120, 64, 1, 1);

    let mut cursor = Cursor::origin(layout);
    codec::encode(b"first", &mut canvas, &mut cursor, layout);
    codec::encode(b"second", &mut canvas, &mut cursor, layout);

    let mut cursor = Cursor::origin(layout);
    assert_eq!(
        codec::decode_string(&canvas, &mut cursor, layout, 32).as_deref(),
        Some("first")
    );
    assert_eq!(
        codec::decode_string(&canvas, &mut cursor, layout, 32).as_deref(),
        Some("second")
    );
}

#[test]
fn test_large_block_bytes_collapse_to_threshold() {
    let layout = BlockLayout::new(2, 1);
    let mut canvas = codec::estimate_canvas(60, 8, 2, 1);
    let mut cursor = Cursor::origin(layout);
    codec::encode(&[0xC8], &mut canvas, &mut cursor, layout);

    // The header (1, 0, 0, ...) reads as zero because no header byte exceeds 127
    let mut cursor = Cursor::origin(layout);
    let mut out = [0u8; 4];
    assert_eq!(codec::decode(&canvas, &mut cursor, layout, &mut out), Some(0));

    // Read as a one-byte header, the 0xC8 blocks announce 255 bytes
    let mut header_only = [0u8; 0];
    let result = codec::decode_with_header_len(&canvas, &mut cursor, layout, 1, &mut header_only);
    assert_eq!(result, Ok(None));
}

#[test]
fn test_merge_strings_loses_boundaries() {
    let layout = BlockLayout::default();
    let mut canvas = Raster::new(64, 64, 3);
    let mut cursor = Cursor::new(0, 0);
    assert_eq!(codec::merge_strings(&["ab", "cd"], &mut canvas, &mut cursor, layout), 4);

    let mut cursor = Cursor::new(0, 0);
    assert_eq!(
        codec::decode_string(&canvas, &mut cursor, layout, 16).as_deref(),
        Some("abcd")
    );
}

#[test]
fn test_truncated_payload_decodes_prefix() {
    let layout = BlockLayout::default();
    // Sized for a two-byte payload; the margin rows hold one more byte
    let mut canvas = codec::estimate_canvas(22, 2, 1, 1);
    let mut cursor = Cursor::origin(layout);
    let written = codec::encode(b"abcdef", &mut canvas, &mut cursor, layout);
    assert_eq!(written, 3);

    let mut cursor = Cursor::origin(layout);
    let mut out = [0u8; 16];
    let read = codec::decode(&canvas, &mut cursor, layout, &mut out).unwrap();
    assert_eq!(read, written);
    assert_eq!(&out[..read], &b"abcdef"[..read]);
}

#[test]
fn test_header_width_limit() {
    let canvas = Raster::new(16, 16, 3);
    let mut out = [0u8; 1];
    let mut cursor = Cursor::default();
    assert_eq!(
        codec::decode_with_header_len(&canvas, &mut cursor, BlockLayout::default(), HEADER_LEN + 1, &mut out),
        Err(CodecError::HeaderTooWide(HEADER_LEN + 1))
    );
}
