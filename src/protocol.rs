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

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::CodecError;
use crate::raster::Raster;

/// Outcome of a capture request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Ok,
    Busy,
    Error,
}

/// Lifecycle of the capture orchestrator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Uninitialized,
    Ready,
    Recording,
    Closed,
}

/// Compression level (0-4)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum CompressionLevel {
    Fastest = 0,
    Fast = 1,
    #[default]
    Default = 2,
    Slow = 3,
    Slowest = 4,
}

impl CompressionLevel {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(CompressionLevel::Fastest),
            1 => Some(CompressionLevel::Fast),
            2 => Some(CompressionLevel::Default),
            3 => Some(CompressionLevel::Slow),
            4 => Some(CompressionLevel::Slowest),
            _ => None,
        }
    }

    pub fn to_zstd_level(self) -> i32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 5,
            CompressionLevel::Slow => 10,
            CompressionLevel::Slowest => 19,
        }
    }

    pub fn to_lz4_level(self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 5,
            CompressionLevel::Slow => 9,
            CompressionLevel::Slowest => 12,
        }
    }
}

/// Compression applied to stored video frames
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Lz4,
    #[default]
    Zstd,
}

impl CompressionType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "none" => Some(CompressionType::None),
            "lz4" => Some(CompressionType::Lz4),
            "zstd" => Some(CompressionType::Zstd),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
            CompressionType::Zstd => 2,
        }
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            2 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

/// Codec parameters stored in the first frame of every video segment
///
/// Text form: `"<shared_buffer_size> <max_payload_bytes> <block_size> <block_offset> <frame_width> <frame_height>"`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaHeader {
    pub shared_buffer_size: usize,
    pub max_payload_bytes: usize,
    pub block_size: usize,
    pub block_offset: usize,
    pub frame_width: usize,
    pub frame_height: usize,
}

impl fmt::Display for MetaHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.shared_buffer_size,
            self.max_payload_bytes,
            self.block_size,
            self.block_offset,
            self.frame_width,
            self.frame_height
        )
    }
}

impl FromStr for MetaHeader {
    type Err = CodecError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let fields = text
            .split_whitespace()
            .map(|field| {
                field
                    .parse::<usize>()
                    .map_err(|_| CodecError::MalformedMeta(format!("invalid field '{}'", field)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        match fields.as_slice() {
            [shared_buffer_size, max_payload_bytes, block_size, block_offset, frame_width, frame_height] => {
                Ok(Self {
                    shared_buffer_size: *shared_buffer_size,
                    max_payload_bytes: *max_payload_bytes,
                    block_size: *block_size,
                    block_offset: *block_offset,
                    frame_width: *frame_width,
                    frame_height: *frame_height,
                })
            }
            _ => Err(CodecError::MalformedMeta(format!(
                "expected 6 fields, found {}",
                fields.len()
            ))),
        }
    }
}

/// Size of the [`FrameRecord`] header
pub const FRAME_RECORD_HEADER_LEN: usize = 24;

/// Raster frame plus message as stored in raw segments
///
/// # Format
///
/// ```text
/// [encoded: u32][cols: u32][rows: u32][channels: u32][image_len: u32][message_len: u32]
/// [image bytes][message bytes]
/// ```
///
/// All integers are little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub encoded: bool,
    pub image: Raster,
    pub message: Vec<u8>,
}

impl FrameRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let image = self.image.data();
        let mut buffer =
            Vec::with_capacity(FRAME_RECORD_HEADER_LEN + image.len() + self.message.len());
        for field in [
            self.encoded as u32,
            self.image.width() as u32,
            self.image.height() as u32,
            self.image.channels() as u32,
            image.len() as u32,
            self.message.len() as u32,
        ] {
            buffer.extend_from_slice(&field.to_le_bytes());
        }
        buffer.extend_from_slice(image);
        buffer.extend_from_slice(&self.message);
        buffer
    }

    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < FRAME_RECORD_HEADER_LEN {
            bail!("frame record shorter than its {}-byte header", FRAME_RECORD_HEADER_LEN);
        }
        let mut fields = [0usize; 6];
        for (i, chunk) in buffer[..FRAME_RECORD_HEADER_LEN].chunks_exact(4).enumerate() {
            fields[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
        }
        let [encoded, cols, rows, channels, image_len, message_len] = fields;

        let body = &buffer[FRAME_RECORD_HEADER_LEN..];
        if body.len() < image_len + message_len {
            bail!(
                "frame record body has {} bytes, header announces {}",
                body.len(),
                image_len + message_len
            );
        }
        let image = Raster::from_vec(cols, rows, channels, body[..image_len].to_vec())?;
        let message = body[image_len..image_len + message_len].to_vec();

        Ok(Self {
            encoded: encoded != 0,
            image,
            message,
        })
    }
}
