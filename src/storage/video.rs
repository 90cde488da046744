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

/// Frame-bounded video segments
///
/// A segment is a self-describing frame container. Frames are stored
/// losslessly so pixel-embedded metadata survives playback.
///
/// # Format
///
/// ```text
/// SVID|width: u32|height: u32|channels: u32|fps: f64|compression: u8
/// [frame_len: u32][frame bytes] ...
/// ```
///
/// All integers are little-endian. Frame bytes are the raw raster, optionally
/// compressed with LZ4 or Zstd.
use super::backend::{segment_path, SegmentSink};
use crate::protocol::{CompressionLevel, CompressionType};
use crate::raster::Raster;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const MAGIC: &[u8; 4] = b"SVID";
const HEADER_LEN: usize = 4 + 4 + 4 + 4 + 8 + 1;

#[derive(Debug, Error)]
pub enum VideoFormatError {
    #[error("not a video segment (bad magic)")]
    BadMagic,

    #[error("unknown compression tag {0}")]
    UnknownCompression(u8),

    #[error("frame holds {actual} bytes, expected {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    #[error("frame size {width}x{height}x{channels} is too large")]
    FrameTooLarge {
        width: usize,
        height: usize,
        channels: usize,
    },
}

/// Settings shared by every segment of one video stream
#[derive(Debug, Clone)]
pub struct VideoParams {
    pub root: PathBuf,
    pub extension: String,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub fps: f64,
    pub compression: CompressionType,
    pub level: CompressionLevel,
    /// Written first in every segment, including after rotation
    pub meta_frame: Option<Arc<Raster>>,
}

impl VideoParams {
    pub fn new(root: impl Into<PathBuf>, width: usize, height: usize, channels: usize) -> Self {
        Self {
            root: root.into(),
            extension: ".svid".to_string(),
            width,
            height,
            channels,
            fps: 30.0,
            compression: CompressionType::default(),
            level: CompressionLevel::default(),
            meta_frame: None,
        }
    }
}

/// Video segment whose capacity is counted in frames
pub struct VideoSegment {
    path: PathBuf,
    params: VideoParams,
    writer: Option<BufWriter<File>>,
    frames_written: usize,
}

impl VideoSegment {
    fn write_header(writer: &mut impl Write, params: &VideoParams) -> Result<()> {
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&(params.width as u32).to_le_bytes());
        header.extend_from_slice(&(params.height as u32).to_le_bytes());
        header.extend_from_slice(&(params.channels as u32).to_le_bytes());
        header.extend_from_slice(&params.fps.to_le_bytes());
        header.push(params.compression.to_byte());
        writer
            .write_all(&header)
            .context("Failed to write video header")
    }

    fn write_frame(&mut self, frame: &Raster) -> Result<()> {
        let frame = if frame.dimensions() != (self.params.width, self.params.height) {
            debug!(
                "Rescaling frame {:?} to {}x{}",
                frame.dimensions(),
                self.params.width,
                self.params.height
            );
            frame.resize(self.params.width, self.params.height)
        } else {
            frame.clone()
        };
        let frame = frame.to_channels(self.params.channels);
        let encoded = compress(
            self.params.compression,
            self.params.level,
            frame.into_vec(),
        )?;

        let writer = self
            .writer
            .as_mut()
            .context("Segment already released")?;
        writer
            .write_all(&(encoded.len() as u32).to_le_bytes())
            .context("Failed to write frame length")?;
        writer
            .write_all(&encoded)
            .context("Failed to write frame data")?;
        writer.flush().context("Failed to flush frame")?;
        self.frames_written += 1;
        Ok(())
    }
}

impl SegmentSink for VideoSegment {
    type Item = Arc<Raster>;
    type Params = VideoParams;

    fn open(params: &VideoParams, stamp: &str) -> Result<Self> {
        let path = segment_path(&params.root, stamp, &params.extension);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create segment directory")?;
        }
        let file = File::create(&path)
            .with_context(|| format!("Failed to create video segment: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        Self::write_header(&mut writer, params)?;

        let mut segment = Self {
            path,
            params: params.clone(),
            writer: Some(writer),
            frames_written: 0,
        };
        if let Some(meta) = params.meta_frame.as_deref() {
            segment.write_frame(meta)?;
        }
        info!(
            "Opened video segment {} ({}x{} @ {} fps)",
            segment.path.display(),
            params.width,
            params.height,
            params.fps
        );
        Ok(segment)
    }

    fn units_written(&self) -> usize {
        self.frames_written
    }

    fn units_of(_item: &Arc<Raster>) -> usize {
        1
    }

    fn write(&mut self, item: &Arc<Raster>) -> Result<()> {
        self.write_frame(item)
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().context("Failed to flush video segment")?;
            debug!(
                "Released video segment {} ({} frames)",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn compress(kind: CompressionType, level: CompressionLevel, data: Vec<u8>) -> Result<Vec<u8>> {
    match kind {
        CompressionType::None => Ok(data),
        CompressionType::Lz4 => compress_lz4(level, &data),
        CompressionType::Zstd => {
            zstd::encode_all(&data[..], level.to_zstd_level()).context("Zstd compression failed")
        }
    }
}

fn compress_lz4(level: CompressionLevel, data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = lz4::EncoderBuilder::new()
        .level(level.to_lz4_level())
        .build(Vec::new())
        .context("Failed to create LZ4 encoder")?;
    encoder
        .write_all(data)
        .context("Failed to write data to LZ4 encoder")?;
    let (compressed, result) = encoder.finish();
    result.context("LZ4 compression failed")?;
    Ok(compressed)
}

/// Decompress one frame, reading at most `limit + 1` bytes of output so an
/// oversized frame is detected without inflating all of it
fn decompress(kind: CompressionType, data: Vec<u8>, limit: usize) -> Result<Vec<u8>> {
    let limit = limit as u64 + 1;
    let mut out = Vec::new();
    match kind {
        CompressionType::None => return Ok(data),
        CompressionType::Lz4 => {
            let decoder =
                lz4::Decoder::new(&data[..]).context("Failed to create LZ4 decoder")?;
            decoder
                .take(limit)
                .read_to_end(&mut out)
                .context("LZ4 decompression failed")?;
        }
        CompressionType::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(&data[..])
                .context("Failed to create Zstd decoder")?;
            decoder
                .take(limit)
                .read_to_end(&mut out)
                .context("Zstd decompression failed")?;
        }
    }
    Ok(out)
}

/// Sequential reader over the frames of one video segment
///
/// A truncated trailing frame is treated as the end of the segment.
pub struct VideoReader {
    reader: BufReader<File>,
    width: usize,
    height: usize,
    channels: usize,
    frame_len: usize,
    fps: f64,
    compression: CompressionType,
}

impl VideoReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open video segment: {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut header = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut header)
            .context("Failed to read video header")?;
        if &header[..4] != MAGIC {
            return Err(VideoFormatError::BadMagic.into());
        }
        let field = |i: usize| {
            u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]) as usize
        };
        let mut fps = [0u8; 8];
        fps.copy_from_slice(&header[16..24]);
        let compression = CompressionType::from_byte(header[24])
            .ok_or(VideoFormatError::UnknownCompression(header[24]))?;

        let (width, height, channels) = (field(4), field(8), field(12));
        let frame_len = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(channels))
            .ok_or(VideoFormatError::FrameTooLarge {
                width,
                height,
                channels,
            })?;

        Ok(Self {
            width,
            height,
            channels,
            frame_len,
            fps: f64::from_le_bytes(fps),
            compression,
            reader,
        })
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Next frame, or `None` at the end of the segment
    pub fn next_frame(&mut self) -> Result<Option<Raster>> {
        let mut len = [0u8; 4];
        match self.reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("Failed to read frame length"),
        }
        let len = u32::from_le_bytes(len) as usize;
        if self.compression == CompressionType::None && len != self.frame_len {
            return Err(VideoFormatError::FrameSizeMismatch {
                expected: self.frame_len,
                actual: len,
            }
            .into());
        }
        // Grows with the bytes actually present, never with the announced length
        let mut encoded = Vec::new();
        let read = self
            .reader
            .by_ref()
            .take(len as u64)
            .read_to_end(&mut encoded)
            .context("Failed to read frame data")?;
        if read < len {
            debug!("Truncated trailing frame ({} of {} bytes), stopping", read, len);
            return Ok(None);
        }
        let data = decompress(self.compression, encoded, self.frame_len)?;
        if data.len() != self.frame_len {
            return Err(VideoFormatError::FrameSizeMismatch {
                expected: self.frame_len,
                actual: data.len(),
            }
            .into());
        }
        Raster::from_vec(self.width, self.height, self.channels, data).map(Some)
    }
}

impl Iterator for VideoReader {
    type Item = Result<Raster>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gradient(width: usize, height: usize) -> Raster {
        let data = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        Raster::from_vec(width, height, 3, data).unwrap()
    }

    #[test]
    fn test_frames_survive_each_compression() {
        for compression in [CompressionType::None, CompressionType::Lz4, CompressionType::Zstd] {
            let temp_dir = TempDir::new().unwrap();
            let mut params = VideoParams::new(temp_dir.path().join("cam_"), 8, 4, 3);
            params.compression = compression;

            let frame = gradient(8, 4);
            let mut segment = VideoSegment::open(&params, "s").unwrap();
            segment.write(&Arc::new(frame.clone())).unwrap();
            segment.release().unwrap();

            let mut reader = VideoReader::open(segment.path()).unwrap();
            assert_eq!(reader.dimensions(), (8, 4));
            assert_eq!(reader.next_frame().unwrap(), Some(frame));
            assert_eq!(reader.next_frame().unwrap(), None);
        }
    }

    #[test]
    fn test_meta_frame_written_first_and_counted() {
        let temp_dir = TempDir::new().unwrap();
        let mut params = VideoParams::new(temp_dir.path().join("cam_"), 4, 4, 3);
        let mut meta = Raster::new(4, 4, 3);
        meta.set_pixel(0, 0, 255);
        params.meta_frame = Some(Arc::new(meta.clone()));

        let mut segment = VideoSegment::open(&params, "s").unwrap();
        assert_eq!(segment.units_written(), 1);
        segment.write(&Arc::new(Raster::new(4, 4, 3))).unwrap();
        segment.release().unwrap();

        let frames: Vec<Raster> = VideoReader::open(segment.path())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], meta);
    }

    #[test]
    fn test_mismatched_frame_is_rescaled() {
        let temp_dir = TempDir::new().unwrap();
        let params = VideoParams::new(temp_dir.path().join("cam_"), 4, 2, 3);
        let mut segment = VideoSegment::open(&params, "s").unwrap();
        segment.write(&Arc::new(gradient(8, 4))).unwrap();
        segment.release().unwrap();

        let frame = VideoReader::open(segment.path())
            .unwrap()
            .next_frame()
            .unwrap()
            .unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
    }

    #[test]
    fn test_bad_magic() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bogus.svid");
        std::fs::write(&path, vec![0u8; HEADER_LEN]).unwrap();
        let err = VideoReader::open(&path).err().unwrap();
        assert!(err.downcast_ref::<VideoFormatError>().is_some());
    }

    fn header(width: u32, height: u32, channels: u32, compression: CompressionType) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        for field in [width, height, channels] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes.extend_from_slice(&30.0f64.to_le_bytes());
        bytes.push(compression.to_byte());
        bytes
    }

    #[test]
    fn test_oversized_dimensions_rejected_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("huge.svid");
        std::fs::write(&path, header(u32::MAX, u32::MAX, u32::MAX, CompressionType::None)).unwrap();
        let err = VideoReader::open(&path).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<VideoFormatError>(),
            Some(VideoFormatError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_announced_frame_length_is_not_trusted() {
        let temp_dir = TempDir::new().unwrap();

        // Uncompressed frames must match the header dimensions exactly
        let path = temp_dir.path().join("raw.svid");
        let mut bytes = header(4, 2, 3, CompressionType::None);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, bytes).unwrap();
        let mut reader = VideoReader::open(&path).unwrap();
        assert!(reader.next_frame().is_err());

        // Compressed frames announcing more bytes than exist end the segment
        let path = temp_dir.path().join("lz4.svid");
        let mut bytes = header(4, 2, 3, CompressionType::Lz4);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, bytes).unwrap();
        let mut reader = VideoReader::open(&path).unwrap();
        assert_eq!(reader.next_frame().unwrap(), None);
    }
}
