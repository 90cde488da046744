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

// Configuration types for frame-recorder

use serde::{Deserialize, Serialize};

use crate::codec::BlockLayout;
use crate::protocol::{CompressionLevel, CompressionType};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub raw: RawConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub prebuffer: PrebufferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where segments go and in which form
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Segment name prefix, e.g. "data/capture_"
    #[serde(default = "default_output_root")]
    pub root: String,

    #[serde(default)]
    pub save_as_video: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            save_as_video: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Bytes per raw segment before rotating
    #[serde(default = "default_raw_capacity")]
    pub capacity_bytes: usize,

    #[serde(default = "default_raw_rate")]
    pub rate_hz: f64,

    #[serde(default = "default_raw_extension")]
    pub extension: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_raw_capacity(),
            rate_hz: default_raw_rate(),
            extension: default_raw_extension(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoConfig {
    /// Frames per video segment (meta frame included)
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,

    #[serde(default = "default_fps")]
    pub fps: f64,

    #[serde(default = "default_fps")]
    pub rate_hz: f64,

    #[serde(default = "default_video_extension")]
    pub extension: String,

    /// Resize factor applied to every source frame
    #[serde(default = "default_source_scale")]
    pub source_scale: f64,

    #[serde(default = "default_compression_type")]
    pub compression_type: String, // "none", "lz4", "zstd"

    #[serde(default = "default_compression_level")]
    pub compression_level: u8, // 0-4
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_frames: default_max_frames(),
            fps: default_fps(),
            rate_hz: default_fps(),
            extension: default_video_extension(),
            source_scale: default_source_scale(),
            compression_type: default_compression_type(),
            compression_level: default_compression_level(),
        }
    }
}

impl VideoConfig {
    pub fn compression(&self) -> CompressionType {
        CompressionType::parse(&self.compression_type).unwrap_or_default()
    }

    pub fn level(&self) -> CompressionLevel {
        CompressionLevel::from_level(self.compression_level).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Upper bound of side channel plus timestamp per frame
    #[serde(default = "default_shared_buffer_size")]
    pub shared_buffer_size: usize,

    /// Payload bytes the data region under each frame is sized for
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default = "default_block_offset")]
    pub block_offset: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            shared_buffer_size: default_shared_buffer_size(),
            max_payload_bytes: default_max_payload_bytes(),
            block_size: default_block_size(),
            block_offset: default_block_offset(),
        }
    }
}

impl CodecConfig {
    pub fn layout(&self) -> BlockLayout {
        BlockLayout::new(self.block_size, self.block_offset)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// 0 leaves the queue unbounded
    #[serde(default = "default_queue_length")]
    pub max_length: usize,

    #[serde(default)]
    pub save_boost: bool,

    #[serde(default = "default_writer_threads")]
    pub max_writer_threads: usize,

    #[serde(default = "default_close_iterations")]
    pub close_iterations: usize,

    #[serde(default = "default_close_sleep_ms")]
    pub close_sleep_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_length: default_queue_length(),
            save_boost: false,
            max_writer_threads: default_writer_threads(),
            close_iterations: default_close_iterations(),
            close_sleep_ms: default_close_sleep_ms(),
        }
    }
}

impl QueueConfig {
    pub fn max_len(&self) -> Option<usize> {
        (self.max_length > 0).then_some(self.max_length)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrebufferConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Blocks whose oldest entry is older than this are evicted
    #[serde(default = "default_max_age")]
    pub max_age_seconds: f64,

    /// Most recent blocks handed to the queue on an event
    #[serde(default = "default_handoff_blocks")]
    pub handoff_blocks: usize,

    #[serde(default = "default_event_dir")]
    pub output_dir: String,
}

impl Default for PrebufferConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_seconds: default_max_age(),
            handoff_blocks: default_handoff_blocks(),
            output_dir: default_event_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_output_root() -> String { "data/capture_".to_string() }
fn default_raw_capacity() -> usize { 100_000_000 }
fn default_raw_rate() -> f64 { 100.0 }
fn default_raw_extension() -> String { ".dat".to_string() }
fn default_max_frames() -> usize { 1000 }
fn default_fps() -> f64 { 30.0 }
fn default_video_extension() -> String { ".svid".to_string() }
fn default_source_scale() -> f64 { 1.0 }
fn default_compression_type() -> String { "zstd".to_string() }
fn default_compression_level() -> u8 { 2 }
fn default_shared_buffer_size() -> usize { 2048 }
fn default_max_payload_bytes() -> usize { 2048 }
fn default_block_size() -> usize { 1 }
fn default_block_offset() -> usize { 1 }
fn default_queue_length() -> usize { 256 }
fn default_writer_threads() -> usize { 4 }
fn default_close_iterations() -> usize { 100 }
fn default_close_sleep_ms() -> u64 { 10 }
fn default_max_age() -> f64 { 2.0 }
fn default_handoff_blocks() -> usize { 3 }
fn default_event_dir() -> String { "data/events".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
