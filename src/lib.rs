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

// Capture-side frame recorder
//
// This crate records a continuous stream of camera frames and side-channel
// metadata off the producing thread:
// - Hands payloads to a bounded queue drained by a background worker
// - Keeps a rolling pre-event buffer that can be flushed on demand
// - Writes size- or frame-bounded segments that rotate together
// - Embeds metadata inside image pixels with a block codec

pub mod buffer;
pub mod codec;
pub mod config;
pub mod payload;
pub mod protocol;
pub mod queue;
pub mod raster;
pub mod recorder;
pub mod storage;

// Re-export main types
pub use buffer::{BufferedPayload, RollingBuffer, SlotBlock, SLOT_BLOCK_CAPACITY};
pub use codec::{BlockLayout, CodecError, Cursor};
pub use config::{load_config, load_config_with_env, RecorderConfig};
pub use payload::{PayloadContainer, PayloadData};
pub use protocol::{
    CompressionLevel, CompressionType, FrameRecord, MetaHeader, RecordStatus, RecorderState,
};
pub use queue::{FileRecordSink, RecordSink, RecordingQueue};
pub use raster::Raster;
pub use recorder::{
    read_raw_frames, read_with_meta_header, CaptureRecorder, CaptureSettings, PlaybackHandler,
};
pub use storage::{RawRecorder, RotationManager, SegmentSink};
