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

// Segment storage module
//
// Provides a trait-based abstraction for rotating output segments,
// with two sinks sharing one rotation state machine:
// - raw files bounded by bytes
// - video segments bounded by frames

pub mod backend;
pub mod filesystem;
pub mod raw;
pub mod rotation;
pub mod video;

pub use backend::{segment_path, SegmentSink};
pub use filesystem::{FileSegment, FileSegmentParams};
pub use raw::{read_records, read_records_from, RawRecorder};
pub use rotation::{segment_stamp, RotationManager, SegmentCallback};
pub use video::{VideoFormatError, VideoParams, VideoReader, VideoSegment};
