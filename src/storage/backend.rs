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

// Segment sink trait for rotating, capacity-bounded outputs

use anyhow::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// One open output segment managed by a [`RotationManager`](super::RotationManager)
///
/// A sink counts what it has written in its own units (bytes for raw files,
/// frames for video segments). The rotation manager compares that count
/// against its capacity before every write.
pub trait SegmentSink: Send + Sized {
    /// Item written per stream on each flush
    type Item: Clone + Send + 'static;

    /// Per-stream settings needed to open a segment
    type Params: Clone + Send + 'static;

    /// Open a new segment named after `stamp`
    fn open(params: &Self::Params, stamp: &str) -> Result<Self>;

    /// Units already written to this segment
    fn units_written(&self) -> usize;

    /// Units `item` will take once written
    fn units_of(item: &Self::Item) -> usize;

    /// Write one item
    fn write(&mut self, item: &Self::Item) -> Result<()>;

    /// Flush and close the segment
    fn release(&mut self) -> Result<()>;

    fn path(&self) -> &Path;
}

/// `<root><stamp><extension>`, with `root` used as a plain name prefix
pub fn segment_path(root: &Path, stamp: &str, extension: &str) -> PathBuf {
    let mut name = OsString::from(root.as_os_str());
    name.push(stamp);
    name.push(extension);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_path_is_prefix_concatenation() {
        let path = segment_path(Path::new("/data/cam0_"), "2025_01_02_03_04_05", ".dat");
        assert_eq!(path, PathBuf::from("/data/cam0_2025_01_02_03_04_05.dat"));
    }
}
