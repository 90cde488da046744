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

// Byte-bounded raw file segment

use super::backend::{segment_path, SegmentSink};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where raw segments go: `<root><stamp><extension>`
#[derive(Debug, Clone)]
pub struct FileSegmentParams {
    pub root: PathBuf,
    pub extension: String,
}

impl FileSegmentParams {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }
}

/// Raw file segment whose capacity is counted in bytes
pub struct FileSegment {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: usize,
}

impl SegmentSink for FileSegment {
    type Item = Bytes;
    type Params = FileSegmentParams;

    fn open(params: &FileSegmentParams, stamp: &str) -> Result<Self> {
        let path = segment_path(&params.root, stamp, &params.extension);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create segment directory")?;
        }
        let file = File::create(&path)
            .with_context(|| format!("Failed to create segment: {}", path.display()))?;
        info!("Opened raw segment {}", path.display());
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            bytes_written: 0,
        })
    }

    fn units_written(&self) -> usize {
        self.bytes_written
    }

    fn units_of(item: &Bytes) -> usize {
        item.len()
    }

    fn write(&mut self, item: &Bytes) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .context("Segment already released")?;
        writer.write_all(item).context("Failed to write segment data")?;
        writer.flush().context("Failed to flush segment data")?;
        self.bytes_written += item.len();
        debug!("Wrote {} bytes to {}", item.len(), self.path.display());
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().context("Failed to flush segment on release")?;
            debug!(
                "Released raw segment {} ({} bytes)",
                self.path.display(),
                self.bytes_written
            );
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
