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

// Length-prefixed records on top of rotating raw segments

use super::filesystem::{FileSegment, FileSegmentParams};
use super::rotation::{RotationManager, SegmentCallback};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bytes of the length prefix in front of every raw record
pub const RECORD_PREFIX_LEN: usize = 8;

const RAW_STREAM: i32 = 0;

/// Single-stream recorder writing `[len: u64 LE][payload]` records
#[derive(Clone, Default)]
pub struct RawRecorder {
    manager: RotationManager<FileSegment>,
}

impl RawRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&self, callback: SegmentCallback) {
        self.manager.set_callback(callback);
    }

    /// Open the first segment at `<root><stamp><extension>`
    pub fn setup(
        &self,
        root: impl Into<PathBuf>,
        extension: &str,
        capacity_bytes: usize,
        rate_hz: f64,
    ) -> bool {
        let params = BTreeMap::from([(RAW_STREAM, FileSegmentParams::new(root, extension))]);
        self.manager.setup(capacity_bytes, params, rate_hz)
    }

    /// Frame `payload` and hand it to the rotation manager
    ///
    /// Returns false without copying while a flush is in progress.
    pub fn record(&self, payload: &[u8]) -> bool {
        if self.manager.under_writing() {
            return false;
        }
        let mut record = Vec::with_capacity(RECORD_PREFIX_LEN + payload.len());
        record.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        record.extend_from_slice(payload);
        self.manager
            .push(BTreeMap::from([(RAW_STREAM, Bytes::from(record))]))
    }

    pub fn flush(&self) -> bool {
        self.manager.flush()
    }

    pub fn close(&self) -> bool {
        self.manager.close()
    }

    pub fn manager(&self) -> &RotationManager<FileSegment> {
        &self.manager
    }
}

/// Parse length-prefixed records from `reader`, stopping at a truncated tail
pub fn read_records_from(mut reader: impl Read) -> Result<Vec<Vec<u8>>> {
    let mut records = Vec::new();
    loop {
        let mut prefix = [0u8; RECORD_PREFIX_LEN];
        match reader.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("Failed to read record length"),
        }
        let len = u64::from_le_bytes(prefix) as usize;
        let mut record = Vec::new();
        let read = reader
            .by_ref()
            .take(len as u64)
            .read_to_end(&mut record)
            .context("Failed to read record payload")?;
        if read < len {
            debug!("Truncated record ({} of {} bytes), stopping", read, len);
            break;
        }
        records.push(record);
    }
    Ok(records)
}

/// All records of one raw segment
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<u8>>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open raw segment: {}", path.display()))?;
    read_records_from(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_records_stops_at_truncated_tail() {
        let mut data = Vec::new();
        for payload in [&b"first"[..], &b""[..], &b"third"[..]] {
            data.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            data.extend_from_slice(payload);
        }
        data.extend_from_slice(&100u64.to_le_bytes());
        data.extend_from_slice(b"short");

        let records = read_records_from(&data[..]).unwrap();
        assert_eq!(records, vec![b"first".to_vec(), Vec::new(), b"third".to_vec()]);
    }
}
