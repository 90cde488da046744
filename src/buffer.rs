use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

use crate::protocol::FrameRecord;
use crate::raster::Raster;

/// Entries held by one slot block
pub const SLOT_BLOCK_CAPACITY: usize = 10;

/// Payload kept in the pre-event buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferedPayload {
    Frame { image: Raster, message: Vec<u8> },
    Record(Bytes),
}

impl BufferedPayload {
    /// Bytes written to disk when the payload is handed off
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            BufferedPayload::Frame { image, message } => FrameRecord {
                encoded: false,
                image: image.clone(),
                message: message.clone(),
            }
            .to_bytes(),
            BufferedPayload::Record(bytes) => bytes.to_vec(),
        }
    }
}

/// Fixed-capacity block of timestamped, shared payloads
///
/// Blocks are handed to the recording queue by `Arc`, so a block stays
/// alive while either the buffer or a writer still holds it.
pub struct SlotBlock<T> {
    entries: RwLock<Vec<(f64, Arc<T>)>>,
}

impl<T> SlotBlock<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::with_capacity(SLOT_BLOCK_CAPACITY)),
        }
    }

    /// Append an entry. Fails once the block holds [`SLOT_BLOCK_CAPACITY`] entries.
    pub fn push(&self, timestamp: f64, payload: Arc<T>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= SLOT_BLOCK_CAPACITY {
            return false;
        }
        entries.push((timestamp, payload));
        true
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= SLOT_BLOCK_CAPACITY
    }

    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .map(|(ts, _)| *ts)
    }

    /// Snapshot of the entries in insertion order
    pub fn entries(&self) -> Vec<(f64, Arc<T>)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T> Default for SlotBlock<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling pre-event buffer built from a chain of slot blocks
///
/// New entries go into the newest block. Eviction drops whole blocks,
/// judged by the age of their oldest entry.
pub struct RollingBuffer<T> {
    blocks: Mutex<VecDeque<Arc<SlotBlock<T>>>>,
}

impl<T> RollingBuffer<T> {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(VecDeque::new()),
        }
    }

    /// Add to the active block, creating one if none exists
    ///
    /// Returns false without allocating when the active block is full.
    pub fn add(&self, timestamp: f64, payload: impl Into<Arc<T>>) -> bool {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        if blocks.is_empty() {
            blocks.push_back(Arc::new(SlotBlock::new()));
        }
        match blocks.back() {
            Some(active) => active.push(timestamp, payload.into()),
            None => false,
        }
    }

    /// Add, opening a new block when the active one is full
    pub fn add_forceexpand(&self, timestamp: f64, payload: impl Into<Arc<T>>) -> bool {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        if blocks.back().map_or(true, |active| active.is_full()) {
            blocks.push_back(Arc::new(SlotBlock::new()));
            debug!("Opened slot block #{}", blocks.len());
        }
        match blocks.back() {
            Some(active) => active.push(timestamp, payload.into()),
            None => false,
        }
    }

    /// Evict every block whose oldest entry is older than `max_age`
    /// relative to `now`. Returns the number of evicted blocks.
    pub fn clean(&self, now: f64, max_age: f64) -> usize {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = blocks.len();
        blocks.retain(|block| {
            block
                .oldest_timestamp()
                .map_or(true, |ts| now - ts <= max_age)
        });
        let evicted = before - blocks.len();
        if evicted > 0 {
            debug!("Evicted {} slot blocks older than {}s", evicted, max_age);
        }
        evicted
    }

    /// Up to `n` most recent blocks, newest first
    pub fn get_recent_blocks(&self, n: usize) -> Vec<Arc<SlotBlock<T>>> {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(n)
            .cloned()
            .collect()
    }

    /// Number of blocks in the chain
    pub fn len(&self) -> usize {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries across all blocks
    pub fn entry_count(&self) -> usize {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|block| block.len())
            .sum()
    }

    pub fn clear(&self) {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<T> Default for RollingBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
