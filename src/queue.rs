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

// Bounded recording queue drained by a background writer thread

use anyhow::{Context, Result};
use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::buffer::{BufferedPayload, SlotBlock};
use crate::payload::PayloadContainer;

/// Pre-event blocks handed to the queue
pub type BufferedBlocks = Vec<Arc<SlotBlock<BufferedPayload>>>;

/// Destination of queued items
///
/// Implementations are called from the worker thread and, with save boost
/// enabled, from short-lived writer threads.
pub trait RecordSink: Send + Sync {
    /// Persist one container
    fn write_record(&self, record: &PayloadContainer) -> Result<()>;

    /// Persist one entry of a pre-event block
    fn write_buffered(&self, timestamp: f64, payload: &BufferedPayload) -> Result<()>;
}

/// Writes each container to its own file under a base directory
pub struct FileRecordSink {
    base_dir: PathBuf,
}

impl FileRecordSink {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            info!("Creating record directory: {}", base_dir.display());
            std::fs::create_dir_all(&base_dir).context("Failed to create record directory")?;
        }
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// File path for a container; untagged containers get a time-based name
    fn record_path(&self, record: &PayloadContainer) -> PathBuf {
        match record.tag() {
            Some(tag) => self.base_dir.join(tag),
            None => self.base_dir.join(format!(
                "{}.bin",
                chrono::Local::now().format("%Y_%m_%d_%H_%M_%S_%6f")
            )),
        }
    }
}

impl RecordSink for FileRecordSink {
    fn write_record(&self, record: &PayloadContainer) -> Result<()> {
        let path = self.record_path(record);
        std::fs::write(&path, record.as_slice())
            .with_context(|| format!("Failed to write record: {}", path.display()))?;
        debug!("Wrote {} bytes to {}", record.len(), path.display());
        Ok(())
    }

    fn write_buffered(&self, timestamp: f64, payload: &BufferedPayload) -> Result<()> {
        let path = self.base_dir.join(format!("{:.6}.frame", timestamp));
        std::fs::write(&path, payload.to_bytes())
            .with_context(|| format!("Failed to write buffered entry: {}", path.display()))?;
        Ok(())
    }
}

enum QueueItem {
    Record(PayloadContainer),
    Blocks {
        blocks: BufferedBlocks,
        entry_count: usize,
    },
}

struct Shared {
    sink: Arc<dyn RecordSink>,
    running: AtomicBool,
    pending_entries: AtomicUsize,
    save_boost: AtomicBool,
    max_writer_threads: AtomicUsize,
    active_writers: AtomicUsize,
}

impl Shared {
    /// Write one item. Failures are logged and the item is dropped either way.
    fn write(&self, item: QueueItem) {
        match item {
            QueueItem::Record(mut record) => {
                if !record.is_empty() {
                    if let Err(e) = self.sink.write_record(&record) {
                        warn!("Dropping record: {:#}", e);
                    }
                }
                record.dispose();
            }
            QueueItem::Blocks {
                blocks,
                entry_count,
            } => {
                // Blocks arrive newest first; disk order is oldest first
                for block in blocks.iter().rev() {
                    for (timestamp, payload) in block.entries() {
                        if let Err(e) = self.sink.write_buffered(timestamp, &payload) {
                            warn!("Dropping buffered entry at {}: {:#}", timestamp, e);
                        }
                    }
                }
                self.pending_entries.fetch_sub(entry_count, Ordering::AcqRel);
            }
        }
    }

    fn dispatch(self: &Arc<Self>, item: QueueItem) {
        if self.save_boost.load(Ordering::Acquire) {
            let max = self.max_writer_threads.load(Ordering::Acquire);
            let claimed = self
                .active_writers
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                    (active < max).then_some(active + 1)
                })
                .is_ok();
            if claimed {
                let shared = Arc::clone(self);
                let spawned = thread::Builder::new()
                    .name("record-writer".to_string())
                    .spawn(move || {
                        shared.write(item);
                        shared.active_writers.fetch_sub(1, Ordering::AcqRel);
                    });
                if let Err(e) = spawned {
                    warn!("Failed to spawn writer thread, dropping item: {}", e);
                    self.active_writers.fetch_sub(1, Ordering::AcqRel);
                }
                return;
            }
        }
        self.write(item);
    }
}

/// Thread-safe FIFO of payload containers with one background worker
///
/// Producers never block: with a maximum length configured, pushes onto a
/// full queue are dropped.
///
/// # Examples
///
/// ```no_run
/// use frame_recorder::payload::PayloadContainer;
/// use frame_recorder::queue::{FileRecordSink, RecordingQueue};
/// use std::sync::Arc;
///
/// let sink = Arc::new(FileRecordSink::new("data/records").unwrap());
/// let queue = RecordingQueue::new(sink, Some(64));
/// queue.start();
/// queue.push(PayloadContainer::copied(b"payload").with_tag("a.bin"));
/// queue.close(100, 10);
/// ```
pub struct RecordingQueue {
    sender: Sender<QueueItem>,
    receiver: Receiver<QueueItem>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    shared: Arc<Shared>,
}

impl RecordingQueue {
    /// `max_len` of `None` (or zero) leaves the queue unbounded
    pub fn new(sink: Arc<dyn RecordSink>, max_len: Option<usize>) -> Self {
        let (sender, receiver) = match max_len {
            Some(len) if len > 0 => bounded(len),
            _ => unbounded(),
        };
        let (stop_tx, stop_rx) = unbounded();
        Self {
            sender,
            receiver,
            stop_tx,
            stop_rx,
            shared: Arc::new(Shared {
                sink,
                running: AtomicBool::new(false),
                pending_entries: AtomicUsize::new(0),
                save_boost: AtomicBool::new(false),
                max_writer_threads: AtomicUsize::new(0),
                active_writers: AtomicUsize::new(0),
            }),
        }
    }

    /// Enqueue a container. Returns false when it was dropped.
    pub fn push(&self, record: PayloadContainer) -> bool {
        match self.sender.try_send(QueueItem::Record(record)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Recording queue full, dropping record");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Enqueue pre-event blocks, newest first as returned by
    /// [`RollingBuffer::get_recent_blocks`](crate::buffer::RollingBuffer::get_recent_blocks)
    pub fn push_blocks(&self, blocks: BufferedBlocks) -> bool {
        if blocks.is_empty() {
            return true;
        }
        let entry_count = blocks.iter().map(|block| block.len()).sum();
        self.shared
            .pending_entries
            .fetch_add(entry_count, Ordering::AcqRel);
        match self.sender.try_send(QueueItem::Blocks {
            blocks,
            entry_count,
        }) {
            Ok(()) => true,
            Err(_) => {
                debug!("Recording queue full, dropping {} buffered entries", entry_count);
                self.shared
                    .pending_entries
                    .fetch_sub(entry_count, Ordering::AcqRel);
                false
            }
        }
    }

    /// Spawn the worker. Returns false if it is already running.
    pub fn start(&self) -> bool {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        while self.stop_rx.try_recv().is_ok() {}

        let receiver = self.receiver.clone();
        let stop_rx = self.stop_rx.clone();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("recording-queue".to_string())
            .spawn(move || {
                debug!("Recording queue worker started");
                loop {
                    select! {
                        recv(receiver) -> item => match item {
                            Ok(item) => shared.dispatch(item),
                            Err(_) => break,
                        },
                        recv(stop_rx) -> _ => break,
                    }
                }
                shared.running.store(false, Ordering::Release);
                debug!("Recording queue worker stopped");
            });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to spawn recording queue worker: {}", e);
                self.shared.running.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Ask the worker to exit without waiting for it
    pub fn stop(&self) {
        if self.is_running() {
            let _ = self.stop_tx.send(());
        }
    }

    /// Wait for the queue to drain, stop the worker, then wait for it to exit
    ///
    /// Each wait polls at most `iterations` times, sleeping `sleep_ms` between
    /// polls. Returns false if either wait gave up.
    pub fn close(&self, iterations: usize, sleep_ms: u64) -> bool {
        let drained = poll(iterations, sleep_ms, || {
            !self.is_running() || (self.size_about() == 0 && self.active_writers() == 0)
        });
        self.stop();
        let stopped = poll(iterations, sleep_ms, || !self.is_running());
        if !(drained && stopped) {
            warn!(
                "Recording queue closed with {} items pending (worker running: {})",
                self.size_about(),
                self.is_running()
            );
        }
        drained && stopped
    }

    /// Queued containers plus buffered entries not yet written
    pub fn size_about(&self) -> usize {
        self.receiver.len() + self.size_about_blocks()
    }

    /// Buffered entries not yet written
    pub fn size_about_blocks(&self) -> usize {
        self.shared.pending_entries.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Let the worker hand items to up to `max_threads` detached writers
    pub fn set_save_boost(&self, enabled: bool, max_threads: usize) {
        self.shared
            .max_writer_threads
            .store(max_threads, Ordering::Release);
        self.shared.save_boost.store(enabled, Ordering::Release);
    }

    fn active_writers(&self) -> usize {
        self.shared.active_writers.load(Ordering::Acquire)
    }
}

impl Drop for RecordingQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll `done` up to `iterations` times; true once it holds
pub(crate) fn poll(iterations: usize, sleep_ms: u64, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..iterations {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(sleep_ms));
    }
    done()
}
