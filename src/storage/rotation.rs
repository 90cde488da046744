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

// Size/frame-bounded rotation of multi-stream segments

use super::backend::SegmentSink;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::queue::poll;

/// Called with the new segment stamp before anything is written to it
pub type SegmentCallback = Arc<dyn Fn(&str) + Send + Sync>;

const CLOSE_POLL_ITERATIONS: usize = 500;
const CLOSE_POLL_SLEEP_MS: u64 = 10;

/// Filesystem-safe local time stamp, e.g. `2025_03_14_09_26_53`
pub fn segment_stamp() -> String {
    chrono::Local::now().format("%Y_%m_%d_%H_%M_%S").to_string()
}

struct State<S: SegmentSink> {
    initialized: bool,
    capacity: usize,
    min_interval: Duration,
    last_flush: Instant,
    params: BTreeMap<i32, S::Params>,
    segments: BTreeMap<i32, S>,
    pending: BTreeMap<i32, S::Item>,
    current_stamp: String,
    last_base_stamp: String,
    stamp_seq: u32,
}

impl<S: SegmentSink> State<S> {
    fn new() -> Self {
        Self {
            initialized: false,
            capacity: 0,
            min_interval: Duration::ZERO,
            last_flush: Instant::now(),
            params: BTreeMap::new(),
            segments: BTreeMap::new(),
            pending: BTreeMap::new(),
            current_stamp: String::new(),
            last_base_stamp: String::new(),
            stamp_seq: 0,
        }
    }

    /// Stamp for a new batch of segments, suffixed when the clock has not
    /// moved since the previous batch so segments never overwrite each other
    fn next_stamp(&mut self) -> String {
        let base = segment_stamp();
        if base == self.last_base_stamp {
            self.stamp_seq += 1;
            format!("{}_{}", base, self.stamp_seq)
        } else {
            self.last_base_stamp = base.clone();
            self.stamp_seq = 0;
            base
        }
    }

    fn release_all(&mut self) {
        for (id, mut segment) in std::mem::take(&mut self.segments) {
            if let Err(e) = segment.release() {
                warn!("Failed to release segment for stream {}: {:#}", id, e);
            }
        }
    }

    /// Open one segment per stream under a fresh stamp. Returns false if any
    /// stream failed; the others stay open.
    fn generate(&mut self, callback: Option<&SegmentCallback>) -> bool {
        self.release_all();
        let stamp = self.next_stamp();
        if let Some(callback) = callback {
            callback(&stamp);
        }

        let mut all_opened = true;
        for (id, params) in &self.params {
            match S::open(params, &stamp) {
                Ok(segment) => {
                    self.segments.insert(*id, segment);
                }
                Err(e) => {
                    warn!("Failed to open segment for stream {}: {:#}", id, e);
                    all_opened = false;
                }
            }
        }
        self.current_stamp = stamp;
        all_opened
    }

    fn needs_rotation(&self) -> bool {
        self.pending.iter().any(|(id, item)| {
            self.segments
                .get(id)
                .is_some_and(|segment| segment.units_written() + S::units_of(item) > self.capacity)
        })
    }
}

struct Inner<S: SegmentSink> {
    state: Mutex<State<S>>,
    in_flight: AtomicBool,
    callback: Mutex<Option<SegmentCallback>>,
}

impl<S: SegmentSink> Inner<S> {
    fn callback(&self) -> Option<SegmentCallback> {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, State<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock_state(&self) -> Option<MutexGuard<'_, State<S>>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn flush(&self) -> bool {
        let Some(mut state) = self.try_lock_state() else {
            debug!("Flush already in progress, skipping");
            return false;
        };
        self.in_flight.store(true, Ordering::Release);
        let wrote = self.flush_locked(&mut state);
        self.in_flight.store(false, Ordering::Release);
        wrote
    }

    fn flush_locked(&self, state: &mut State<S>) -> bool {
        if !state.initialized || state.pending.is_empty() {
            return false;
        }
        if state.last_flush.elapsed() < state.min_interval {
            return false;
        }
        state.last_flush = Instant::now();

        if state.needs_rotation() {
            info!("Segment capacity {} reached, rotating", state.capacity);
            let callback = self.callback();
            state.generate(callback.as_ref());
        }

        let pending = std::mem::take(&mut state.pending);
        for (id, item) in &pending {
            match state.segments.get_mut(id) {
                Some(segment) => {
                    if let Err(e) = segment.write(item) {
                        warn!("Dropping write for stream {}: {:#}", id, e);
                    }
                }
                None => debug!("No open segment for stream {}, dropping write", id),
            }
        }
        true
    }
}

/// Rotating writer for a set of streams keyed by id
///
/// All streams rotate together: when any stream's next write would exceed
/// the capacity, every segment is released and reopened under one new
/// stamp. Pushes never block; a push that races a flush is dropped.
///
/// # Thread Safety
///
/// Cloning yields another handle onto the same manager.
pub struct RotationManager<S: SegmentSink> {
    inner: Arc<Inner<S>>,
}

impl<S: SegmentSink> Clone for RotationManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SegmentSink + 'static> RotationManager<S> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                in_flight: AtomicBool::new(false),
                callback: Mutex::new(None),
            }),
        }
    }

    /// Register the segment-created callback, replacing any previous one
    pub fn set_callback(&self, callback: SegmentCallback) {
        *self
            .inner
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Open one segment per stream
    ///
    /// `capacity` is in sink units; `rate_hz` caps how often flushes write
    /// (zero disables the cap). Returns false if any stream failed to open.
    pub fn setup(&self, capacity: usize, params: BTreeMap<i32, S::Params>, rate_hz: f64) -> bool {
        let mut state = self.inner.lock_state();
        state.release_all();
        state.pending.clear();
        state.capacity = capacity;
        state.min_interval = if rate_hz > 0.0 {
            Duration::from_secs_f64(1.0 / rate_hz)
        } else {
            Duration::ZERO
        };
        state.params = params;
        state.last_flush = Instant::now();

        let callback = self.inner.callback();
        let opened = state.generate(callback.as_ref());
        state.initialized = true;
        info!(
            "Rotation manager ready: {} streams, capacity {}, rate {} Hz",
            state.params.len(),
            capacity,
            rate_hz
        );
        opened
    }

    /// Stage one item per stream and trigger an asynchronous flush
    ///
    /// Later pushes replace earlier ones for the same stream until a flush
    /// writes them. Returns false when dropped because a flush is running.
    pub fn push(&self, items: BTreeMap<i32, S::Item>) -> bool {
        if self.inner.in_flight.load(Ordering::Acquire) {
            return false;
        }
        {
            let Some(mut state) = self.inner.try_lock_state() else {
                return false;
            };
            if !state.initialized {
                return false;
            }
            state.pending.extend(items);
        }

        let inner = Arc::clone(&self.inner);
        if let Err(e) = thread::Builder::new()
            .name("segment-flush".to_string())
            .spawn(move || {
                inner.flush();
            })
        {
            warn!("Failed to spawn flush thread: {}", e);
        }
        true
    }

    /// Write staged items now, subject to the rate cap
    ///
    /// Returns true if a write cycle ran.
    pub fn flush(&self) -> bool {
        self.inner.flush()
    }

    pub fn under_writing(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock_state().initialized
    }

    /// Stamp of the current batch of segments
    pub fn current_stamp(&self) -> String {
        self.inner.lock_state().current_stamp.clone()
    }

    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.inner
            .lock_state()
            .segments
            .values()
            .map(|segment| segment.path().to_path_buf())
            .collect()
    }

    /// Wait (bounded) for an in-flight flush, then release every segment
    pub fn close(&self) -> bool {
        let idle = poll(CLOSE_POLL_ITERATIONS, CLOSE_POLL_SLEEP_MS, || {
            !self.under_writing()
        });
        let mut state = self.inner.lock_state();
        state.release_all();
        state.pending.clear();
        state.initialized = false;
        debug!("Rotation manager closed");
        idle
    }
}

impl<S: SegmentSink + 'static> Default for RotationManager<S> {
    fn default() -> Self {
        Self::new()
    }
}
