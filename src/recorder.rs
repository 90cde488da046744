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

// Single-flight capture pipeline: scale, embed, rotate

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use tracing::{debug, info, warn};

use crate::codec::{self, BlockLayout, CodecError, Cursor};
use crate::config::RecorderConfig;
use crate::protocol::{
    CompressionLevel, CompressionType, FrameRecord, MetaHeader, RecordStatus, RecorderState,
};
use crate::queue::poll;
use crate::raster::Raster;
use crate::storage::{read_records, RawRecorder, RotationManager, VideoParams, VideoReader, VideoSegment};

/// Layout of the meta header inside the first frame of a video segment
pub const META_LAYOUT: BlockLayout = BlockLayout { size: 1, offset: 1 };

const META_MAX_LEN: usize = 256;
const VIDEO_STREAM: i32 = 0;
const CLOSE_POLL_ITERATIONS: usize = 300;
const CLOSE_POLL_SLEEP_MS: u64 = 10;

/// Tunables of the capture pipeline
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub shared_buffer_size: usize,
    pub max_payload_bytes: usize,
    pub layout: BlockLayout,
    pub source_scale: f64,
    pub max_frames: usize,
    pub fps: f64,
    /// Zero writes every pushed frame without rate limiting
    pub video_rate_hz: f64,
    pub video_extension: String,
    pub compression: CompressionType,
    pub compression_level: CompressionLevel,
    pub raw_capacity_bytes: usize,
    pub raw_rate_hz: f64,
    pub raw_extension: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from(&RecorderConfig::default())
    }
}

impl From<&RecorderConfig> for CaptureSettings {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            shared_buffer_size: config.codec.shared_buffer_size,
            max_payload_bytes: config.codec.max_payload_bytes,
            layout: config.codec.layout(),
            source_scale: config.video.source_scale,
            max_frames: config.video.max_frames,
            fps: config.video.fps,
            video_rate_hz: config.video.rate_hz,
            video_extension: config.video.extension.clone(),
            compression: config.video.compression(),
            compression_level: config.video.level(),
            raw_capacity_bytes: config.raw.capacity_bytes,
            raw_rate_hz: config.raw.rate_hz,
            raw_extension: config.raw.extension.clone(),
        }
    }
}

/// Receives decoded frames during playback. Return false to stop.
pub trait PlaybackHandler {
    fn on_frame(&mut self, image: &Raster, message: &[u8]) -> bool;
}

impl<F> PlaybackHandler for F
where
    F: FnMut(&Raster, &[u8]) -> bool,
{
    fn on_frame(&mut self, image: &Raster, message: &[u8]) -> bool {
        self(image, message)
    }
}

struct Inner {
    settings: RwLock<CaptureSettings>,
    initialized: AtomicBool,
    closed: AtomicBool,
    save_as_video: AtomicBool,
    ready: AtomicBool,
    video_ready: AtomicBool,
    root: Mutex<PathBuf>,
    first_frame: Mutex<Option<(usize, usize)>>,
    video_size: Mutex<Option<(usize, usize)>>,
    canvas: Mutex<Option<Raster>>,
    segment_name: Arc<Mutex<String>>,
    video: RotationManager<VideoSegment>,
    raw: RawRecorder,
}

impl Inner {
    fn settings(&self) -> CaptureSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn root(&self) -> PathBuf {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Side channel followed by a textual capture time
    fn compose_message(settings: &CaptureSettings, timestamp: f64, side_channel: &[u8]) -> Vec<u8> {
        let stamp = format!(
            "{} {:.6}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            timestamp
        );
        let mut message = Vec::with_capacity(side_channel.len() + stamp.len());
        message.extend_from_slice(side_channel);
        message.extend_from_slice(stamp.as_bytes());
        message.truncate(settings.shared_buffer_size.min(settings.max_payload_bytes));
        message
    }

    fn process(&self, image: Raster, timestamp: f64, side_channel: Vec<u8>) {
        let settings = self.settings();
        let scaled = image.scale(settings.source_scale);
        let message = Self::compose_message(&settings, timestamp, &side_channel);

        if self.save_as_video.load(Ordering::Acquire) {
            if let Err(e) = self.record_video(&settings, scaled, &message) {
                warn!("Dropping video frame: {:#}", e);
            }
        } else {
            let record = FrameRecord {
                encoded: false,
                image: scaled,
                message,
            };
            if !self.raw.record(&record.to_bytes()) {
                debug!("Raw segment busy, frame dropped");
            }
        }
    }

    fn record_video(&self, settings: &CaptureSettings, scaled: Raster, message: &[u8]) -> Result<()> {
        let layout = settings.layout;
        // Every frame of a segment shares the first frame's size so the
        // embedded side channel stays on the block grid
        let scaled = {
            let mut size = self.video_size.lock().unwrap_or_else(PoisonError::into_inner);
            let (width, height) = *size.get_or_insert(scaled.dimensions());
            if scaled.dimensions() == (width, height) {
                scaled
            } else {
                debug!(
                    "Resizing frame {:?} to segment size {}x{}",
                    scaled.dimensions(),
                    width,
                    height
                );
                scaled.resize(width, height)
            }
        };
        let frame = {
            let mut slot = self.canvas.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|canvas| canvas.width() != scaled.width()) {
                *slot = None;
            }
            let canvas = slot.get_or_insert_with(|| {
                codec::estimate_canvas(
                    scaled.width(),
                    settings.max_payload_bytes,
                    layout.size,
                    layout.offset,
                )
            });
            canvas.clear();
            let mut cursor = Cursor::origin(layout);
            codec::encode(message, canvas, &mut cursor, layout);
            scaled.stack_below(canvas)?
        };

        if !self.video_ready.load(Ordering::Acquire) {
            let meta = MetaHeader {
                shared_buffer_size: settings.shared_buffer_size,
                max_payload_bytes: settings.max_payload_bytes,
                block_size: layout.size,
                block_offset: layout.offset,
                frame_width: scaled.width(),
                frame_height: scaled.height(),
            };
            let mut meta_frame = Raster::new(frame.width(), frame.height(), frame.channels());
            let mut cursor = Cursor::default();
            codec::merge_strings(&[meta.to_string()], &mut meta_frame, &mut cursor, META_LAYOUT);
            info!("Video meta header: {}", meta);

            let mut params = VideoParams::new(
                self.root(),
                frame.width(),
                frame.height(),
                frame.channels(),
            );
            params.extension = settings.video_extension.clone();
            params.fps = settings.fps;
            params.compression = settings.compression;
            params.level = settings.compression_level;
            params.meta_frame = Some(Arc::new(meta_frame));

            let streams = BTreeMap::from([(VIDEO_STREAM, params)]);
            if !self
                .video
                .setup(settings.max_frames, streams, settings.video_rate_hz)
            {
                warn!("Video segment could not be opened, frames will be dropped");
            }
            self.video_ready.store(true, Ordering::Release);
        }

        if !self
            .video
            .push(BTreeMap::from([(VIDEO_STREAM, Arc::new(frame))]))
        {
            debug!("Video segment busy, frame dropped");
        }
        Ok(())
    }
}

/// Capture orchestrator
///
/// Accepts one frame at a time: while the previous frame is still being
/// scaled, embedded and handed to the segment writer, further frames get
/// [`RecordStatus::Busy`].
///
/// # Examples
///
/// ```no_run
/// use frame_recorder::raster::Raster;
/// use frame_recorder::recorder::{CaptureRecorder, CaptureSettings};
///
/// let recorder = CaptureRecorder::new(CaptureSettings::default());
/// recorder.initialize("data/capture_", true).unwrap();
/// let frame = Raster::new(320, 240, 3);
/// recorder.record(&frame, 0.0, b"speed=1.2");
/// recorder.close();
/// ```
pub struct CaptureRecorder {
    inner: Arc<Inner>,
}

impl CaptureRecorder {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: RwLock::new(settings),
                initialized: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                save_as_video: AtomicBool::new(false),
                ready: AtomicBool::new(true),
                video_ready: AtomicBool::new(false),
                root: Mutex::new(PathBuf::new()),
                first_frame: Mutex::new(None),
                video_size: Mutex::new(None),
                canvas: Mutex::new(None),
                segment_name: Arc::new(Mutex::new(String::new())),
                video: RotationManager::new(),
                raw: RawRecorder::new(),
            }),
        }
    }

    pub fn settings(&self) -> CaptureSettings {
        self.inner.settings()
    }

    pub fn set_source_scale(&self, scale: f64) {
        self.inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .source_scale = scale;
    }

    /// Prepare recording under the segment prefix `path_root`
    ///
    /// Raw mode opens its first segment immediately; video mode waits for the
    /// first frame to learn the frame size.
    pub fn initialize(&self, path_root: impl Into<PathBuf>, save_as_video: bool) -> Result<()> {
        let root = path_root.into();
        if let Some(parent) = root.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }

        let segment_name = Arc::clone(&self.inner.segment_name);
        let callback: crate::storage::SegmentCallback = Arc::new(move |stamp: &str| {
            info!("New segment: {}", stamp);
            *segment_name.lock().unwrap_or_else(PoisonError::into_inner) = stamp.to_string();
        });
        self.inner.video.set_callback(Arc::clone(&callback));
        self.inner.raw.set_callback(callback);

        *self.inner.root.lock().unwrap_or_else(PoisonError::into_inner) = root.clone();
        self.inner
            .save_as_video
            .store(save_as_video, Ordering::Release);
        self.inner.video_ready.store(false, Ordering::Release);
        *self.inner.video_size.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self.inner.canvas.lock().unwrap_or_else(PoisonError::into_inner) = None;

        if !save_as_video {
            let settings = self.inner.settings();
            if !self.inner.raw.setup(
                root.clone(),
                &settings.raw_extension,
                settings.raw_capacity_bytes,
                settings.raw_rate_hz,
            ) {
                warn!("Raw segment could not be opened under {}", root.display());
            }
        }

        self.inner.ready.store(true, Ordering::Release);
        self.inner.closed.store(false, Ordering::Release);
        self.inner.initialized.store(true, Ordering::Release);
        info!(
            "Capture recorder initialized at {} ({} mode)",
            root.display(),
            if save_as_video { "video" } else { "raw" }
        );
        Ok(())
    }

    /// Submit one frame with its side-channel bytes
    pub fn record(&self, image: &Raster, timestamp: f64, side_channel: &[u8]) -> RecordStatus {
        if !self.inner.initialized.load(Ordering::Acquire) {
            return RecordStatus::Error;
        }
        {
            let mut first = self
                .inner
                .first_frame
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let size = *first.get_or_insert(image.dimensions());
            if size != image.dimensions() {
                warn!(
                    "Frame size {:?} differs from first frame {:?}",
                    image.dimensions(),
                    size
                );
                return RecordStatus::Error;
            }
        }
        if self
            .inner
            .ready
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return RecordStatus::Busy;
        }

        let inner = Arc::clone(&self.inner);
        let image = image.clone();
        let side_channel = side_channel.to_vec();
        let spawned = thread::Builder::new()
            .name("capture-record".to_string())
            .spawn(move || {
                inner.process(image, timestamp, side_channel);
                inner.ready.store(true, Ordering::Release);
            });
        match spawned {
            Ok(_) => RecordStatus::Ok,
            Err(e) => {
                warn!("Failed to spawn capture thread: {}", e);
                self.inner.ready.store(true, Ordering::Release);
                RecordStatus::Error
            }
        }
    }

    /// Poll until the in-flight frame and its segment write are done
    pub fn wait_idle(&self, iterations: usize, sleep_ms: u64) -> bool {
        poll(iterations, sleep_ms, || {
            self.inner.ready.load(Ordering::Acquire)
                && !self.inner.video.under_writing()
                && !self.inner.raw.manager().under_writing()
        })
    }

    /// Forget the first frame size so a different size is accepted
    pub fn reset(&self) {
        *self
            .inner
            .first_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        *self.inner.canvas.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Stamp of the most recently created segment
    pub fn current_segment_name(&self) -> String {
        self.inner
            .segment_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn state(&self) -> RecorderState {
        if self.inner.closed.load(Ordering::Acquire) {
            RecorderState::Closed
        } else if !self.is_initialized() {
            RecorderState::Uninitialized
        } else if !self.inner.ready.load(Ordering::Acquire) {
            RecorderState::Recording
        } else {
            RecorderState::Ready
        }
    }

    /// Wait (bounded) for the in-flight frame, then close all segments
    pub fn close(&self) -> bool {
        let idle = poll(CLOSE_POLL_ITERATIONS, CLOSE_POLL_SLEEP_MS, || {
            self.inner.ready.load(Ordering::Acquire)
        });
        self.inner.initialized.store(false, Ordering::Release);
        let video_closed = self.inner.video.close();
        let raw_closed = self.inner.raw.close();
        self.inner.closed.store(true, Ordering::Release);
        info!("Capture recorder closed");
        idle && video_closed && raw_closed
    }
}

impl Drop for CaptureRecorder {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.close();
        }
    }
}

/// Play back a video segment written in video mode
///
/// The first frame carries the [`MetaHeader`]; every following frame is split
/// into the source image and its decoded side channel. Returns the number of
/// frames handed to `handler`.
pub fn read_with_meta_header<P, H>(path: P, handler: &mut H) -> Result<usize>
where
    P: AsRef<Path>,
    H: PlaybackHandler + ?Sized,
{
    let mut reader = VideoReader::open(path)?;
    let Some(meta_frame) = reader.next_frame()? else {
        return Ok(0);
    };
    let mut cursor = Cursor::default();
    let text = codec::decode_string(&meta_frame, &mut cursor, META_LAYOUT, META_MAX_LEN)
        .context("Meta frame carries no header")?;
    let meta: MetaHeader = text.parse()?;
    if meta.block_size == 0 || meta.frame_height > meta_frame.height() {
        return Err(CodecError::MalformedMeta(format!(
            "header {} does not fit a {}x{} frame",
            meta,
            meta_frame.width(),
            meta_frame.height()
        ))
        .into());
    }
    debug!("Playing back with meta header {}", meta);

    let layout = BlockLayout::new(meta.block_size, meta.block_offset);
    let mut delivered = 0;
    while let Some(frame) = reader.next_frame()? {
        let image = frame.crop_rows(0, meta.frame_height);
        let data = frame.crop_rows(meta.frame_height, frame.height());
        let mut cursor = Cursor::origin(layout);
        let message = codec::decode_to_vec(&data, &mut cursor, layout, meta.shared_buffer_size)
            .unwrap_or_default();
        delivered += 1;
        if !handler.on_frame(&image, &message) {
            break;
        }
    }
    Ok(delivered)
}

/// Play back a raw segment written in raw mode
pub fn read_raw_frames<P, H>(path: P, handler: &mut H) -> Result<usize>
where
    P: AsRef<Path>,
    H: PlaybackHandler + ?Sized,
{
    let mut delivered = 0;
    for record in read_records(path)? {
        let frame = FrameRecord::from_bytes(&record)?;
        delivered += 1;
        if !handler.on_frame(&frame.image, &frame.message) {
            break;
        }
    }
    Ok(delivered)
}
