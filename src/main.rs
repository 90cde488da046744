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

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use frame_recorder::buffer::{BufferedPayload, RollingBuffer};
use frame_recorder::config::{load_config_with_env, LoggingConfig, RecorderConfig};
use frame_recorder::queue::{FileRecordSink, RecordingQueue};
use frame_recorder::raster::Raster;
use frame_recorder::recorder::{read_raw_frames, read_with_meta_header, CaptureRecorder, CaptureSettings};
use frame_recorder::storage::read_records;
use frame_recorder::RecordStatus;

/// Frame Recorder - record frames with embedded metadata into rotating segments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a synthetic test pattern through the capture pipeline
    Record {
        /// Number of frames to submit
        #[arg(short, long, default_value_t = 100)]
        frames: usize,

        #[arg(long, default_value_t = 320)]
        width: usize,

        #[arg(long, default_value_t = 240)]
        height: usize,

        /// Delay between frames in milliseconds
        #[arg(long, default_value_t = 33)]
        interval_ms: u64,

        /// Segment prefix (overrides config file)
        #[arg(short, long)]
        output: Option<String>,

        /// Write video segments instead of raw files
        #[arg(long)]
        video: bool,
    },

    /// Print the side channel of every frame in a video segment
    Play { path: PathBuf },

    /// Print the records of a raw segment
    Dump {
        path: PathBuf,

        /// Decode records as frames written in raw mode
        #[arg(long)]
        frames: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let level = match logging.level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = FmtSubscriber::builder().with_env_filter(filter);

    if logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Moving diagonal gradient so consecutive frames differ
fn test_pattern(width: usize, height: usize, index: usize) -> Raster {
    let mut frame = Raster::new(width, height, 3);
    for (i, pixel) in frame.data_mut().chunks_exact_mut(3).enumerate() {
        let (x, y) = (i % width, i / width);
        pixel[0] = ((x + index) % 256) as u8;
        pixel[1] = ((y + index) % 256) as u8;
        pixel[2] = ((x + y) % 256) as u8;
    }
    frame
}

fn record(
    config: &RecorderConfig,
    frames: usize,
    width: usize,
    height: usize,
    interval: Duration,
) -> Result<()> {
    let recorder = CaptureRecorder::new(CaptureSettings::from(config));
    recorder.initialize(&config.output.root, config.output.save_as_video)?;

    let prebuffer = config.prebuffer.enabled.then(RollingBuffer::<BufferedPayload>::new);
    let started = Instant::now();
    let (mut accepted, mut busy) = (0usize, 0usize);

    for index in 0..frames {
        let frame = test_pattern(width, height, index);
        let timestamp = started.elapsed().as_secs_f64();
        let side_channel = format!("frame={} ", index);

        match recorder.record(&frame, timestamp, side_channel.as_bytes()) {
            RecordStatus::Ok => accepted += 1,
            RecordStatus::Busy => busy += 1,
            RecordStatus::Error => warn!("Frame {} rejected", index),
        }

        if let Some(prebuffer) = &prebuffer {
            prebuffer.clean(timestamp, config.prebuffer.max_age_seconds);
            prebuffer.add_forceexpand(
                timestamp,
                BufferedPayload::Frame {
                    image: frame,
                    message: side_channel.into_bytes(),
                },
            );
        }
        std::thread::sleep(interval);
    }

    recorder.close();
    info!(
        "Recorded {} frames ({} busy), last segment {}",
        accepted,
        busy,
        recorder.current_segment_name()
    );

    if let Some(prebuffer) = prebuffer {
        let sink = Arc::new(FileRecordSink::new(&config.prebuffer.output_dir)?);
        let queue = RecordingQueue::new(sink, config.queue.max_len());
        queue.set_save_boost(config.queue.save_boost, config.queue.max_writer_threads);
        queue.start();
        let blocks = prebuffer.get_recent_blocks(config.prebuffer.handoff_blocks);
        let entries: usize = blocks.iter().map(|block| block.len()).sum();
        queue.push_blocks(blocks);
        if queue.close(config.queue.close_iterations, config.queue.close_sleep_ms) {
            info!(
                "Wrote {} pre-event frames to {}",
                entries, config.prebuffer.output_dir
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut recorder_config = if args.config.exists() {
        load_config_with_env(&args.config)?
    } else {
        RecorderConfig::default()
    };

    init_tracing(&recorder_config.logging)?;
    info!("Starting Frame Recorder");
    info!("Configuration: {:?}", args.config);

    match args.command {
        Command::Record {
            frames,
            width,
            height,
            interval_ms,
            output,
            video,
        } => {
            // Apply CLI overrides
            if let Some(output) = output {
                recorder_config.output.root = output;
            }
            if video {
                recorder_config.output.save_as_video = true;
            }
            record(
                &recorder_config,
                frames,
                width,
                height,
                Duration::from_millis(interval_ms),
            )?;
        }
        Command::Play { path } => {
            let mut print_frame = |image: &Raster, message: &[u8]| {
                println!(
                    "{}x{} {}",
                    image.width(),
                    image.height(),
                    String::from_utf8_lossy(message)
                );
                true
            };
            let frames = read_with_meta_header(&path, &mut print_frame)?;
            info!("Played {} frames from {}", frames, path.display());
        }
        Command::Dump { path, frames } => {
            if frames {
                let mut print_frame = |image: &Raster, message: &[u8]| {
                    let line = serde_json::json!({
                        "width": image.width(),
                        "height": image.height(),
                        "channels": image.channels(),
                        "message": String::from_utf8_lossy(message),
                    });
                    println!("{}", line);
                    true
                };
                read_raw_frames(&path, &mut print_frame)?;
            } else {
                for (i, record) in read_records(&path)?.iter().enumerate() {
                    println!("{:>6} {:>10} bytes", i, record.len());
                }
            }
        }
    }

    Ok(())
}
