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
use frame_recorder::buffer::{BufferedPayload, RollingBuffer};
use frame_recorder::payload::PayloadContainer;
use frame_recorder::queue::{FileRecordSink, RecordSink, RecordingQueue};
use frame_recorder::raster::Raster;
use frame_recorder::FrameRecord;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Sink that remembers what it was asked to write
#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<Vec<u8>>>,
    buffered: Mutex<Vec<f64>>,
}

impl RecordSink for CollectingSink {
    fn write_record(&self, record: &PayloadContainer) -> Result<()> {
        self.records.lock().unwrap().push(record.as_slice().to_vec());
        Ok(())
    }

    fn write_buffered(&self, timestamp: f64, _payload: &BufferedPayload) -> Result<()> {
        self.buffered.lock().unwrap().push(timestamp);
        Ok(())
    }
}

#[test]
fn test_full_queue_drops_without_blocking() {
    let sink = Arc::new(CollectingSink::default());
    let queue = RecordingQueue::new(sink.clone(), Some(2));

    // Worker not started, so nothing drains
    assert!(queue.push(PayloadContainer::copied(b"a")));
    assert!(queue.push(PayloadContainer::copied(b"b")));
    assert!(!queue.push(PayloadContainer::copied(b"c")));
    assert_eq!(queue.size_about(), 2);

    assert!(queue.start());
    assert!(queue.close(100, 10));
    assert_eq!(*sink.records.lock().unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn test_unbounded_queue_preserves_order() {
    let sink = Arc::new(CollectingSink::default());
    let queue = RecordingQueue::new(sink.clone(), None);
    queue.start();

    for i in 0..50u8 {
        assert!(queue.push(PayloadContainer::copied(&[i])));
    }
    assert!(queue.close(200, 10));
    assert!(!queue.is_running());

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 50);
    assert!(records.iter().enumerate().all(|(i, r)| r == &vec![i as u8]));
}

#[test]
fn test_empty_containers_are_skipped() {
    let sink = Arc::new(CollectingSink::default());
    let queue = RecordingQueue::new(sink.clone(), Some(8));
    queue.start();

    queue.push(PayloadContainer::new());
    queue.push(PayloadContainer::copied(b"kept"));
    assert!(queue.close(100, 10));
    assert_eq!(sink.records.lock().unwrap().len(), 1);
}

#[test]
fn test_file_sink_writes_tagged_records() {
    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(FileRecordSink::new(temp_dir.path().join("records")).unwrap());
    let queue = RecordingQueue::new(sink, Some(16));
    queue.start();

    queue.push(PayloadContainer::copied(b"left").with_tag("left.bin"));
    queue.push(PayloadContainer::borrowed(bytes::Bytes::from_static(b"right")).with_tag("right.bin"));
    assert!(queue.close(100, 10));

    let dir = temp_dir.path().join("records");
    assert_eq!(std::fs::read(dir.join("left.bin")).unwrap(), b"left");
    assert_eq!(std::fs::read(dir.join("right.bin")).unwrap(), b"right");
}

#[test]
fn test_blocks_are_written_oldest_first() {
    let buffer = RollingBuffer::<BufferedPayload>::new();
    for i in 0..25u8 {
        buffer.add_forceexpand(i as f64, BufferedPayload::Record(vec![i].into()));
    }

    let sink = Arc::new(CollectingSink::default());
    let queue = RecordingQueue::new(sink.clone(), Some(4));
    assert!(queue.push_blocks(buffer.get_recent_blocks(2)));
    assert_eq!(queue.size_about_blocks(), 15);

    queue.start();
    assert!(queue.close(100, 10));
    assert_eq!(queue.size_about_blocks(), 0);

    let expected: Vec<f64> = (10..25).map(|i| i as f64).collect();
    assert_eq!(*sink.buffered.lock().unwrap(), expected);
}

#[test]
fn test_file_sink_writes_buffered_frames() {
    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(FileRecordSink::new(temp_dir.path()).unwrap());
    let queue = RecordingQueue::new(sink, None);
    queue.start();

    let buffer = RollingBuffer::<BufferedPayload>::new();
    let image = Raster::new(4, 2, 3);
    buffer.add(
        1.5,
        BufferedPayload::Frame {
            image: image.clone(),
            message: b"gps 1 2".to_vec(),
        },
    );
    queue.push_blocks(buffer.get_recent_blocks(1));
    assert!(queue.close(100, 10));

    let bytes = std::fs::read(temp_dir.path().join("1.500000.frame")).unwrap();
    let record = FrameRecord::from_bytes(&bytes).unwrap();
    assert_eq!(record.image, image);
    assert_eq!(record.message, b"gps 1 2");
}

#[test]
fn test_save_boost_writes_everything() {
    let sink = Arc::new(CollectingSink::default());
    let queue = RecordingQueue::new(sink.clone(), None);
    queue.set_save_boost(true, 3);
    queue.start();

    for i in 0..40u8 {
        queue.push(PayloadContainer::copied(&[i]));
    }
    assert!(queue.close(200, 10));

    let mut records = sink.records.lock().unwrap().clone();
    records.sort();
    let expected: Vec<Vec<u8>> = (0..40u8).map(|i| vec![i]).collect();
    assert_eq!(records, expected);
}

#[test]
fn test_restart_after_stop() {
    let sink = Arc::new(CollectingSink::default());
    let queue = RecordingQueue::new(sink.clone(), None);
    assert!(queue.start());
    assert!(!queue.start());
    assert!(queue.close(100, 10));

    assert!(queue.start());
    queue.push(PayloadContainer::copied(b"again"));
    std::thread::sleep(Duration::from_millis(50));
    assert!(queue.close(100, 10));
    assert_eq!(sink.records.lock().unwrap().len(), 1);
}
