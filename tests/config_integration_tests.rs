// Configuration system integration tests

use frame_recorder::config::{load_config, RecorderConfig};
use frame_recorder::protocol::{CompressionLevel, CompressionType};
use frame_recorder::recorder::CaptureSettings;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_load_default_config() {
    let config_path = PathBuf::from("config/default.yaml");

    if config_path.exists() {
        let result = load_config(&config_path);
        assert!(result.is_ok(), "Failed to load default config: {:?}", result.err());

        let config = result.unwrap();

        assert!(!config.output.save_as_video);
        assert_eq!(config.raw.capacity_bytes, 100_000_000);
        assert_eq!(config.raw.extension, ".dat");
        assert_eq!(config.video.max_frames, 1000);
        assert_eq!(config.codec.block_size, 1);
        assert_eq!(config.logging.level, "info");
    }
}

#[test]
fn test_config_with_env_vars() {
    let temp_config = r#"
output:
  root: ${FR_TEST_ROOT:-data/default_}
  save_as_video: true

video:
  max_frames: 50
  compression_type: ${FR_TEST_COMPRESSION:-lz4}
  compression_level: 1

codec:
  shared_buffer_size: 512
  max_payload_bytes: 256
  block_size: 2
  block_offset: 1

logging:
  level: debug
  format: text
"#;
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path().join("config.yaml");
    fs::write(&temp_path, temp_config).expect("Failed to write temp config");

    std::env::set_var("FR_TEST_ROOT", "/tmp/cam0_");
    std::env::remove_var("FR_TEST_COMPRESSION");

    let result = load_config(&temp_path);
    assert!(result.is_ok(), "Failed to load config with env vars: {:?}", result.err());

    let config = result.unwrap();
    assert_eq!(config.output.root, "/tmp/cam0_");
    assert!(config.output.save_as_video);
    assert_eq!(config.video.compression(), CompressionType::Lz4);
    assert_eq!(config.video.level(), CompressionLevel::Fast);
    // Sections left out fall back to defaults
    assert_eq!(config.raw.capacity_bytes, 100_000_000);
    assert_eq!(config.queue.max_len(), Some(256));

    let settings = CaptureSettings::from(&config);
    assert_eq!(settings.max_frames, 50);
    assert_eq!(settings.layout.size, 2);
    assert_eq!(settings.shared_buffer_size, 512);

    std::env::remove_var("FR_TEST_ROOT");
}

#[test]
fn test_config_validation() {
    let invalid_config = r#"
raw:
  capacity_bytes: 0  # INVALID: must be > 0
"#;
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path().join("invalid.yaml");
    fs::write(&temp_path, invalid_config).expect("Failed to write temp config");

    let result = load_config(&temp_path);
    assert!(result.is_err(), "Expected validation error for invalid config");
    assert!(format!("{:#}", result.unwrap_err()).contains("capacity_bytes"));
}

#[test]
fn test_unknown_compression_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path().join("bad.yaml");
    fs::write(&temp_path, "video:\n  compression_type: brotli\n").unwrap();

    let err = load_config(&temp_path).unwrap_err();
    assert!(format!("{:#}", err).contains("brotli"));
}

#[test]
fn test_config_defaults() {
    let config = RecorderConfig::default();

    assert_eq!(config.output.root, "data/capture_");
    assert_eq!(config.raw.rate_hz, 100.0);
    assert_eq!(config.video.fps, 30.0);
    assert_eq!(config.codec.shared_buffer_size, 2048);
    assert_eq!(config.codec.max_payload_bytes, 2048);
    assert_eq!(config.prebuffer.max_age_seconds, 2.0);
    assert_eq!(config.logging.format, "text");
}

#[test]
fn test_queue_section_drives_queue_shutdown() {
    let yaml = r#"
queue:
  max_length: 0
  close_iterations: 5
  close_sleep_ms: 1
"#;
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.yaml");
    fs::write(&path, yaml).unwrap();
    let config = load_config(&path).unwrap();
    assert_eq!(config.queue.max_len(), None);
    assert_eq!(config.queue.close_sleep_ms, 1);

    let sink = std::sync::Arc::new(
        frame_recorder::queue::FileRecordSink::new(temp_dir.path().join("out")).unwrap(),
    );
    let queue = frame_recorder::queue::RecordingQueue::new(sink, config.queue.max_len());
    assert!(queue.start());
    assert!(queue.close(config.queue.close_iterations, config.queue.close_sleep_ms));
}
