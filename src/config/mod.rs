// Configuration module for frame-recorder
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    let mut config = load_config(path)?;

    // Allow environment variables to override config values
    if let Ok(root) = std::env::var("RECORDER_OUTPUT_ROOT") {
        config.output.root = root;
    }

    if let Ok(save_as_video) = std::env::var("RECORDER_SAVE_AS_VIDEO") {
        config.output.save_as_video = matches!(
            save_as_video.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }

    if let Ok(level) = std::env::var("RECORDER_LOG_LEVEL") {
        config.logging.level = level;
    }

    Ok(config)
}
