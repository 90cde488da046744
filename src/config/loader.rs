// Configuration loader with environment variable substitution

use super::types::*;
use crate::protocol::CompressionType;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        let content = Self::substitute_env_vars(&content)?;

        let config: RecorderConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${OUTPUT_ROOT:-data/cam0_} -> data/cam0_ (if OUTPUT_ROOT not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string())
    }

    /// Validate configuration
    pub fn validate(config: &RecorderConfig) -> Result<()> {
        if config.output.root.is_empty() {
            bail!("output.root cannot be empty");
        }

        if config.raw.capacity_bytes == 0 {
            bail!("raw.capacity_bytes must be > 0");
        }

        if config.raw.rate_hz <= 0.0 {
            bail!("raw.rate_hz must be > 0");
        }

        if config.video.max_frames == 0 {
            bail!("video.max_frames must be > 0");
        }

        if config.video.fps <= 0.0 || config.video.rate_hz <= 0.0 {
            bail!("video.fps and video.rate_hz must be > 0");
        }

        if config.video.source_scale <= 0.0 {
            bail!("video.source_scale must be > 0");
        }

        if CompressionType::parse(&config.video.compression_type).is_none() {
            bail!(
                "Unknown compression type: '{}'. Supported: none, lz4, zstd",
                config.video.compression_type
            );
        }

        if config.video.compression_level > 4 {
            bail!("video.compression_level must be 0-4");
        }

        if config.codec.block_size == 0 {
            bail!("codec.block_size must be > 0");
        }

        if config.codec.shared_buffer_size < config.codec.max_payload_bytes {
            bail!("codec.shared_buffer_size must be >= codec.max_payload_bytes");
        }

        if config.queue.save_boost && config.queue.max_writer_threads == 0 {
            bail!("queue.max_writer_threads must be > 0 when save_boost is enabled");
        }

        if config.prebuffer.enabled && config.prebuffer.max_age_seconds <= 0.0 {
            bail!("prebuffer.max_age_seconds must be > 0");
        }

        Ok(())
    }
}
