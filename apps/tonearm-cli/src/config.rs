//! CLI configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tonearm_core::{Config, EncoderKind};

/// CLI configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Destination channel the local session joins.
    /// Override: `TONEARM_CHANNEL`
    pub channel: String,

    /// Directory receiving one raw frame dump per group.
    /// Frames are discarded when unset.
    /// Override: `TONEARM_OUTPUT_DIR`
    pub output_dir: Option<PathBuf>,

    /// Exit once the queue has drained instead of waiting for Ctrl+C.
    pub exit_when_idle: bool,

    /// Engine settings, passed through to tonearm-core.
    pub engine: Config,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            channel: "local".to_string(),
            output_dir: None,
            exit_when_idle: false,
            engine: Config::default(),
        }
    }
}

impl CliConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TONEARM_CHANNEL") {
            if !val.trim().is_empty() {
                self.channel = val;
            }
        }

        if let Ok(val) = std::env::var("TONEARM_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("TONEARM_ENCODER") {
            match parse_encoder(&val) {
                Some(kind) => self.engine.player.encoder = kind,
                None => log::warn!("[Config] Ignoring unknown TONEARM_ENCODER={}", val),
            }
        }

        if let Ok(val) = std::env::var("TONEARM_PRIMARY_HOSTS") {
            self.engine.resolver.primary_hosts = parse_host_list(&val);
        }

        if let Ok(val) = std::env::var("TONEARM_MAX_DOWNLOADS") {
            if let Ok(max) = val.parse() {
                self.engine.download.max_concurrent_downloads = max;
            }
        }

        // Note: TONEARM_CACHE_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to tonearm-core's Config type.
    pub fn to_core_config(&self) -> Config {
        self.engine.clone()
    }
}

fn parse_encoder(value: &str) -> Option<EncoderKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pcm" => Some(EncoderKind::Pcm),
        "opus" => Some(EncoderKind::Opus),
        _ => None,
    }
}

fn parse_host_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}
