//! Core configuration types.
//!
//! [`Config`] groups every tunable the engine reads. All fields have sensible
//! defaults; front ends load it from their own storage (the CLI uses YAML) and
//! call [`Config::validate`] before bootstrapping.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::SEEK_ACK_TIMEOUT_SECS;

/// Output codec used for frames handed to the transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Raw 16-bit little-endian interleaved PCM frames.
    #[default]
    Pcm,
    /// Opus packets at the target bitrate (requires the `opus` feature).
    Opus,
}

/// Configuration for session behavior.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PlayerConfig {
    /// Number of played tracks remembered for autoplay deduplication.
    pub history_size: usize,

    /// Minimum interval between two status commits (milliseconds).
    pub status_debounce_ms: u64,

    /// Backoff before retrying a failed status commit (milliseconds).
    pub status_retry_backoff_ms: u64,

    /// Maximum status text length in characters (markers included).
    pub status_max_chars: usize,

    /// Frames buffered between the transcoder and the transport.
    /// 50 frames of 20ms ≈ 1 second of audio.
    pub frame_buffer_frames: usize,

    /// How long a seek waits for the transcoder to acknowledge (seconds).
    pub seek_timeout_secs: u64,

    /// Output codec.
    pub encoder: EncoderKind,
}

impl PlayerConfig {
    pub fn status_debounce(&self) -> Duration {
        Duration::from_millis(self.status_debounce_ms)
    }

    pub fn status_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.status_retry_backoff_ms)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_secs(self.seek_timeout_secs)
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            history_size: 50,
            status_debounce_ms: 500,
            status_retry_backoff_ms: 1000,
            status_max_chars: 100,
            frame_buffer_frames: 50,
            seek_timeout_secs: SEEK_ACK_TIMEOUT_SECS,
            encoder: EncoderKind::Pcm,
        }
    }
}

/// Configuration for the cache-backed downloader.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    /// Directory holding cached and partial audio files.
    pub cache_dir: PathBuf,

    /// Maximum simultaneous downloads across all sessions.
    pub max_concurrent_downloads: usize,

    /// Wipe the cache directory when the engine starts.
    pub purge_on_start: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("tonearm-cache"),
            max_concurrent_downloads: 3,
            purge_on_start: true,
        }
    }
}

/// URL heuristics for pages whose audio is likely protected.
///
/// Kept as data so deployments can extend it without touching the resolver.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RestrictedPatterns {
    /// Leading host labels typical of streaming web players (e.g. `open`).
    pub subdomain_prefixes: Vec<String>,
    /// Path segments that identify a catalog item on such players (e.g. `track`).
    pub path_segments: Vec<String>,
}

impl Default for RestrictedPatterns {
    fn default() -> Self {
        Self {
            subdomain_prefixes: ["open", "listen", "play", "embed"]
                .into_iter()
                .map(String::from)
                .collect(),
            path_segments: ["track", "album", "song", "playlist", "episode"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Configuration for the source resolver.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ResolverConfig {
    /// Hosts whose links are playable as-is (pass-through).
    pub primary_hosts: Vec<String>,

    /// Restricted-content heuristics.
    pub restricted: RestrictedPatterns,

    /// Metadata extractor deadline for ordinary pages (milliseconds).
    pub metadata_timeout_ms: u64,

    /// Metadata extractor deadline for suspected-restricted pages (milliseconds).
    pub restricted_metadata_timeout_ms: u64,

    /// Page scraper deadline (milliseconds).
    pub scrape_timeout_ms: u64,

    /// Search deadline per provider (milliseconds).
    pub search_timeout_ms: u64,

    /// Maximum candidates requested from each search provider.
    pub candidates_per_provider: usize,
}

impl ResolverConfig {
    pub fn metadata_timeout(&self, suspected_restricted: bool) -> Duration {
        if suspected_restricted {
            Duration::from_millis(self.restricted_metadata_timeout_ms)
        } else {
            Duration::from_millis(self.metadata_timeout_ms)
        }
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            primary_hosts: ["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"]
                .into_iter()
                .map(String::from)
                .collect(),
            restricted: RestrictedPatterns::default(),
            metadata_timeout_ms: 15_000,
            restricted_metadata_timeout_ms: 3_000,
            scrape_timeout_ms: 6_000,
            search_timeout_ms: 10_000,
            candidates_per_provider: 5,
        }
    }
}

/// Configuration for the Tonearm engine.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Session behavior.
    pub player: PlayerConfig,

    /// Downloader and cache.
    pub download: DownloadConfig,

    /// Source resolution.
    pub resolver: ResolverConfig,
}

impl Config {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first value that would cause runtime issues.
    pub fn validate(&self) -> Result<(), String> {
        if self.download.max_concurrent_downloads == 0 {
            return Err("download.max_concurrent_downloads must be >= 1".to_string());
        }
        if self.player.frame_buffer_frames == 0 {
            return Err(
                "player.frame_buffer_frames must be >= 1 (mpsc::channel panics on 0)".to_string(),
            );
        }
        if self.player.history_size == 0 {
            return Err("player.history_size must be >= 1".to_string());
        }
        // Room for both markers plus a visible fragment on each side of the ellipsis.
        if self.player.status_max_chars < 16 {
            return Err("player.status_max_chars must be >= 16".to_string());
        }
        if self.resolver.candidates_per_provider == 0 {
            return Err("resolver.candidates_per_provider must be >= 1".to_string());
        }
        if self.player.encoder == EncoderKind::Opus && !cfg!(feature = "opus") {
            return Err("player.encoder = opus requires the `opus` feature".to_string());
        }
        Ok(())
    }
}
