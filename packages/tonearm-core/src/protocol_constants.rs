//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the output frame profile the transport expects
//! and changing them would break frame timing downstream.

// ─────────────────────────────────────────────────────────────────────────────
// Output Frame Profile
// ─────────────────────────────────────────────────────────────────────────────

/// Output sample rate (Hz).
///
/// Every timestamp after the FIFO stage is expressed in units of this rate.
pub const OUTPUT_SAMPLE_RATE: u32 = 48000;

/// Output channel count (interleaved stereo).
pub const OUTPUT_CHANNELS: usize = 2;

/// Duration of one output frame in milliseconds.
pub const FRAME_DURATION_MS: u32 = 20;

/// Samples per channel in one output frame (20ms at 48kHz).
pub const FRAME_SAMPLES: usize = 960;

/// Target encoder bitrate (bits per second).
pub const TARGET_BITRATE: i32 = 192_000;

/// Maximum encoded frame size in bytes.
///
/// Large enough for a PCM frame (960 * 2 channels * 2 bytes) and any Opus packet.
pub const MAX_ENCODED_FRAME_BYTES: usize = 4000;

// ─────────────────────────────────────────────────────────────────────────────
// Transcoder
// ─────────────────────────────────────────────────────────────────────────────

/// How long a seek caller waits for the transcode loop to pick up a request (seconds).
pub const SEEK_ACK_TIMEOUT_SECS: u64 = 5;

/// FIFO capacity in frames (per channel samples = frames * FRAME_SAMPLES).
///
/// Large enough to hold one decoded packet of any common codec after resampling.
pub const FIFO_CAPACITY_FRAMES: usize = 16;

/// Lower bound of the nearing-end window (seconds).
pub const NEARING_END_MIN_SECS: u64 = 7;

/// Upper bound of the nearing-end window (seconds).
pub const NEARING_END_MAX_SECS: u64 = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Similarity
// ─────────────────────────────────────────────────────────────────────────────

/// Weighted Jaccard score at or above which two titles count as the same song.
pub const SIMILARITY_THRESHOLD: f64 = 0.70;

// ─────────────────────────────────────────────────────────────────────────────
// Status Markers
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix shown while a track is playing.
pub const STATUS_NOW_PLAYING: &str = "▶ ";

/// Prefix shown when announcing the next track near the end of the current one.
pub const STATUS_UP_NEXT: &str = "⏭ ";

/// Prefix shown while the head of the queue is still resolving.
pub const STATUS_RESOLVING: &str = "⏳ ";

/// Suffix appended while playback is paused for lack of listeners.
pub const STATUS_PAUSED_SUFFIX: &str = " ⏸";

// ─────────────────────────────────────────────────────────────────────────────
// Channels & Application
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the broadcast channel for domain events.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Extension used for finalized cache files.
pub const CACHE_FILE_EXTENSION: &str = "audio";

/// Application name used in logs and the CLI banner.
pub const APP_NAME: &str = "Tonearm";
