//! Centralized error types for the Tonearm core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types per pipeline stage using `thiserror`
//! - Keeps cancellation distinct from failure at every layer
//! - Maps every error to a stable machine-readable code via [`ErrorCode`]

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths (front end replies, logs, events).
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while turning a reference into a playable source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    /// The query matched nothing usable.
    #[error("No results for: {0}")]
    NoResults(String),

    /// The query was too vague to pick a candidate.
    #[error("Ambiguous query: {0}")]
    AmbiguousQuery(String),

    /// The page is protected content whose audio cannot be extracted.
    ///
    /// Terminal: the same reference is never retried.
    #[error("Restricted content: {0}")]
    Restricted(String),

    /// No related track survived history filtering.
    #[error("No recommendation available")]
    NoRecommendation,

    /// The reference could not be parsed.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// A provider call failed.
    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    /// A provider call exceeded its deadline.
    #[error("{0} timed out after {1:?}")]
    Timeout(String, Duration),

    /// Resolution was cancelled.
    #[error("Resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Returns true if retrying the same reference can never succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Restricted(_) | Self::InvalidReference(_) | Self::AmbiguousQuery(_)
        )
    }

    pub(crate) fn provider(provider: &str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

impl ErrorCode for ResolveError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoResults(_) => "no_results",
            Self::AmbiguousQuery(_) => "ambiguous_query",
            Self::Restricted(_) => "restricted_content",
            Self::NoRecommendation => "no_recommendation",
            Self::InvalidReference(_) => "invalid_reference",
            Self::Provider { .. } => "provider_failed",
            Self::Timeout(_, _) => "provider_timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors reported by external search/metadata/scrape collaborators.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The source is protected and the extractor refused it.
    #[error("restricted: {0}")]
    Restricted(String),

    /// The provider returned nothing usable.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport or parse failure inside the provider.
    #[error("{0}")]
    Failed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Download
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while materializing a track into the cache.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DownloadError {
    /// Resolution failed before any bytes were fetched.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The byte stream failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Writing or renaming the cache file failed.
    #[error("Disk error: {0}")]
    Io(String),

    /// The track was cancelled before it became ready.
    #[error("Download cancelled")]
    Cancelled,
}

impl ErrorCode for DownloadError {
    fn code(&self) -> &'static str {
        match self {
            Self::Resolve(e) => e.code(),
            Self::Network(_) => "download_network",
            Self::Io(_) => "download_io",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transcode
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the decode → resample → encode pipeline.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Opening the input failed.
    #[error("Failed to open input: {0}")]
    Io(#[from] std::io::Error),

    /// The container holds no decodable audio track.
    #[error("No audio stream found")]
    NoAudioStream,

    /// The container or codec is not recognized.
    #[error("Unsupported input: {0}")]
    Unsupported(String),

    /// The decoder could not be constructed.
    #[error("Decoder setup failed: {0}")]
    DecoderSetup(String),

    /// The encoder or resampler could not be constructed.
    #[error("Encoder setup failed: {0}")]
    EncoderSetup(String),

    /// A packet could not be decoded and the stream cannot continue.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// A frame could not be encoded.
    #[error("Encode failed: {0}")]
    Encode(String),

    /// The seek was rejected by the demuxer.
    #[error("Seek failed: {0}")]
    Seek(String),

    /// The transcode loop did not pick up a seek request in time.
    #[error("Transcoder busy, seek not acknowledged within {0:?}")]
    Busy(Duration),

    /// A stage was invoked out of order.
    #[error("Invalid transcoder state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// The frame consumer went away (session stopped or track skipped).
    #[error("Frame consumer closed")]
    ConsumerClosed,

    /// The loop was cancelled.
    #[error("Transcode cancelled")]
    Cancelled,
}

impl TranscodeError {
    /// Returns true if this error is a cooperative shutdown, not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ConsumerClosed)
    }
}

impl ErrorCode for TranscodeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "input_io",
            Self::NoAudioStream => "no_audio_stream",
            Self::Unsupported(_) => "unsupported_input",
            Self::DecoderSetup(_) => "decoder_setup_failed",
            Self::EncoderSetup(_) => "encoder_setup_failed",
            Self::Decode(_) => "decode_failed",
            Self::Encode(_) => "encode_failed",
            Self::Seek(_) => "seek_failed",
            Self::Busy(_) => "transcoder_busy",
            Self::InvalidState { .. } => "invalid_state",
            Self::ConsumerClosed => "consumer_closed",
            Self::Cancelled => "cancelled",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Errors reported by the real-time audio transport collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Joining the destination failed.
    #[error("Failed to join {0}")]
    Join(String),

    /// Updating the destination status text failed.
    #[error("Status update failed: {0}")]
    StatusUpdate(String),

    /// The transport is no longer connected.
    #[error("Transport closed")]
    Closed,
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Join(_) => "transport_join_failed",
            Self::StatusUpdate(_) => "status_update_failed",
            Self::Closed => "transport_closed",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Player (caller-facing)
// ─────────────────────────────────────────────────────────────────────────────

/// Errors returned to the front end from caller-invoked session operations.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum PlayerError {
    /// The reference could not be turned into a track.
    #[error("Could not resolve: {0}")]
    Resolve(String),

    /// Seeking failed or timed out.
    #[error("Seek failed: {0}")]
    Seek(String),

    /// Nothing is playing.
    #[error("Nothing is playing")]
    NothingPlaying,

    /// The queue index does not exist.
    #[error("No queue entry at position {0}")]
    InvalidPosition(usize),

    /// The session has been stopped.
    #[error("Session stopped")]
    SessionStopped,

    /// The transport refused the operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration rejected at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorCode for PlayerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Resolve(_) => "resolve_failed",
            Self::Seek(_) => "seek_failed",
            Self::NothingPlaying => "nothing_playing",
            Self::InvalidPosition(_) => "invalid_position",
            Self::SessionStopped => "session_stopped",
            Self::Transport(_) => "transport_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<ResolveError> for PlayerError {
    fn from(err: ResolveError) -> Self {
        Self::Resolve(err.to_string())
    }
}

impl From<TransportError> for PlayerError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<TranscodeError> for PlayerError {
    fn from(err: TranscodeError) -> Self {
        Self::Seek(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

/// Convenient Result alias for resolver operations.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Convenient Result alias for collaborator calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Convenient Result alias for transcoder operations.
pub type TranscodeResult<T> = Result<T, TranscodeError>;

/// Convenient Result alias for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// Convenient Result alias for caller-facing operations.
pub type PlayerResult<T> = Result<T, PlayerError>;
