//! Tonearm Core - per-channel streaming audio playback engine.
//!
//! Given user-submitted media references, this crate resolves each one to a
//! playable source, caches it while playback already reads the partial file,
//! transcodes it to fixed 20 ms frames and hands those frames to a real-time
//! audio transport. Every destination channel gets its own session with a
//! queue, autoplay, looping and presence-based pausing.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`similarity`]: Title normalization and weighted token similarity
//! - [`resolver`]: References to playable sources, plus autoplay picks
//! - [`download`]: Cache-backed downloader with tailing readers
//! - [`transcode`]: Decode, resample, reframe and encode with in-place seek
//! - [`transport`]: The transport seam and the bounded frame buffer
//! - [`session`]: Queue, playback driving, occupancy and status
//! - [`registry`]: One session per group
//! - [`events`]: Event system for playback observers
//! - [`bootstrap`]: Composition root
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from the
//! platform it is embedded in:
//!
//! - [`SearchProvider`], [`MetadataExtractor`], [`RelatedProvider`] and
//!   [`PageScraper`]: Resolution collaborators
//! - [`MediaFetcher`]: Opening media byte streams
//! - [`AudioTransport`] and [`TransportConnector`]: The real-time audio link
//! - [`EventEmitter`]: Emitting domain events
//!
//! [`HttpFetcher`] and [`OpenGraphScraper`] are ready-made implementations.

#![warn(clippy::all)]

pub mod bootstrap;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod similarity;
pub mod transcode;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types at the crate root
pub use bootstrap::{bootstrap_services, BootstrappedServices, Collaborators};
pub use config::{Config, DownloadConfig, EncoderKind, PlayerConfig, ResolverConfig};
pub use error::{
    DownloadError, ErrorCode, PlayerError, PlayerResult, ResolveError, TranscodeError,
    TransportError,
};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, LoggingEventEmitter, NoopEventEmitter,
    SessionEvent, TrackEvent,
};
pub use utils::now_millis;

// Re-export pipeline types
pub use download::{Downloader, HttpFetcher, MediaFetcher};
pub use resolver::{
    MediaMetadata, MetadataExtractor, OpenGraphScraper, PageScraper, PageSummary, Providers,
    RelatedEntry, RelatedProvider, ResolvedSource, Resolver, SearchProvider, SearchResult,
};
pub use transcode::{EncodedFrame, Transcoder};
pub use transport::{AudioTransport, FramePoll, FrameSupplier, TransportConnector};

// Re-export session types
pub use registry::SessionRegistry;
pub use session::{NowPlaying, PlayOptions, QueueEntry, QueueMode, Session, SessionContext};
