//! Event system for playback observers.
//!
//! This module provides:
//! - [`EventEmitter`] trait for sessions to emit events
//! - [`BroadcastEventBridge`] for fan-out to external subscribers
//! - Event types for track and session lifecycle

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Per-track pipeline and playback events.
    Track(TrackEvent),

    /// Session-wide state changes.
    Session(SessionEvent),
}

/// Events about one queued or playing track.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackEvent {
    /// A reference was added to the queue.
    Queued {
        #[serde(rename = "groupId")]
        group_id: String,
        reference: String,
        /// Queue index the track landed at.
        position: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Playback of a track started.
    Started {
        #[serde(rename = "groupId")]
        group_id: String,
        title: String,
        url: String,
        source: String,
        #[serde(rename = "durationMs", skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        timestamp: u64,
    },
    /// Playback of a track ended, normally or by skip.
    Finished {
        #[serde(rename = "groupId")]
        group_id: String,
        title: String,
        skipped: bool,
        timestamp: u64,
    },
    /// A track failed to resolve, download or transcode and was dropped.
    Failed {
        #[serde(rename = "groupId")]
        group_id: String,
        reference: String,
        /// Machine-readable code from [`ErrorCode`](crate::error::ErrorCode).
        code: String,
        error: String,
        timestamp: u64,
    },
    /// The playing track crossed its nearing-end threshold.
    NearingEnd {
        #[serde(rename = "groupId")]
        group_id: String,
        title: String,
        timestamp: u64,
    },
}

/// Events about a session as a whole.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The channel emptied and playback paused.
    Paused {
        #[serde(rename = "groupId")]
        group_id: String,
        timestamp: u64,
    },
    /// Listeners returned and playback resumed.
    Resumed {
        #[serde(rename = "groupId")]
        group_id: String,
        timestamp: u64,
    },
    /// The session now plays into another destination.
    Relocated {
        #[serde(rename = "groupId")]
        group_id: String,
        destination: String,
        timestamp: u64,
    },
    /// The session was stopped and its queue cleared.
    Stopped {
        #[serde(rename = "groupId")]
        group_id: String,
        timestamp: u64,
    },
}

impl From<TrackEvent> for BroadcastEvent {
    fn from(event: TrackEvent) -> Self {
        BroadcastEvent::Track(event)
    }
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        BroadcastEvent::Session(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_category_and_type_tags() {
        let event = BroadcastEvent::from(SessionEvent::Relocated {
            group_id: "g1".to_string(),
            destination: "voice-2".to_string(),
            timestamp: 42,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "session");
        assert_eq!(json["type"], "relocated");
        assert_eq!(json["groupId"], "g1");
        assert_eq!(json["destination"], "voice-2");
    }

    #[test]
    fn unknown_duration_is_omitted() {
        let event = BroadcastEvent::from(TrackEvent::Started {
            group_id: "g1".to_string(),
            title: "Song".to_string(),
            url: "https://example.com/a".to_string(),
            source: "Artist".to_string(),
            duration_ms: None,
            timestamp: 1,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "track");
        assert!(json.get("durationMs").is_none());
    }
}
