//! Event emitter abstraction for decoupling sessions from delivery.
//!
//! Sessions depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, so tests and front ends can plug in their own delivery.

use super::{SessionEvent, TrackEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct MySession {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MySession {
///     fn pause(&self) {
///         self.emitter.emit_session(SessionEvent::Paused { ... });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a track lifecycle event.
    fn emit_track(&self, event: TrackEvent);

    /// Emits a session state event.
    fn emit_session(&self, event: SessionEvent);
}

/// No-op emitter for headless use or testing.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_track(&self, _event: TrackEvent) {}

    fn emit_session(&self, _event: SessionEvent) {}
}

/// Logs every event at debug level.
///
/// The default external observer when the embedding application supplies
/// none.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_track(&self, event: TrackEvent) {
        tracing::debug!(?event, "track_event");
    }

    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }
}
