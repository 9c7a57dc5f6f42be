//! Fan-out of track and session events.
//!
//! Every session emits into one [`BroadcastEventBridge`]. The bridge hands
//! each event to the configured observer first, then to every broadcast
//! subscriber such as the CLI printer.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, SessionEvent, TrackEvent};

/// Publishes session events on a `tokio::sync::broadcast` channel.
///
/// Subscribers that fall behind by more than the channel capacity miss the
/// oldest events. The observer sees every event.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    observer: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            observer: Arc::new(RwLock::new(None)),
        }
    }

    /// Installs the observer called before broadcast, replacing any earlier one.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.observer.write() = Some(emitter);
    }

    /// Receives every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    fn observer(&self) -> Option<Arc<dyn EventEmitter>> {
        self.observer.read().clone()
    }

    fn publish(&self, event: BroadcastEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("[Events] No subscribers, event dropped");
        }
    }
}

impl EventEmitter for BroadcastEventBridge {
    fn emit_track(&self, event: TrackEvent) {
        if let Some(observer) = self.observer() {
            observer.emit_track(event.clone());
        }
        self.publish(event.into());
    }

    fn emit_session(&self, event: SessionEvent) {
        if let Some(observer) = self.observer() {
            observer.emit_session(event.clone());
        }
        self.publish(event.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::test_support::RecordingEmitter;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bridge = BroadcastEventBridge::new(8);
        bridge.set_external_emitter(Arc::new(NoopEventEmitter));
        let mut rx = bridge.subscribe();

        bridge.emit_session(SessionEvent::Stopped {
            group_id: "g".to_string(),
            timestamp: 7,
        });

        match rx.recv().await.unwrap() {
            BroadcastEvent::Session(SessionEvent::Stopped { group_id, timestamp }) => {
                assert_eq!(group_id, "g");
                assert_eq!(timestamp, 7);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn observer_sees_events_before_subscribers() {
        let bridge = BroadcastEventBridge::new(8);
        let observer = Arc::new(RecordingEmitter::default());
        bridge.set_external_emitter(observer.clone());
        let mut rx = bridge.subscribe();

        bridge.emit_track(TrackEvent::NearingEnd {
            group_id: "g".to_string(),
            title: "Song".to_string(),
            timestamp: 3,
        });

        assert_eq!(observer.events().len(), 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            BroadcastEvent::Track(TrackEvent::NearingEnd { .. })
        ));
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bridge = BroadcastEventBridge::new(1);
        bridge.emit_track(TrackEvent::NearingEnd {
            group_id: "g".to_string(),
            title: "t".to_string(),
            timestamp: 0,
        });
    }
}
