//! Destination status line: formatting and debounced commits.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::{
    STATUS_NOW_PLAYING, STATUS_PAUSED_SUFFIX, STATUS_RESOLVING, STATUS_UP_NEXT,
};
use crate::transport::AudioTransport;
use crate::utils::ellipsize_middle;

/// What the status line is announcing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    NowPlaying,
    UpNext,
    Resolving,
}

impl StatusKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::NowPlaying => STATUS_NOW_PLAYING,
            Self::UpNext => STATUS_UP_NEXT,
            Self::Resolving => STATUS_RESOLVING,
        }
    }
}

/// Renders a status line of at most `max_chars` characters.
///
/// Only the title is shortened; the kind marker and the paused suffix
/// always survive.
pub fn format_status(kind: StatusKind, title: &str, paused: bool, max_chars: usize) -> String {
    let prefix = kind.prefix();
    let suffix = if paused { STATUS_PAUSED_SUFFIX } else { "" };
    let budget = max_chars.saturating_sub(prefix.chars().count() + suffix.chars().count());
    format!("{prefix}{}{suffix}", ellipsize_middle(title.trim(), budget))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StatusUpdate {
    destination: String,
    text: String,
}

/// Coalesces status changes and commits the latest one after a quiet period.
///
/// A failed commit is retried after a backoff, always with the newest value.
pub struct StatusBroadcaster {
    tx: watch::Sender<Option<StatusUpdate>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatusBroadcaster {
    pub fn spawn(
        transport: Arc<dyn AudioTransport>,
        debounce: Duration,
        backoff: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(commit_loop(transport, rx, debounce, backoff, cancel));
        Self {
            tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Replaces the pending status. Never blocks.
    pub fn publish(&self, destination: &str, text: String) {
        self.tx.send_replace(Some(StatusUpdate {
            destination: destination.to_string(),
            text,
        }));
    }

    /// Text of the most recent publish.
    #[cfg(test)]
    pub fn latest(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|u| u.text.clone())
    }

    /// Waits for the commit task to exit after cancellation.
    pub async fn join(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        if let Err(e) = task.await {
            log::warn!("[Session] Status task ended abnormally: {}", e);
        }
    }
}

async fn commit_loop(
    transport: Arc<dyn AudioTransport>,
    mut rx: watch::Receiver<Option<StatusUpdate>>,
    debounce: Duration,
    backoff: Duration,
    cancel: CancellationToken,
) {
    let mut committed: Option<StatusUpdate> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(debounce) => {}
        }

        loop {
            let Some(update) = rx.borrow_and_update().clone() else {
                break;
            };
            if committed.as_ref() == Some(&update) {
                break;
            }
            match transport
                .set_status_text(&update.destination, &update.text)
                .await
            {
                Ok(()) => {
                    log::trace!("[Session] Status committed: {}", update.text);
                    committed = Some(update);
                    break;
                }
                Err(e) => {
                    log::warn!("[Session] Status update failed, retrying: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;

    #[test]
    fn short_titles_are_kept() {
        assert_eq!(
            format_status(StatusKind::NowPlaying, "Song", false, 100),
            "▶ Song"
        );
        assert_eq!(format_status(StatusKind::UpNext, "Song", true, 100), "⏭ Song ⏸");
    }

    #[test]
    fn long_titles_keep_markers_and_both_ends() {
        let title = "Beginning of a very long title that keeps going until the end";
        let text = format_status(StatusKind::NowPlaying, title, true, 24);
        assert_eq!(text.chars().count(), 24);
        assert!(text.starts_with("▶ Beginning"));
        assert!(text.ends_with("the end ⏸"));
        assert!(text.contains('…'));
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_collapse_to_latest() {
        let transport = MockTransport::new();
        let cancel = CancellationToken::new();
        let status = StatusBroadcaster::spawn(
            transport.clone(),
            Duration::from_millis(500),
            Duration::from_millis(1000),
            cancel.clone(),
        );

        status.publish("chan", "a".into());
        status.publish("chan", "b".into());
        tokio::time::sleep(Duration::from_millis(100)).await;
        status.publish("chan", "c".into());
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(transport.statuses(), [("chan".to_string(), "c".to_string())]);
        assert_eq!(status.latest().as_deref(), Some("c"));

        cancel.cancel();
        status.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_commit_retries_with_newest_value() {
        let transport = MockTransport::new();
        transport.fail_next_status_updates(2);
        let cancel = CancellationToken::new();
        let status = StatusBroadcaster::spawn(
            transport.clone(),
            Duration::from_millis(500),
            Duration::from_millis(1000),
            cancel.clone(),
        );

        // The first attempt fails at 500 ms, the retry at 1.5 s fails too.
        status.publish("chan", "first".into());
        tokio::time::sleep(Duration::from_millis(700)).await;
        // Lands during the backoff; the retry must carry it.
        status.publish("chan", "second".into());
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(
            transport.statuses(),
            [("chan".to_string(), "second".to_string())]
        );
        assert_eq!(transport.status_attempts(), 3);

        cancel.cancel();
        status.join().await;
    }
}
