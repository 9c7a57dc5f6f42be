//! One session per group.
//!
//! The registry is created once in [`bootstrap`](crate::bootstrap) and passed
//! to the front end; there is no global instance.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::session::{Session, SessionContext};
use crate::transport::TransportConnector;

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    connector: Arc<dyn TransportConnector>,
    ctx: SessionContext,
    cancel: CancellationToken,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        ctx: SessionContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            connector,
            ctx,
            cancel,
        }
    }

    /// Returns the group's session if it is bound to `destination`.
    ///
    /// A session bound elsewhere has its status cleared and is stopped,
    /// then a fresh one is created for `destination`.
    pub async fn get_or_create(&self, group_id: &str, destination: &str) -> Arc<Session> {
        let existing = self.sessions.get(group_id).map(|s| s.clone());
        if let Some(session) = existing {
            if !session.is_stopped() && session.destination() == destination {
                return session;
            }
            log::info!(
                "[Registry] Replacing session for {} ({} -> {})",
                group_id,
                session.destination(),
                destination
            );
            session.clear_status().await;
            session.stop().await;
            self.sessions
                .remove_if(group_id, |_, current| Arc::ptr_eq(current, &session));
        }

        self.sessions
            .entry(group_id.to_string())
            .or_insert_with(|| {
                let transport = self.connector.connect(group_id);
                Session::new(
                    group_id,
                    destination,
                    transport,
                    self.ctx.clone(),
                    &self.cancel,
                )
            })
            .clone()
    }

    pub fn get(&self, group_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(group_id).map(|s| s.clone())
    }

    /// Stops and drops the group's session. True if one existed.
    pub async fn remove(&self, group_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(group_id) else {
            return false;
        };
        session.clear_status().await;
        session.stop().await;
        log::info!("[Registry] Removed session for {}", group_id);
        true
    }

    /// The transport reports the bot itself moved to `destination`.
    pub fn on_bot_moved(&self, group_id: &str, destination: &str) {
        match self.get(group_id) {
            Some(session) => session.relocate(destination),
            None => log::debug!("[Registry] Move for unknown group {}", group_id),
        }
    }

    /// Stops every session concurrently and waits for all of them.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|e| e.value().clone()).collect();
        self.sessions.clear();
        log::info!("[Registry] Stopping {} session(s)", sessions.len());
        join_all(sessions.iter().map(|s| s.stop())).await;
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::config::{DownloadConfig, PlayerConfig, ResolverConfig};
    use crate::download::Downloader;
    use crate::test_support::{wait_until, MockConnector, MockFetcher, MockProviders};
    use crate::events::NoopEventEmitter;

    fn registry(dir: &std::path::Path) -> (SessionRegistry, Arc<MockConnector>) {
        let providers = MockProviders::new();
        let downloader = Arc::new(Downloader::new(
            Arc::new(providers.resolver(ResolverConfig::default())),
            Arc::new(MockFetcher::failing("offline")),
            DownloadConfig {
                cache_dir: dir.to_path_buf(),
                max_concurrent_downloads: 1,
                purge_on_start: false,
            },
        ));
        let connector = Arc::new(MockConnector::default());
        let ctx = SessionContext {
            downloader,
            emitter: Arc::new(NoopEventEmitter),
            config: PlayerConfig {
                status_debounce_ms: 10,
                ..PlayerConfig::default()
            },
        };
        (
            SessionRegistry::new(connector.clone(), ctx, CancellationToken::new()),
            connector,
        )
    }

    #[tokio::test]
    async fn same_destination_reuses_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, connector) = registry(dir.path());

        let a = registry.get_or_create("g1", "chan-1").await;
        let b = registry.get_or_create("g1", "chan-1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        registry.get_or_create("g2", "chan-9").await;
        assert_eq!(registry.session_count(), 2);
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn other_destination_replaces_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, connector) = registry(dir.path());

        let old = registry.get_or_create("g1", "chan-1").await;
        let old_transport = connector.transport("g1").unwrap();
        let new = registry.get_or_create("g1", "chan-2").await;

        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_stopped());
        assert_eq!(new.destination(), "chan-2");
        assert_eq!(registry.session_count(), 1);
        let statuses = old_transport.statuses();
        assert!(!statuses.is_empty());
        assert!(statuses
            .iter()
            .all(|(dest, text)| dest == "chan-1" && text.is_empty()));
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn bot_move_relocates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(dir.path());

        let session = registry.get_or_create("g1", "chan-1").await;
        registry.on_bot_moved("g1", "chan-5");
        registry.on_bot_moved("missing", "chan-5");

        let same = registry.get("g1").unwrap();
        assert!(Arc::ptr_eq(&session, &same));
        assert_eq!(same.destination(), "chan-5");
        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn remove_and_shutdown_stop_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(dir.path());

        let a = registry.get_or_create("g1", "chan-1").await;
        let b = registry.get_or_create("g2", "chan-2").await;
        let c = registry.get_or_create("g3", "chan-3").await;

        assert!(registry.remove("g1").await);
        assert!(!registry.remove("g1").await);
        assert!(a.is_stopped());

        tokio::time::timeout(Duration::from_secs(5), registry.shutdown_all())
            .await
            .unwrap();
        assert!(b.is_stopped() && c.is_stopped());
        assert_eq!(registry.session_count(), 0);
        assert!(registry.get("g2").is_none());
    }

    #[tokio::test]
    async fn failed_tracks_do_not_stall_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, connector) = registry(dir.path());
        let session = registry.get_or_create("g1", "chan-1").await;

        session
            .play("https://www.youtube.com/watch?v=x1", Default::default())
            .await
            .unwrap();
        session
            .play("https://www.youtube.com/watch?v=x2", Default::default())
            .await
            .unwrap();

        wait_until("the queue to drain", Duration::from_secs(5), || {
            session.list_queue().is_empty() && session.now_playing().is_none()
        })
        .await;
        assert_eq!(
            connector.transport("g1").unwrap().opened(),
            ["chan-1".to_string()]
        );
        registry.shutdown_all().await;
    }
}
