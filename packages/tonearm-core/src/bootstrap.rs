//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! resolver, downloader, event bridge and session registry are instantiated
//! and wired to the collaborators the embedding application supplies.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::download::{Downloader, MediaFetcher};
use crate::error::{PlayerError, PlayerResult};
use crate::events::{BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::registry::SessionRegistry;
use crate::resolver::{Providers, Resolver};
use crate::session::SessionContext;
use crate::transport::TransportConnector;

/// External collaborators the core cannot build itself.
pub struct Collaborators {
    /// Search, metadata, related and scraping providers.
    pub providers: Providers,
    /// Opens byte streams for resolved URLs.
    pub fetcher: Arc<dyn MediaFetcher>,
    /// Creates one audio transport per session.
    pub connector: Arc<dyn TransportConnector>,
    /// Optional extra observer, called before the broadcast channel.
    /// Defaults to [`LoggingEventEmitter`].
    pub emitter: Option<Arc<dyn EventEmitter>>,
}

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Resolves references and picks autoplay continuations.
    pub resolver: Arc<Resolver>,
    /// Shared cache-backed downloader.
    pub downloader: Arc<Downloader>,
    /// Event bridge; subscribe to observe every session.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// One session per group.
    pub registry: Arc<SessionRegistry>,
    /// Parent of every session token.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Stops every session and cancels all background work.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.registry.shutdown_all().await;
        self.cancel_token.cancel();
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps all services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Config validation and cache directory preparation
/// 2. Resolver (depends on providers)
/// 3. Downloader (depends on resolver, fetcher)
/// 4. Event bridge (optionally forwarding to an external emitter)
/// 5. Session registry (depends on downloader, event bridge, connector)
///
/// Must be called from within a Tokio runtime.
///
/// # Arguments
/// * `config` - Application configuration
/// * `collaborators` - Providers, fetcher and transport supplied by the caller
///
/// # Errors
///
/// Returns `Configuration` if the config is invalid, `Internal` if the cache
/// directory cannot be prepared.
pub async fn bootstrap_services(
    config: &Config,
    collaborators: Collaborators,
) -> PlayerResult<BootstrappedServices> {
    config.validate().map_err(PlayerError::Configuration)?;

    let resolver = Arc::new(Resolver::new(
        collaborators.providers,
        config.resolver.clone(),
    ));
    let downloader = Arc::new(Downloader::new(
        Arc::clone(&resolver),
        collaborators.fetcher,
        config.download.clone(),
    ));

    let cache_dir = downloader.cache_dir().to_path_buf();
    let prepared = if config.download.purge_on_start {
        downloader.purge_cache_dir().await
    } else {
        tokio::fs::create_dir_all(&cache_dir).await
    };
    prepared.map_err(|e| {
        PlayerError::Internal(format!(
            "Failed to prepare cache directory {}: {}",
            cache_dir.display(),
            e
        ))
    })?;

    let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));
    event_bridge.set_external_emitter(
        collaborators
            .emitter
            .unwrap_or_else(|| Arc::new(LoggingEventEmitter) as Arc<dyn EventEmitter>),
    );

    let cancel_token = CancellationToken::new();
    let ctx = SessionContext {
        downloader: Arc::clone(&downloader),
        emitter: Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        config: config.player.clone(),
    };
    let registry = Arc::new(SessionRegistry::new(
        collaborators.connector,
        ctx,
        cancel_token.clone(),
    ));

    log::info!(
        "[Bootstrap] Services ready (cache: {}, encoder: {:?})",
        cache_dir.display(),
        config.player.encoder
    );

    Ok(BootstrappedServices {
        resolver,
        downloader,
        event_bridge,
        registry,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockConnector, MockFetcher, MockProviders};

    fn collaborators() -> Collaborators {
        Collaborators {
            providers: MockProviders::new().providers(),
            fetcher: Arc::new(MockFetcher::failing("offline")),
            connector: Arc::new(MockConnector::default()),
            emitter: None,
        }
    }

    #[tokio::test]
    async fn purges_the_cache_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(cache_dir.join("stale")).unwrap();
        std::fs::write(cache_dir.join("old.audio"), b"x").unwrap();

        let mut config = Config::default();
        config.download.cache_dir = cache_dir.clone();
        let services = bootstrap_services(&config, collaborators()).await.unwrap();

        assert!(cache_dir.is_dir());
        assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 0);

        services.registry.get_or_create("g1", "chan").await;
        services.shutdown().await;
        assert_eq!(services.registry.session_count(), 0);
        assert!(services.cancel_token.is_cancelled());
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = Config::default();
        config.download.max_concurrent_downloads = 0;
        let result = bootstrap_services(&config, collaborators()).await;
        assert!(matches!(result, Err(PlayerError::Configuration(_))));
    }
}
