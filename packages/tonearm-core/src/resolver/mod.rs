//! Source resolution.
//!
//! Turns a user reference (direct link, indirect third-party link or free-text
//! query) into a [`ResolvedSource`] the downloader can fetch, racing the
//! metadata extractor against the page scraper for indirect links and running
//! both catalog searches concurrently.

pub mod providers;
pub mod restricted;
pub mod scoring;
pub mod scrape;

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use dashmap::DashSet;
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::config::ResolverConfig;
use crate::error::{ProviderError, ResolveError, ResolveResult};
use crate::similarity::{normalize, similar, weights};

pub use providers::{
    MediaMetadata, MetadataExtractor, PageScraper, PageSummary, Providers, RelatedEntry,
    RelatedProvider, SearchProvider, SearchResult,
};
pub use restricted::{classify, ContentCapability};
pub use scoring::{best_candidate, MatchTarget};
pub use scrape::OpenGraphScraper;

/// A reference resolved to something playable.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    /// URL handed to the media fetcher.
    pub url: String,
    pub title: String,
    pub source: Option<String>,
    pub duration: Option<Duration>,
    /// Stable identifier, also the cache key.
    pub canonical_id: String,
    /// Live streams are never cached.
    pub is_live: bool,
}

impl ResolvedSource {
    /// Title normalized against its attributed source.
    pub fn normalized_title(&self) -> String {
        normalize(&self.title, self.source.as_deref().unwrap_or(""))
    }
}

/// A previously played track, as remembered by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedEntry {
    pub id: String,
    pub normalized_title: String,
}

/// Recommendation picked by [`Resolver::find_related`].
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedPick {
    pub url: String,
    pub title: String,
    pub source: Option<String>,
    pub canonical_id: String,
    /// False when every candidate was filtered and this is the fallback pick.
    pub fresh: bool,
}

/// How a raw reference is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Link to a primary platform, played as-is.
    Direct(Url),
    /// Link to any other page, resolved through metadata or scraping.
    Indirect(Url),
    /// Free-text search.
    Query(String),
}

/// Classifies a raw reference against the primary host list.
pub fn classify_reference(reference: &str, primary_hosts: &[String]) -> ResolveResult<ReferenceKind> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(ResolveError::InvalidReference("empty reference".into()));
    }

    let url = match Url::parse(reference) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        Ok(url) if url.cannot_be_a_base() => return Ok(ReferenceKind::Query(reference.to_string())),
        Ok(url) => {
            return Err(ResolveError::InvalidReference(format!(
                "unsupported scheme: {}",
                url.scheme()
            )))
        }
        Err(_) => return Ok(ReferenceKind::Query(reference.to_string())),
    };

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let is_primary = primary_hosts.iter().any(|h| {
        let h = h.to_ascii_lowercase();
        host == h || host.ends_with(&format!(".{h}"))
    });

    Ok(if is_primary {
        ReferenceKind::Direct(url)
    } else {
        ReferenceKind::Indirect(url)
    })
}

/// Derives a stable identifier for a URL.
///
/// Recognizes the `v` query parameter and the short-link path form; anything
/// else is identified by the SHA-256 of the URL.
pub fn canonical_id_for(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some((_, v)) = parsed.query_pairs().find(|(k, _)| k == "v") {
            if !v.is_empty() {
                return v.into_owned();
            }
        }
        if parsed.host_str() == Some("youtu.be") {
            if let Some(id) = parsed.path_segments().and_then(|mut s| s.next()) {
                if !id.is_empty() {
                    return id.to_string();
                }
            }
        }
    }
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Title and artist recovered from an indirect page.
#[derive(Debug, Clone)]
struct PageHint {
    title: String,
    source: Option<String>,
    duration: Option<Duration>,
}

impl From<MediaMetadata> for PageHint {
    fn from(meta: MediaMetadata) -> Self {
        Self {
            title: meta.title,
            source: meta.source,
            duration: meta.duration,
        }
    }
}

impl From<PageSummary> for PageHint {
    fn from(summary: PageSummary) -> Self {
        // Player pages describe items as "Artist · Album · Year".
        let source = summary
            .description
            .as_deref()
            .and_then(|d| d.split('·').next())
            .map(str::trim)
            .filter(|s| !s.is_empty() && s.len() < 100)
            .map(str::to_string);
        Self {
            title: summary.title,
            source,
            duration: None,
        }
    }
}

async fn with_timeout<T, F>(label: &str, limit: Duration, fut: F) -> ResolveResult<T>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(ProviderError::Restricted(msg))) => Err(ResolveError::Restricted(msg)),
        Ok(Err(e)) => Err(ResolveError::provider(label, e.to_string())),
        Err(_) => Err(ResolveError::Timeout(label.to_string(), limit)),
    }
}

/// Merges result lists in priority order, dropping repeated URLs.
fn merge_by_url<T>(lists: Vec<Vec<T>>, url: impl Fn(&T) -> &str) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for item in lists.into_iter().flatten() {
        if seen.insert(url(&item).to_string()) {
            merged.push(item);
        }
    }
    merged
}

/// Resolves references and picks autoplay continuations.
pub struct Resolver {
    providers: Providers,
    config: ResolverConfig,
    /// References already proven restricted; never retried.
    restricted_memo: DashSet<String>,
}

impl Resolver {
    pub fn new(providers: Providers, config: ResolverConfig) -> Self {
        Self {
            providers,
            config,
            restricted_memo: DashSet::new(),
        }
    }

    /// Returns true if the reference was previously found to be restricted.
    pub fn is_known_restricted(&self, reference: &str) -> bool {
        self.restricted_memo.contains(reference.trim())
    }

    /// Resolves a reference into a playable source.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::InvalidReference`] for empty or non-web references
    /// - [`ResolveError::AmbiguousQuery`] for queries with no searchable tokens
    /// - [`ResolveError::Restricted`] for protected pages (memoized)
    /// - [`ResolveError::NoResults`] when no search candidate exists
    pub async fn resolve(&self, reference: &str) -> ResolveResult<ResolvedSource> {
        let reference = reference.trim();
        if self.is_known_restricted(reference) {
            log::debug!("[Resolver] Known restricted reference: {}", reference);
            return Err(ResolveError::Restricted(reference.to_string()));
        }

        let result = match classify_reference(reference, &self.config.primary_hosts)? {
            ReferenceKind::Direct(url) => self.resolve_direct(url.as_str()).await,
            ReferenceKind::Indirect(url) => self.resolve_indirect(url.as_str()).await,
            ReferenceKind::Query(query) => self.resolve_query(&query).await,
        };

        if let Err(ResolveError::Restricted(_)) = &result {
            log::warn!("[Resolver] Restricted content, not retrying: {}", reference);
            self.restricted_memo.insert(reference.to_string());
        }
        result
    }

    async fn resolve_direct(&self, url: &str) -> ResolveResult<ResolvedSource> {
        let limit = self.config.metadata_timeout(false);
        match with_timeout("metadata", limit, self.providers.metadata.extract(url)).await {
            Ok(meta) => {
                let canonical_id = meta
                    .canonical_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| canonical_id_for(url));
                Ok(ResolvedSource {
                    url: url.to_string(),
                    title: if meta.title.trim().is_empty() {
                        url.to_string()
                    } else {
                        meta.title
                    },
                    source: meta.source,
                    duration: meta.duration,
                    canonical_id,
                    is_live: meta.is_live,
                })
            }
            Err(ResolveError::Restricted(msg)) => Err(ResolveError::Restricted(msg)),
            Err(e) => {
                // Playable without metadata; the title is cosmetic.
                log::warn!("[Resolver] Metadata failed for {}, passing through: {}", url, e);
                Ok(ResolvedSource {
                    url: url.to_string(),
                    title: url.to_string(),
                    source: None,
                    duration: None,
                    canonical_id: canonical_id_for(url),
                    is_live: false,
                })
            }
        }
    }

    async fn resolve_indirect(&self, url: &str) -> ResolveResult<ResolvedSource> {
        let capability = classify(url, &self.config.restricted);
        let hint = self.race_page_strategies(url, capability).await?;

        let normalized_title = normalize(&hint.title, hint.source.as_deref().unwrap_or(""));
        let query = match &hint.source {
            Some(source) => format!("{source} {normalized_title}"),
            None => normalized_title.clone(),
        };
        if query.trim().is_empty() {
            return Err(ResolveError::AmbiguousQuery(hint.title));
        }

        log::info!(
            "[Resolver] Indirect link {} ({:?}) resolved to query {:?}",
            url,
            capability,
            query
        );

        let target = MatchTarget {
            normalized_title,
            source: hint.source,
            duration: hint.duration,
        };
        self.search_best(&query, &target).await
    }

    /// Races the metadata extractor against the page scraper.
    ///
    /// The first strategy returning a non-empty title wins. A restricted
    /// verdict from the extractor only becomes an error once the scraper has
    /// failed too.
    async fn race_page_strategies(
        &self,
        url: &str,
        capability: ContentCapability,
    ) -> ResolveResult<PageHint> {
        let extract = with_timeout(
            "metadata",
            self.config.metadata_timeout(capability.is_suspected()),
            self.providers.metadata.extract(url),
        );
        let scrape = with_timeout(
            "scraper",
            self.config.scrape_timeout(),
            self.providers.scraper.scrape(url),
        );
        tokio::pin!(extract);
        tokio::pin!(scrape);

        let mut extract_done = false;
        let mut scrape_done = false;
        let mut restricted: Option<String> = None;
        let mut last_error: Option<ResolveError> = None;

        let hint = loop {
            tokio::select! {
                result = &mut extract, if !extract_done => {
                    extract_done = true;
                    match result {
                        Ok(meta) if !meta.title.trim().is_empty() => break Some(PageHint::from(meta)),
                        Ok(_) => log::debug!("[Resolver] Metadata for {} had no title", url),
                        Err(ResolveError::Restricted(msg)) => restricted = Some(msg),
                        Err(e) => last_error = Some(e),
                    }
                }
                result = &mut scrape, if !scrape_done => {
                    scrape_done = true;
                    match result {
                        Ok(summary) if !summary.title.trim().is_empty() => break Some(PageHint::from(summary)),
                        Ok(_) => log::debug!("[Resolver] Page {} had no title", url),
                        Err(e) => last_error = Some(e),
                    }
                }
                else => break None,
            }
        };

        if let Some(hint) = hint {
            return Ok(hint);
        }
        if let Some(msg) = restricted {
            return Err(ResolveError::Restricted(if msg.is_empty() {
                url.to_string()
            } else {
                msg
            }));
        }
        Err(last_error.unwrap_or_else(|| ResolveError::NoResults(url.to_string())))
    }

    async fn resolve_query(&self, query: &str) -> ResolveResult<ResolvedSource> {
        let normalized_title = normalize(query, "");
        if normalized_title.is_empty() {
            return Err(ResolveError::AmbiguousQuery(query.to_string()));
        }
        let target = MatchTarget {
            normalized_title,
            source: None,
            duration: None,
        };
        self.search_best(query, &target).await
    }

    /// Searches both catalogs and returns the best-scoring candidate.
    async fn search_best(&self, query: &str, target: &MatchTarget) -> ResolveResult<ResolvedSource> {
        let candidates = self.dual_search(query).await?;
        let best = best_candidate(&candidates, target)
            .ok_or_else(|| ResolveError::NoResults(query.to_string()))?;

        log::info!(
            "[Resolver] {:?} -> {:?} ({}) from {} candidates",
            query,
            best.title,
            best.url,
            candidates.len()
        );

        Ok(ResolvedSource {
            url: best.url.clone(),
            title: best.title.clone(),
            source: best.source.clone(),
            duration: best.duration,
            canonical_id: best
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| canonical_id_for(&best.url)),
            is_live: false,
        })
    }

    /// Queries both catalogs concurrently, music results first.
    async fn dual_search(&self, query: &str) -> ResolveResult<Vec<SearchResult>> {
        let limit = self.config.candidates_per_provider;
        let deadline = self.config.search_timeout();
        let music = &self.providers.music_search;
        let catalog = &self.providers.catalog_search;

        let (music_results, catalog_results) = tokio::join!(
            with_timeout(music.name(), deadline, music.search(query, limit)),
            with_timeout(catalog.name(), deadline, catalog.search(query, limit)),
        );

        let mut lists = Vec::with_capacity(2);
        let mut first_error = None;
        for result in [music_results, catalog_results] {
            match result {
                Ok(mut results) => {
                    results.truncate(limit);
                    lists.push(results);
                }
                Err(e) => {
                    log::warn!("[Resolver] Search failed for {:?}: {}", query, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if lists.is_empty() {
            return Err(first_error.unwrap_or_else(|| ResolveError::NoResults(query.to_string())));
        }
        let merged = merge_by_url(lists, |r: &SearchResult| r.url.as_str());
        if merged.is_empty() {
            return Err(ResolveError::NoResults(query.to_string()));
        }
        Ok(merged)
    }

    /// Picks an autoplay continuation for `current_id`.
    ///
    /// Candidates already in `history` (by id) or similar to a history title
    /// are skipped. When everything is filtered, the first candidate that is
    /// not the current track is returned with `fresh == false`.
    pub async fn find_related(
        &self,
        current_id: &str,
        history: &[PlayedEntry],
    ) -> ResolveResult<RelatedPick> {
        let deadline = self.config.search_timeout();
        let primary = &self.providers.primary_related;
        let secondary = &self.providers.secondary_related;

        let (primary_results, secondary_results) = tokio::join!(
            with_timeout(primary.name(), deadline, primary.related(current_id)),
            with_timeout(secondary.name(), deadline, secondary.related(current_id)),
        );

        let mut lists = Vec::with_capacity(2);
        for result in [primary_results, secondary_results] {
            match result {
                Ok(entries) => lists.push(entries),
                Err(e) => log::warn!("[Resolver] Related lookup failed for {}: {}", current_id, e),
            }
        }
        let candidates = merge_by_url(lists, |e: &RelatedEntry| e.url.as_str());
        if candidates.is_empty() {
            return Err(ResolveError::NoRecommendation);
        }

        let picks: Vec<RelatedPick> = candidates
            .into_iter()
            .map(|entry| RelatedPick {
                canonical_id: entry
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| canonical_id_for(&entry.url)),
                url: entry.url,
                title: entry.title,
                source: entry.source,
                fresh: true,
            })
            .collect();
        let normalized: Vec<String> = picks
            .iter()
            .map(|p| normalize(&p.title, p.source.as_deref().unwrap_or("")))
            .collect();

        let token_weights = weights(
            history
                .iter()
                .map(|h| h.normalized_title.as_str())
                .chain(normalized.iter().map(String::as_str)),
        );
        let played: HashSet<&str> = history.iter().map(|h| h.id.as_str()).collect();

        let fresh = picks.iter().zip(&normalized).position(|(pick, title)| {
            pick.canonical_id != current_id
                && !played.contains(pick.canonical_id.as_str())
                && !history
                    .iter()
                    .any(|h| similar(title, &h.normalized_title, &token_weights))
        });

        if let Some(index) = fresh {
            return Ok(picks[index].clone());
        }

        picks
            .into_iter()
            .find(|pick| pick.canonical_id != current_id)
            .map(|pick| {
                log::debug!("[Resolver] All related entries seen, reusing {}", pick.url);
                RelatedPick {
                    fresh: false,
                    ..pick
                }
            })
            .ok_or(ResolveError::NoRecommendation)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::test_support::{entry, search_result, MockProviders};

    struct Fixture(MockProviders);

    impl std::ops::Deref for Fixture {
        type Target = MockProviders;

        fn deref(&self) -> &MockProviders {
            &self.0
        }
    }

    impl Fixture {
        fn new() -> Self {
            Self(MockProviders::new())
        }

        fn resolver(&self) -> Resolver {
            self.0.resolver(ResolverConfig::default())
        }
    }

    #[test]
    fn classifies_references() {
        let hosts = ResolverConfig::default().primary_hosts;
        assert!(matches!(
            classify_reference("https://www.youtube.com/watch?v=abc", &hosts),
            Ok(ReferenceKind::Direct(_))
        ));
        assert!(matches!(
            classify_reference("https://music.youtube.com/watch?v=abc", &hosts),
            Ok(ReferenceKind::Direct(_))
        ));
        assert!(matches!(
            classify_reference("https://blog.example.org/post", &hosts),
            Ok(ReferenceKind::Indirect(_))
        ));
        assert!(matches!(
            classify_reference("daft punk around the world", &hosts),
            Ok(ReferenceKind::Query(_))
        ));
        assert!(matches!(
            classify_reference("   ", &hosts),
            Err(ResolveError::InvalidReference(_))
        ));
        assert!(matches!(
            classify_reference("ftp://files.example/a.mp3", &hosts),
            Err(ResolveError::InvalidReference(_))
        ));
    }

    #[test]
    fn canonical_ids() {
        assert_eq!(canonical_id_for("https://www.youtube.com/watch?v=abc123&t=4"), "abc123");
        assert_eq!(canonical_id_for("https://youtu.be/xyz789"), "xyz789");
        let hashed = canonical_id_for("https://cdn.example/a.mp3");
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, canonical_id_for("https://cdn.example/a.mp3"));
    }

    #[tokio::test]
    async fn direct_link_passes_through_with_metadata() {
        let fx = Fixture::new();
        fx.metadata.set(Ok(MediaMetadata {
            title: "Song".into(),
            source: Some("Artist".into()),
            duration: Some(Duration::from_secs(200)),
            canonical_id: None,
            is_live: false,
        }));
        let resolved = fx
            .resolver()
            .resolve("https://www.youtube.com/watch?v=abc123")
            .await
            .unwrap();
        assert_eq!(resolved.url, "https://www.youtube.com/watch?v=abc123");
        assert_eq!(resolved.canonical_id, "abc123");
        assert_eq!(resolved.title, "Song");
        assert_eq!(fx.music.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn query_merges_music_results_first() {
        let fx = Fixture::new();
        fx.catalog.set(vec![search_result("https://c/1", "Around The World", "Daft Punk", 429)]);
        fx.music.set(vec![search_result("https://m/1", "Around The World", "Daft Punk", 429)]);

        let resolved = fx.resolver().resolve("around the world").await.unwrap();
        assert_eq!(resolved.url, "https://m/1");
        assert_eq!(fx.catalog.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn query_without_results_fails() {
        let fx = Fixture::new();
        let err = fx.resolver().resolve("nothing matches").await.unwrap_err();
        assert!(matches!(err, ResolveError::NoResults(_)));
    }

    #[tokio::test]
    async fn punctuation_only_query_is_ambiguous() {
        let fx = Fixture::new();
        let err = fx.resolver().resolve("!!!").await.unwrap_err();
        assert!(matches!(err, ResolveError::AmbiguousQuery(_)));
    }

    #[tokio::test]
    async fn restricted_page_is_terminal_and_memoized() {
        let fx = Fixture::new();
        fx.metadata.set(Err(ProviderError::Restricted("drm".into())));
        fx.scraper.set(Err(ProviderError::Failed("403".into())));
        let resolver = fx.resolver();
        let url = "https://open.example.com/track/42";

        let err = resolver.resolve(url).await.unwrap_err();
        assert!(matches!(err, ResolveError::Restricted(_)));
        assert!(resolver.is_known_restricted(url));

        let calls = fx.metadata.calls.load(Ordering::SeqCst);
        let again = resolver.resolve(url).await.unwrap_err();
        assert!(matches!(again, ResolveError::Restricted(_)));
        assert_eq!(fx.metadata.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn scraper_title_rescues_restricted_page() {
        let fx = Fixture::new();
        fx.metadata.set(Err(ProviderError::Restricted("drm".into())));
        fx.scraper.set(Ok(PageSummary {
            title: "Around The World".into(),
            description: Some("Daft Punk · Homework · 1997".into()),
        }));
        fx.music.set(vec![search_result("https://m/atw", "Around The World", "Daft Punk", 429)]);

        let resolved = fx
            .resolver()
            .resolve("https://open.example.com/track/42")
            .await
            .unwrap();
        assert_eq!(resolved.url, "https://m/atw");
        let query = fx.music.last_query.lock().clone();
        assert_eq!(query.as_deref(), Some("Daft Punk around the world"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_metadata_loses_race_to_scraper() {
        let fx = Fixture::new();
        fx.metadata.set(Ok(MediaMetadata {
            title: "Slow Title".into(),
            ..Default::default()
        }));
        *fx.metadata.delay.lock() = Duration::from_secs(60);
        fx.scraper.set(Ok(PageSummary {
            title: "Fast Title".into(),
            description: None,
        }));
        fx.catalog.set(vec![search_result("https://c/fast", "Fast Title", "X", 100)]);

        let resolved = fx
            .resolver()
            .resolve("https://blog.example.org/post/7")
            .await
            .unwrap();
        assert_eq!(resolved.title, "Fast Title");
    }

    #[tokio::test]
    async fn related_skips_history_and_similar_titles() {
        let fx = Fixture::new();
        fx.primary.set(vec![
            entry("https://r/1", "Song A", "Artist", "id-a"),
            entry("https://r/2", "Song B (Official Video)", "Artist", "id-b2"),
        ]);
        fx.secondary.set(vec![entry("https://r/3", "Song C", "Other", "id-c")]);

        let history = vec![
            PlayedEntry {
                id: "id-a".into(),
                normalized_title: "song a".into(),
            },
            PlayedEntry {
                id: "id-b".into(),
                normalized_title: "song b".into(),
            },
        ];
        let pick = fx.resolver().find_related("id-a", &history).await.unwrap();
        assert_eq!(pick.url, "https://r/3");
        assert!(pick.fresh);
    }

    #[tokio::test]
    async fn related_falls_back_to_any_other_candidate() {
        let fx = Fixture::new();
        fx.primary.set(vec![
            entry("https://r/1", "Current", "Artist", "current"),
            entry("https://r/2", "Played", "Artist", "played"),
        ]);
        let history = vec![PlayedEntry {
            id: "played".into(),
            normalized_title: "played".into(),
        }];
        let pick = fx.resolver().find_related("current", &history).await.unwrap();
        assert_eq!(pick.canonical_id, "played");
        assert!(!pick.fresh);
    }

    #[tokio::test]
    async fn related_without_candidates_fails() {
        let fx = Fixture::new();
        fx.primary.set(vec![entry("https://r/1", "Current", "Artist", "current")]);
        let err = fx.resolver().find_related("current", &[]).await.unwrap_err();
        assert_eq!(err, ResolveError::NoRecommendation);
    }
}
