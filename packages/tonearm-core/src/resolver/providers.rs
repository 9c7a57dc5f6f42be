//! Trait abstractions for the search/metadata collaborators.
//!
//! These traits enable dependency injection for testability and modularity.
//! The resolver depends on traits rather than concrete catalog clients; the
//! only implementation shipped here is the Open Graph [`PageScraper`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// One search hit from a catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Playable page or media URL.
    pub url: String,
    /// Upload title as shown by the catalog.
    pub title: String,
    /// Uploader/artist name, if the catalog reports one.
    pub source: Option<String>,
    /// Track length, if known.
    pub duration: Option<Duration>,
    /// Stable catalog identifier, if the catalog exposes one.
    pub id: Option<String>,
}

/// Metadata extracted from a single URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,
    pub source: Option<String>,
    pub duration: Option<Duration>,
    /// Stable identifier used as the cache key.
    pub canonical_id: Option<String>,
    /// Live streams are played directly and never cached.
    #[serde(default)]
    pub is_live: bool,
}

/// One recommendation from a radio/related provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntry {
    pub url: String,
    pub title: String,
    pub source: Option<String>,
    pub id: Option<String>,
}

/// Title and description scraped from a page's Open Graph tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSummary {
    pub title: String,
    pub description: Option<String>,
}

/// Trait for catalog search.
///
/// The resolver queries two of these concurrently: the primary catalog and a
/// music-specific one.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short provider name for logs and errors.
    fn name(&self) -> &str;

    /// Searches the catalog, returning at most `limit` results.
    async fn search(&self, query: &str, limit: usize) -> ProviderResult<Vec<SearchResult>>;
}

/// Trait for the generic metadata tool.
///
/// Must report protected pages with [`ProviderError::Restricted`](crate::error::ProviderError::Restricted).
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> ProviderResult<MediaMetadata>;
}

/// Trait for "radio"/recommendation providers.
#[async_trait]
pub trait RelatedProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns tracks related to the given canonical identifier.
    async fn related(&self, canonical_id: &str) -> ProviderResult<Vec<RelatedEntry>>;
}

/// Trait for lightweight HTML scraping of third-party pages.
#[async_trait]
pub trait PageScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> ProviderResult<PageSummary>;
}

/// Bundle of every collaborator the resolver talks to.
#[derive(Clone)]
pub struct Providers {
    /// Primary (general) catalog search.
    pub catalog_search: Arc<dyn SearchProvider>,
    /// Music-specific catalog search, preferred when merging.
    pub music_search: Arc<dyn SearchProvider>,
    /// Generic metadata tool.
    pub metadata: Arc<dyn MetadataExtractor>,
    /// Page scraping fallback.
    pub scraper: Arc<dyn PageScraper>,
    /// Primary radio provider, preferred when merging.
    pub primary_related: Arc<dyn RelatedProvider>,
    /// Secondary radio provider.
    pub secondary_related: Arc<dyn RelatedProvider>,
}
