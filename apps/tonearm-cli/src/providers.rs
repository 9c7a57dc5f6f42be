//! Providers available without catalog credentials.
//!
//! Search and radio need external catalogs, so the CLI ships placeholders
//! that report nothing found. Direct links still play, titled from the URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use tonearm_core::error::{ProviderError, ProviderResult};
use tonearm_core::{
    MediaMetadata, MetadataExtractor, OpenGraphScraper, Providers, RelatedEntry, RelatedProvider,
    SearchProvider, SearchResult,
};

/// A catalog that never has results.
pub struct NoCatalog {
    name: &'static str,
}

impl NoCatalog {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl SearchProvider for NoCatalog {
    fn name(&self) -> &str {
        self.name
    }

    async fn search(&self, query: &str, _limit: usize) -> ProviderResult<Vec<SearchResult>> {
        log::debug!("[{}] No catalog configured, cannot search {:?}", self.name, query);
        Ok(Vec::new())
    }
}

#[async_trait]
impl RelatedProvider for NoCatalog {
    fn name(&self) -> &str {
        self.name
    }

    async fn related(&self, canonical_id: &str) -> ProviderResult<Vec<RelatedEntry>> {
        Err(ProviderError::NotFound(format!(
            "no radio catalog configured for {canonical_id}"
        )))
    }
}

/// Titles a direct link after the last path segment of its URL.
pub struct UrlMetadata;

#[async_trait]
impl MetadataExtractor for UrlMetadata {
    async fn extract(&self, url: &str) -> ProviderResult<MediaMetadata> {
        let title = title_from_url(url)
            .ok_or_else(|| ProviderError::NotFound(format!("no title in {url}")))?;
        Ok(MediaMetadata {
            title,
            ..MediaMetadata::default()
        })
    }
}

fn title_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    // A literal '+' is a space in file names; an escaped one stays a plus.
    let segment = segment.replace('+', " ");
    let decoded = percent_decode_str(&segment).decode_utf8_lossy().into_owned();
    let stem = decoded
        .rsplit_once('.')
        .map_or(decoded.as_str(), |(stem, _)| stem);
    let title = stem
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!title.is_empty()).then_some(title)
}

/// Assembles the provider set for the CLI.
pub fn local_providers(client: reqwest::Client, scrape_timeout: Duration) -> Providers {
    let catalog = Arc::new(NoCatalog::new("Catalog"));
    let music = Arc::new(NoCatalog::new("Music"));
    Providers {
        catalog_search: catalog.clone(),
        music_search: music.clone(),
        metadata: Arc::new(UrlMetadata),
        scraper: Arc::new(OpenGraphScraper::new(client, scrape_timeout)),
        primary_related: music,
        secondary_related: catalog,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_come_from_the_last_segment() {
        assert_eq!(
            title_from_url("https://media.example.com/audio/Night_Drive-Mix.mp3?x=1").as_deref(),
            Some("Night Drive Mix")
        );
        assert_eq!(
            title_from_url("https://media.example.com/live/").as_deref(),
            Some("live")
        );
        assert_eq!(title_from_url("https://media.example.com/"), None);
        assert_eq!(title_from_url("not a link"), None);
    }

    #[test]
    fn titles_are_percent_decoded() {
        assert_eq!(
            title_from_url("https://cdn.example.com/a/Caf%C3%A9%2C%20Paris+Live.ogg").as_deref(),
            Some("Café, Paris Live")
        );
        assert_eq!(
            title_from_url("https://cdn.example.com/C%2B%2B_Talk.mp3").as_deref(),
            Some("C++ Talk")
        );
    }
}
