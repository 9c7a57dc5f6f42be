//! Open Graph page scraper.
//!
//! The lightweight fallback strategy of the resolver: fetch the page and read
//! `og:title` / `og:description` (falling back to `<title>`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::error::{ProviderError, ProviderResult};

use super::providers::{PageScraper, PageSummary};

/// Upper bound on the HTML body read for scraping.
const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

/// [`PageScraper`] backed by a shared `reqwest` client.
pub struct OpenGraphScraper {
    client: Client,
    timeout: Duration,
}

impl OpenGraphScraper {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!(
        r#"meta[property="{property}"], meta[name="{property}"]"#
    ))
    .ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn document_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

/// Extracts the Open Graph summary from raw HTML.
pub fn parse_page_summary(html: &str) -> Option<PageSummary> {
    let document = Html::parse_document(html);
    let title = meta_content(&document, "og:title").or_else(|| document_title(&document))?;
    let description = meta_content(&document, "og:description");
    Some(PageSummary { title, description })
}

#[async_trait]
impl PageScraper for OpenGraphScraper {
    async fn scrape(&self, url: &str) -> ProviderResult<PageSummary> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        let body = if body.len() > MAX_PAGE_BYTES {
            let mut end = MAX_PAGE_BYTES;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            &body[..end]
        } else {
            &body[..]
        };

        parse_page_summary(body)
            .ok_or_else(|| ProviderError::NotFound(format!("no title on {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_open_graph_tags() {
        let html = r#"<html><head>
            <meta property="og:title" content="Song Name">
            <meta property="og:description" content="Artist · Album · 2021">
            <title>ignored</title></head></html>"#;
        let summary = parse_page_summary(html).unwrap();
        assert_eq!(summary.title, "Song Name");
        assert_eq!(summary.description.as_deref(), Some("Artist · Album · 2021"));
    }

    #[test]
    fn falls_back_to_title_element() {
        let html = "<html><head><title> Plain Page </title></head></html>";
        let summary = parse_page_summary(html).unwrap();
        assert_eq!(summary.title, "Plain Page");
        assert!(summary.description.is_none());
    }

    #[test]
    fn page_without_title_is_none() {
        assert!(parse_page_summary("<html><body>nothing</body></html>").is_none());
    }
}
