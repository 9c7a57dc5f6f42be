//! Restricted-content classification.
//!
//! Decides from the URL alone whether a third-party page is likely a
//! protected streaming player. The decision only tunes how the resolver races
//! its strategies; the metadata tool still has the final word.

use reqwest::Url;

use crate::config::RestrictedPatterns;

/// What the resolver may expect from a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCapability {
    /// Audio is probably extractable.
    Open,
    /// Looks like a protected player page: short-circuit the metadata tool.
    SuspectedRestricted,
}

impl ContentCapability {
    #[inline]
    pub fn is_suspected(self) -> bool {
        self == Self::SuspectedRestricted
    }
}

/// Classifies a URL against the pattern table.
///
/// A page is suspected when its leading host label is a known player prefix
/// (`open.`, `listen.`...) on a host with at least three labels, or when a path
/// segment names a catalog item (`/track/`, `/album/`...). Unparseable input is
/// treated as [`ContentCapability::Open`].
pub fn classify(url: &str, patterns: &RestrictedPatterns) -> ContentCapability {
    let Ok(parsed) = Url::parse(url) else {
        return ContentCapability::Open;
    };
    let Some(host) = parsed.host_str() else {
        return ContentCapability::Open;
    };

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 3 {
        let first = labels[0].to_ascii_lowercase();
        if patterns
            .subdomain_prefixes
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&first))
        {
            return ContentCapability::SuspectedRestricted;
        }
    }

    let suspicious_path = parsed
        .path_segments()
        .map(|mut segments| {
            segments.any(|segment| {
                patterns
                    .path_segments
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(segment))
            })
        })
        .unwrap_or(false);

    if suspicious_path {
        ContentCapability::SuspectedRestricted
    } else {
        ContentCapability::Open
    }
}
