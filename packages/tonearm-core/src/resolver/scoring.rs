//! Best-candidate selection for search results.

use std::time::Duration;

use crate::similarity::{normalize, similar, weights};

use super::providers::SearchResult;

/// Duration delta that earns the full duration bonus.
const DURATION_CLOSE: Duration = Duration::from_millis(2500);
/// Duration delta that earns the partial duration bonus.
const DURATION_NEAR: Duration = Duration::from_secs(6);

const SCORE_DURATION_CLOSE: i32 = 100;
const SCORE_DURATION_NEAR: i32 = 40;
const SCORE_SOURCE_EXACT: i32 = 80;
const SCORE_SOURCE_PARTIAL: i32 = 30;
const SCORE_TITLE_SIMILAR: i32 = 50;

/// What the resolver is looking for.
#[derive(Debug, Clone, Default)]
pub struct MatchTarget {
    /// Normalized title of the wanted song.
    pub normalized_title: String,
    /// Artist/uploader the song is attributed to, if known.
    pub source: Option<String>,
    /// Expected length, if known.
    pub duration: Option<Duration>,
}

fn duration_score(candidate: Option<Duration>, target: Option<Duration>) -> i32 {
    let (Some(candidate), Some(target)) = (candidate, target) else {
        return 0;
    };
    let delta = candidate.abs_diff(target);
    if delta < DURATION_CLOSE {
        SCORE_DURATION_CLOSE
    } else if delta < DURATION_NEAR {
        SCORE_DURATION_NEAR
    } else {
        0
    }
}

fn source_score(candidate: Option<&str>, target: Option<&str>) -> i32 {
    let (Some(candidate), Some(target)) = (candidate, target) else {
        return 0;
    };
    let candidate = candidate.trim().to_lowercase();
    let target = target.trim().to_lowercase();
    if candidate.is_empty() || target.is_empty() {
        return 0;
    }
    if candidate == target {
        SCORE_SOURCE_EXACT
    } else if candidate.contains(&target) || target.contains(&candidate) {
        SCORE_SOURCE_PARTIAL
    } else {
        0
    }
}

/// Picks the highest scoring candidate; ties keep the first one seen.
///
/// Scores: +100 if the duration is within 2.5s of the target, +40 within 6s;
/// +80 for an exact source match, +30 for a substring match; +50 if the
/// normalized titles are similar.
pub fn best_candidate<'a>(
    candidates: &'a [SearchResult],
    target: &MatchTarget,
) -> Option<&'a SearchResult> {
    let source_hint = target.source.as_deref().unwrap_or("");
    let normalized: Vec<String> = candidates
        .iter()
        .map(|c| normalize(&c.title, c.source.as_deref().unwrap_or(source_hint)))
        .collect();

    let corpus = normalized
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(target.normalized_title.as_str()));
    let token_weights = weights(corpus);

    let mut best: Option<(i32, &SearchResult)> = None;
    for (candidate, title) in candidates.iter().zip(&normalized) {
        let mut score = duration_score(candidate.duration, target.duration);
        score += source_score(candidate.source.as_deref(), target.source.as_deref());
        if !target.normalized_title.is_empty()
            && similar(title, &target.normalized_title, &token_weights)
        {
            score += SCORE_TITLE_SIMILAR;
        }

        log::trace!(
            "[Resolver] candidate score={} title={:?} url={}",
            score,
            candidate.title,
            candidate.url
        );

        if best.map_or(true, |(top, _)| score > top) {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, candidate)| candidate)
}
