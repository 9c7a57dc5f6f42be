//! Title normalization and near-duplicate detection.
//!
//! Upload titles for the same song vary wildly ("Artist - Song (Official Video)",
//! "Song | Artist", "SongArtistVEVO"...). [`normalize`] reduces a title to its
//! meaningful lowercase alphanumeric tokens, and [`similar`] compares two
//! normalized titles with a weighted Jaccard score where rare tokens count more
//! than common ones ([`TokenWeights`], an inverse document frequency over a
//! corpus such as the session history).
//!
//! Everything here is pure: no I/O, no shared state.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::protocol_constants::SIMILARITY_THRESHOLD;

/// Lowercase letter or digit followed by an uppercase letter.
static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\p{Ll}|\d)(\p{Lu})").expect("valid camel-case regex"));

/// One bracketed block at the very end of the title.
static TRAILING_BRACKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[\(\[\{][^\(\)\[\]\{\}]*[\)\]\}]\s*$").expect("valid bracket regex")
});

/// Separators between "artist" and "song" parts of an upload title.
static SEGMENT_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\|\s*|\s+[-–—]\s+").expect("valid separator regex"));

/// Keeps only letters and digits, dropping everything else.
fn alphanumeric_only(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Replaces every non-alphanumeric char with a space and collapses runs.
fn collapse_tokens(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn expand_camel_case(s: &str) -> String {
    CAMEL_BOUNDARY.replace_all(s, "$1 $2").into_owned()
}

/// Reduces an upload title to the tokens that identify the song.
///
/// `source` is the attributed uploader/artist name; parts of the title that
/// merely repeat it are removed.
///
/// ```
/// use tonearm_core::similarity::normalize;
/// assert_eq!(normalize("Artist - Song (Official Video)", "Artist"), "song");
/// ```
pub fn normalize(title: &str, source: &str) -> String {
    let mut text = expand_camel_case(title).to_lowercase();

    // Several trailing blocks are common: "Song (Live) [HD]".
    loop {
        let stripped = TRAILING_BRACKET.replace(&text, "").into_owned();
        if stripped == text || stripped.trim().is_empty() {
            break;
        }
        text = stripped;
    }

    let source_lower = expand_camel_case(source).to_lowercase();
    let source_key = alphanumeric_only(&source_lower);

    if !source_key.is_empty() {
        let segments: Vec<&str> = SEGMENT_SEPARATOR.split(&text).collect();
        if segments.len() > 1 {
            let kept: Vec<&str> = segments
                .into_iter()
                .filter(|segment| alphanumeric_only(segment) != source_key)
                .collect();
            if !kept.is_empty() {
                text = kept.join(" ");
            }
        }

        let source_phrase = collapse_tokens(&source_lower);
        let collapsed = collapse_tokens(&text);
        let without_source = format!(" {collapsed} ")
            .replace(&format!(" {source_phrase} "), " ")
            .trim()
            .to_string();
        // A title that is nothing but the artist name keeps its tokens.
        text = if without_source.is_empty() {
            collapsed
        } else {
            without_source
        };
    }

    collapse_tokens(&text)
}

/// Splits a normalized title into its tokens.
pub fn tokenize(normalized: &str) -> Vec<&str> {
    normalized.split_whitespace().collect()
}

/// Inverse document frequency weights over a corpus of normalized titles.
#[derive(Debug, Clone, Default)]
pub struct TokenWeights {
    weights: HashMap<String, f64>,
    corpus_size: usize,
}

impl TokenWeights {
    /// Weight of a token, `ln(1 + N)` for tokens never seen in the corpus.
    pub fn weight(&self, token: &str) -> f64 {
        self.weights
            .get(token)
            .copied()
            .unwrap_or_else(|| (1.0 + self.corpus_size as f64).ln())
    }

    /// Number of documents the weights were computed from.
    pub fn corpus_size(&self) -> usize {
        self.corpus_size
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Computes `ln(1 + N / df(token))` for every token in the corpus.
///
/// `df` counts documents containing the token at least once.
pub fn weights<I, S>(corpus: I) -> TokenWeights
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut document_frequency: HashMap<String, usize> = HashMap::new();
    let mut corpus_size = 0usize;

    for doc in corpus {
        corpus_size += 1;
        let unique: HashSet<&str> = tokenize(doc.as_ref()).into_iter().collect();
        for token in unique {
            *document_frequency.entry(token.to_string()).or_insert(0) += 1;
        }
    }

    let n = corpus_size as f64;
    let weights = document_frequency
        .into_iter()
        .map(|(token, df)| (token, (1.0 + n / df as f64).ln()))
        .collect();

    TokenWeights {
        weights,
        corpus_size,
    }
}

/// Weighted Jaccard similarity of two normalized titles in `[0, 1]`.
pub fn similarity(a: &str, b: &str, weights: &TokenWeights) -> f64 {
    let left: HashSet<&str> = tokenize(a).into_iter().collect();
    let right: HashSet<&str> = tokenize(b).into_iter().collect();

    let shared: f64 = left
        .intersection(&right)
        .map(|token| weights.weight(token))
        .sum();
    let union: f64 = left.union(&right).map(|token| weights.weight(token)).sum();

    if union <= 0.0 {
        return 0.0;
    }
    shared / union
}

/// Returns true if two normalized titles name the same song.
pub fn similar(a: &str, b: &str, weights: &TokenWeights) -> bool {
    a == b || similarity(a, b, weights) >= SIMILARITY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bracket_and_artist_segment() {
        assert_eq!(normalize("Artist - Song (Official Video)", "Artist"), "song");
    }

    #[test]
    fn strips_multiple_trailing_blocks() {
        assert_eq!(
            normalize("Some Song (Live) [HD]", "Nobody"),
            "some song"
        );
    }

    #[test]
    fn strips_pipe_segment_matching_source() {
        assert_eq!(normalize("Night Drive | The Band", "The Band"), "night drive");
    }

    #[test]
    fn camel_case_suffix_separates_from_artist() {
        // "ArtistVEVO" expands to "artist vevo", the source phrase is removed
        // and only the channel suffix and song tokens survive.
        assert_eq!(normalize("Song by ArtistVEVO", "Artist"), "song by vevo");
    }

    #[test]
    fn removes_inline_source_mentions() {
        assert_eq!(normalize("Daft Punk Around The World", "Daft Punk"), "around the world");
    }

    #[test]
    fn title_of_only_the_artist_is_kept() {
        assert_eq!(normalize("Artist", "Artist"), "artist");
    }

    #[test]
    fn keeps_only_alphanumeric_tokens() {
        assert_eq!(normalize("  Héllo,   wörld!!  ", ""), "héllo wörld");
    }

    #[test]
    fn empty_corpus_yields_empty_weights() {
        let w = weights(Vec::<String>::new());
        assert!(w.is_empty());
        assert_eq!(w.corpus_size(), 0);
    }

    #[test]
    fn weights_follow_inverse_document_frequency() {
        let w = weights(["a b", "a c", "a a d"]);
        // "a" appears in all three documents, "b" in one.
        assert!((w.weight("a") - (1.0f64 + 3.0 / 3.0).ln()).abs() < 1e-12);
        assert!((w.weight("b") - (1.0f64 + 3.0).ln()).abs() < 1e-12);
        // Unseen tokens weigh ln(1 + N).
        assert!((w.weight("zzz") - (1.0f64 + 3.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn identical_titles_are_similar() {
        let w = weights(["one two", "three four"]);
        assert!(similar("one two", "one two", &w));
    }

    #[test]
    fn verbatim_equality_wins_with_empty_weights() {
        let w = TokenWeights::default();
        assert!(similar(
            "totally different words",
            "totally different words",
            &w
        ));
    }

    #[test]
    fn rare_shared_tokens_dominate() {
        let corpus = [
            "bohemian rhapsody",
            "bohemian rhapsody live",
            "song one live",
            "song two live",
            "song three live",
        ];
        let w = weights(corpus);
        // "live" is common, so missing it barely matters.
        assert!(similar("bohemian rhapsody", "bohemian rhapsody live", &w));
        // "one" and "two" are rare, so they tell the titles apart.
        assert!(!similar("song one live", "song two live", &w));
    }

    #[test]
    fn disjoint_titles_score_zero() {
        let w = weights(["alpha", "beta"]);
        assert_eq!(similarity("alpha", "beta", &w), 0.0);
        assert!(!similar("alpha", "beta", &w));
    }
}
