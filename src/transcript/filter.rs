//! Non-speech annotation filtering.
//!
//! Streaming recognizers emit acoustic-event annotations like `"(music)"`,
//! `"[Applause]"` or `"*laughs*"` as transcript text. These must not become
//! segments or trigger speaker identification. The heuristic is literal
//! bracket/marker matching; it stays behind a trait because bracketed
//! legitimate speech exists and callers may want a smarter filter.

use regex::Regex;

pub trait AnnotationFilter: Send + Sync {
    /// Returns `true` when the text is a non-speech annotation.
    fn is_annotation(&self, text: &str) -> bool;

    fn name(&self) -> &'static str;
}

/// Default filter: fully-wrapped delimiter pairs and known markers.
pub struct BracketAnnotationFilter {
    marker_re: Regex,
}

impl Default for BracketAnnotationFilter {
    fn default() -> Self {
        let marker_re = Regex::new(
            r"(?i)\b(inaudible|crosstalk|blank[ _]audio|foreign language|music|applause|laught?er|laughs|silence)\b",
        )
        .expect("marker regex is valid");
        Self { marker_re }
    }
}

impl AnnotationFilter for BracketAnnotationFilter {
    fn is_annotation(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.len() > 2 && is_fully_wrapped(trimmed) {
            return true;
        }
        self.marker_re.is_match(trimmed)
    }

    fn name(&self) -> &'static str {
        "BracketAnnotationFilter"
    }
}

fn is_fully_wrapped(text: &str) -> bool {
    let bytes = text.as_bytes();
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    matches!(
        (first, last),
        (b'(', b')') | (b'[', b']') | (b'*', b'*')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> BracketAnnotationFilter {
        BracketAnnotationFilter::default()
    }

    #[test]
    fn parenthesized_annotation_is_filtered() {
        assert!(filter().is_annotation("(music)"));
    }

    #[test]
    fn bracketed_annotation_is_filtered() {
        assert!(filter().is_annotation("[Applause]"));
    }

    #[test]
    fn starred_annotation_is_filtered() {
        assert!(filter().is_annotation("*laughs*"));
    }

    #[test]
    fn known_marker_inside_text_is_filtered() {
        assert!(filter().is_annotation("speaker 2: [inaudible] yes"));
        assert!(filter().is_annotation("CROSSTALK"));
        assert!(filter().is_annotation("blank audio"));
    }

    #[test]
    fn normal_speech_passes() {
        assert!(!filter().is_annotation("let's look at the quarterly numbers"));
    }

    #[test]
    fn short_delimiter_pairs_pass() {
        // Length must exceed 2 for the wrap rule.
        assert!(!filter().is_annotation("()"));
        assert!(!filter().is_annotation("**"));
    }

    #[test]
    fn partially_bracketed_speech_passes() {
        assert!(!filter().is_annotation("(well) that went fine"));
    }

    #[test]
    fn musical_word_in_speech_is_not_matched() {
        // "musical" does not hit the \bmusic\b marker.
        assert!(!filter().is_annotation("the musical interlude was nice"));
    }
}
