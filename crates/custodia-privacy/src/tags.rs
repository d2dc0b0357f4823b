//! Topical tag extraction.
//!
//! A single case-insensitive Aho-Corasick automaton holds the keywords of
//! every tag; one pass over the text yields all tags present. Keywords match
//! whole words only, optionally followed by a plural `s`, so `tax` tags
//! "tax return" but not "syntax".

use std::collections::BTreeSet;

use aho_corasick::{AhoCorasick, MatchKind};

const TAG_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "financial",
        &["bank", "payment", "invoice", "salary", "credit", "tax", "budget", "expense", "loan", "$"],
    ),
    (
        "personal",
        &["birthday", "address", "phone", "password", "diary", "ssn", "passport", "my "],
    ),
    (
        "health",
        &["doctor", "hospital", "medication", "prescription", "symptom", "therapy", "allergy", "workout"],
    ),
    (
        "work",
        &["meeting", "project", "deadline", "client", "office", "manager", "report", "colleague"],
    ),
    (
        "family",
        &["mom", "dad", "mother", "father", "sister", "brother", "kids", "wife", "husband", "family"],
    ),
];

/// Maps text to the set of topical tags whose keywords it contains.
pub struct TagExtractor {
    automaton: Option<AhoCorasick>,
    /// Tag name for each automaton pattern index.
    pattern_tags: Vec<&'static str>,
}

impl TagExtractor {
    pub fn new() -> Self {
        let mut keywords = Vec::new();
        let mut pattern_tags = Vec::new();
        for (tag, words) in TAG_KEYWORDS {
            for word in *words {
                keywords.push(*word);
                pattern_tags.push(*tag);
            }
        }

        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(&keywords);

        match automaton {
            Ok(ac) => {
                tracing::trace!(count = keywords.len(), "tag automaton built");
                Self {
                    automaton: Some(ac),
                    pattern_tags,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to build tag automaton; tagging disabled");
                Self {
                    automaton: None,
                    pattern_tags,
                }
            }
        }
    }

    /// Sorted, de-duplicated tags for `text`.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let Some(ac) = self.automaton.as_ref() else {
            return Vec::new();
        };
        let tags: BTreeSet<&str> = ac
            .find_overlapping_iter(text)
            .filter(|m| whole_word(text, m.start(), m.end()))
            .filter_map(|m| self.pattern_tags.get(m.pattern().as_usize()).copied())
            .collect();
        tags.into_iter().map(str::to_string).collect()
    }
}

/// Whether `text[start..end]` stands alone as a word. Edges that are not
/// alphanumeric themselves (`$`, a trailing space) need no boundary.
fn whole_word(text: &str, start: usize, end: usize) -> bool {
    let (Some(before), Some(matched), Some(after)) =
        (text.get(..start), text.get(start..end), text.get(end..))
    else {
        return false;
    };
    let word_char = |c: char| c.is_alphanumeric();

    let first_is_word = matched.chars().next().is_some_and(word_char);
    if first_is_word && before.chars().next_back().is_some_and(word_char) {
        return false;
    }

    let last_is_word = matched.chars().next_back().is_some_and(word_char);
    if !last_is_word {
        return true;
    }
    let rest = after.strip_prefix(['s', 'S']).unwrap_or(after);
    !rest.chars().next().is_some_and(word_char)
}

impl Default for TagExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_multiple_tags_case_insensitively() {
        let tags = TagExtractor::new().extract("Pay the Doctor invoice before the MEETING");
        assert_eq!(tags, vec!["financial", "health", "work"]);
    }

    #[test]
    fn no_keywords_no_tags() {
        assert!(TagExtractor::new().extract("the weather is nice").is_empty());
    }

    #[test]
    fn keywords_inside_other_words_do_not_tag() {
        let extractor = TagExtractor::new();
        assert!(extractor.extract("a syntax error at this moment").is_empty());
        assert!(extractor.extract("the economy improved").is_empty());
        assert!(extractor.extract("bankrupt metaphor").is_empty());
    }

    #[test]
    fn whole_words_plurals_and_symbols_tag() {
        let extractor = TagExtractor::new();
        assert_eq!(extractor.extract("file the tax return"), vec!["financial"]);
        assert_eq!(extractor.extract("two banks, one loan."), vec!["financial"]);
        assert_eq!(extractor.extract("Meetings all day"), vec!["work"]);
        assert_eq!(extractor.extract("lunch was $12"), vec!["financial"]);
        assert_eq!(extractor.extract("call mom!"), vec!["family"]);
    }

    #[test]
    fn tags_are_deduplicated() {
        let tags = TagExtractor::new().extract("mom and dad and my sister");
        assert_eq!(tags, vec!["family", "personal"]);
    }
}
