// ── Engram: Query Tokens ────────────────────────────────────────────────────
//
// Shared word splitting for keyword coverage, FTS query building and
// ambiguity analysis. Lowercase alphanumeric runs; hyphens split words.

use std::collections::HashSet;

/// Function words that carry no topical content.
const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "been", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has",
    "have", "how", "i", "if", "in", "into", "is", "just", "me", "my", "of", "on", "or", "our",
    "so", "some", "than", "the", "to", "too", "us", "was", "we", "were", "what", "when",
    "where", "which", "who", "whom", "why", "will", "with", "would", "you", "your",
];

/// Pronouns that point back at something said earlier.
pub(crate) const ANAPHORA: &[&str] = &[
    "it", "its", "they", "them", "their", "theirs", "he", "him", "his", "she", "her", "hers",
    "itself", "themselves", "one", "ones",
];

/// Words whose meaning depends on where or when they are said.
pub(crate) const DEIXIS: &[&str] = &["this", "that", "these", "those", "here", "there", "now", "then"];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

pub fn is_reference(word: &str) -> bool {
    ANAPHORA.contains(&word) || DEIXIS.contains(&word)
}

/// Every lowercase word in `text`, in order, duplicates kept.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Crude plural folding so "agents" matches "agent".
pub fn fold(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Content-bearing terms of `text`: no stopwords, no reference words, no
/// single letters. Deduplicated in first-seen order.
pub fn terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() >= 2 && !is_stopword(w) && !is_reference(w))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Fraction of `query_terms` present in `content` (after plural folding).
pub fn keyword_coverage(query_terms: &[String], content: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_words: HashSet<String> = words(content).iter().map(|w| fold(w)).collect();
    let hits = query_terms.iter().filter(|t| content_words.contains(&fold(t))).count();
    hits as f32 / query_terms.len() as f32
}

/// FTS5 MATCH expression: each term quoted and OR-joined. Text made only of
/// function or reference words ("is this it?") falls back to requiring all
/// of its words. `None` when the text has no words at all.
pub fn fts_match_expression(text: &str) -> Option<String> {
    let quote = |w: String| format!("\"{}\"", w);
    let parts: Vec<String> = terms(text).into_iter().map(quote).collect();
    if !parts.is_empty() {
        return Some(parts.join(" OR "));
    }
    let mut seen = HashSet::new();
    let parts: Vec<String> = words(text).into_iter().filter(|w| seen.insert(w.clone())).map(quote).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_drop_function_words_and_references() {
        assert_eq!(terms("What is it?"), Vec::<String>::new());
        assert_eq!(terms("Tell me about real-estate agents"), vec!["tell", "real", "estate", "agents"]);
        assert_eq!(terms("agents agents AGENTS"), vec!["agents"]);
    }

    #[test]
    fn coverage_folds_plurals() {
        let q = terms("travel agents");
        assert!((keyword_coverage(&q, "An agent who books travel") - 1.0).abs() < 1e-6);
        assert!((keyword_coverage(&q, "travel insurance") - 0.5).abs() < 1e-6);
        assert_eq!(keyword_coverage(&[], "anything"), 0.0);
    }

    #[test]
    fn fts_expression_is_quoted() {
        assert_eq!(fts_match_expression("AI agents?").as_deref(), Some("\"ai\" OR \"agents\""));
        assert_eq!(fts_match_expression("What is it?").as_deref(), Some("\"what\" AND \"is\" AND \"it\""));
        assert_eq!(fts_match_expression("it, it... IT"), Some("\"it\"".to_string()));
        assert_eq!(fts_match_expression(" ?! "), None);
        // FTS5 operators never leak through
        assert_eq!(fts_match_expression("NEAR(a) -b").as_deref(), Some("\"near\""));
    }
}
