// ── Engram: Ambiguity Detection ─────────────────────────────────────────────
//
// Scores how under-determined a query is, in [0, 1]:
//
//   score = 0.6 × referential pressure + 0.4 × interpretive entropy
//
// Referential pressure: share of anaphora/deixis among the query's meaningful
// words ("What is it?" is all reference, no content).
// Interpretive entropy: when query terms hit several known domain labels
// ("agents" → AI agents / travel agents / real-estate agents), the normalized
// entropy of those labels' usage counts. One or zero hits → 0.

use crate::atoms::engram_types::ContextAxis;
use crate::engine::engram::tokens::{self, ANAPHORA, DEIXIS};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

const PRESSURE_WEIGHT: f32 = 0.6;
const ENTROPY_WEIGHT: f32 = 0.4;

/// Whole-word, case-insensitive match of any reference word.
pub(crate) static REFERENCE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    let alternatives: Vec<&str> = ANAPHORA.iter().chain(DEIXIS.iter()).copied().collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).ok()
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmbiguityReport {
    pub score: f32,
    pub referential_pressure: f32,
    pub entropy: f32,
    /// Reference words found, lowercased, in order.
    pub references: Vec<String>,
    /// Domain labels the query terms hit.
    pub matched_labels: Vec<String>,
}

impl AmbiguityReport {
    pub fn is_ambiguous(&self, threshold: f32) -> bool {
        self.score >= threshold
    }
}

/// True when any word of `label` matches a query term (plural-folded).
fn label_hit(label: &str, folded_terms: &HashSet<String>) -> bool {
    tokens::words(label).iter().any(|w| folded_terms.contains(&tokens::fold(w)))
}

fn normalized_entropy(counts: &[usize]) -> f32 {
    if counts.len() < 2 {
        return 0.0;
    }
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let h: f64 = counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / total as f64;
            -p * p.ln()
        })
        .sum();
    (h / (counts.len() as f64).ln()).clamp(0.0, 1.0) as f32
}

/// Analyze `query` against the known label vocabulary.
pub fn analyze(query: &str, vocabulary: &[(ContextAxis, String, usize)]) -> AmbiguityReport {
    let references: Vec<String> = tokens::words(query).into_iter().filter(|w| tokens::is_reference(w)).collect();
    let terms = tokens::terms(query);

    let meaningful = references.len() + terms.len();
    let referential_pressure =
        if meaningful == 0 { 0.0 } else { (references.len() as f32 / meaningful as f32).min(1.0) };

    let folded: HashSet<String> = terms.iter().map(|t| tokens::fold(t)).collect();
    let hits: Vec<(&String, usize)> = vocabulary
        .iter()
        .filter(|(axis, label, _)| *axis == ContextAxis::Domain && label_hit(label, &folded))
        .map(|(_, label, count)| (label, *count))
        .collect();
    let counts: Vec<usize> = hits.iter().map(|(_, c)| *c).collect();
    let entropy = normalized_entropy(&counts);

    let score = (PRESSURE_WEIGHT * referential_pressure + ENTROPY_WEIGHT * entropy).clamp(0.0, 1.0);
    AmbiguityReport {
        score,
        referential_pressure,
        entropy,
        references,
        matched_labels: hits.into_iter().map(|(l, _)| l.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vec<(ContextAxis, String, usize)> {
        vec![
            (ContextAxis::Domain, "AI agents".into(), 2),
            (ContextAxis::Domain, "real-estate agents".into(), 2),
            (ContextAxis::Domain, "travel agents".into(), 2),
            (ContextAxis::Domain, "baking".into(), 5),
            (ContextAxis::Actor, "agent smith".into(), 1),
        ]
    }

    #[test]
    fn pure_reference_query_is_ambiguous() {
        let r = analyze("What is it?", &vocab());
        assert_eq!(r.references, vec!["it"]);
        assert!((r.referential_pressure - 1.0).abs() < 1e-6);
        assert_eq!(r.entropy, 0.0);
        assert!((r.score - 0.6).abs() < 1e-6);
        assert!(r.is_ambiguous(0.35));
    }

    #[test]
    fn polysemous_term_raises_entropy() {
        let r = analyze("Tell me about agents", &vocab());
        assert_eq!(r.matched_labels.len(), 3);
        assert!((r.entropy - 1.0).abs() < 1e-5);
        assert!((r.score - 0.4).abs() < 1e-5);
    }

    #[test]
    fn specific_query_is_not_ambiguous() {
        let r = analyze("sourdough baking schedule", &vocab());
        assert_eq!(r.matched_labels, vec!["baking".to_string()]);
        assert_eq!(r.score, 0.0);
        assert!(!r.is_ambiguous(0.35));
        assert_eq!(analyze("", &vocab()).score, 0.0);
    }

    #[test]
    fn reference_regex_matches_whole_words() {
        let re = REFERENCE_RE.as_ref().unwrap();
        assert!(re.is_match("Where is IT stored"));
        assert!(!re.is_match("iterate the items"));
    }
}
