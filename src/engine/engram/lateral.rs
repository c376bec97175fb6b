// ── Engram: Lateral Expander ────────────────────────────────────────────────
//
// Turns one ambiguous query into a weighted set of readings:
//
//   Literal       : the query as typed, weighted down as ambiguity rises
//   LateralFocus  : one per context axis the caller supplied; unresolved
//                   references are replaced by the axis value, otherwise the
//                   query is qualified with it
//   LateralShadow : readings under labels of axes the caller left open,
//                   drawn from the known-label vocabulary
//
// Raw weights are normalized by `QueryState::new`, which also guarantees a
// non-empty set.

use crate::atoms::engram_types::{
    ContextAxis, ContextDescriptor, ContextEvidence, Interpretation, InterpretationOrigin,
    LateralConfig, QueryState,
};
use crate::engine::engram::ambiguity::{AmbiguityReport, REFERENCE_RE};

/// Replace every reference word with `label`. Returns the new text and the
/// number of references resolved.
fn resolve_references(query: &str, label: &str) -> (String, usize) {
    match REFERENCE_RE.as_ref() {
        Some(re) => {
            let n = re.find_iter(query).count();
            if n == 0 {
                return (query.to_string(), 0);
            }
            (re.replace_all(query, regex::NoExpand(label)).into_owned(), n)
        }
        // Without the pattern nothing can be substituted; callers qualify instead.
        None => (query.to_string(), 0),
    }
}

fn qualify(query: &str, label: &str) -> String {
    format!("{} ({})", query.trim(), label.trim())
}

pub struct LateralExpander {
    config: LateralConfig,
}

impl LateralExpander {
    pub fn new(config: LateralConfig) -> Self {
        Self { config }
    }

    /// Candidate readings of `query` with raw (unnormalized) weights.
    pub fn candidates(
        &self,
        query: &str,
        evidence: &ContextEvidence,
        ambiguity: &AmbiguityReport,
        vocabulary: &[(ContextAxis, String, usize)],
    ) -> Vec<Interpretation> {
        let context = evidence.effective_context();
        let mut out = Vec::new();

        let literal_weight =
            (self.config.literal_baseline * (1.0 - ambiguity.score)).max(self.config.literal_floor);
        out.push(Interpretation {
            text: query.to_string(),
            weight: literal_weight,
            origin: InterpretationOrigin::Literal,
            context: context.clone(),
        });

        for axis in context.present_axes() {
            let Some(label) = context.get(axis) else { continue };
            let (resolved, n) = resolve_references(query, label);
            let text = if n > 0 { resolved } else { qualify(query, label) };
            out.push(Interpretation {
                text,
                weight: self.config.focus_unit * (1 + n) as f32,
                origin: InterpretationOrigin::LateralFocus,
                context: ContextDescriptor::default().with(axis, label),
            });
        }

        let absent = context.absent_axes();
        let mut shadows: Vec<&(ContextAxis, String, usize)> =
            vocabulary.iter().filter(|(axis, _, _)| absent.contains(axis)).collect();
        shadows.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.1.cmp(&b.1)).then_with(|| a.0.cmp(&b.0)));
        for (axis, label, _) in shadows.into_iter().take(self.config.max_shadows) {
            let (resolved, n) = resolve_references(query, label);
            let text = if n > 0 { resolved } else { qualify(query, label) };
            out.push(Interpretation {
                text,
                weight: self.config.shadow_unit,
                origin: InterpretationOrigin::LateralShadow,
                context: ContextDescriptor::default().with(*axis, label.clone()),
            });
        }
        out
    }

    /// Normalized superposition of the candidate readings.
    pub fn expand(
        &self,
        query: &str,
        evidence: &ContextEvidence,
        ambiguity: &AmbiguityReport,
        vocabulary: &[(ContextAxis, String, usize)],
    ) -> QueryState {
        let candidates = self.candidates(query, evidence, ambiguity, vocabulary);
        QueryState::new(query, candidates, &evidence.effective_context())
    }
}

impl Default for LateralExpander {
    fn default() -> Self {
        Self::new(LateralConfig::default())
    }
}
