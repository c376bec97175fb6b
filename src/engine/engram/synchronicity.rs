// ── Engram: Synchronicity Discovery ─────────────────────────────────────────
//
// Finds pairs of items that sit far apart in context (different domains,
// little descriptor overlap) yet land close together in embedding space.
// Such pairs are recorded as advisory links; nothing else depends on them.
//
// The scan is a bounded pairwise pass over compressed embeddings. It checks
// the cancel token once per outer item and stops after `max_comparisons`,
// leaving the rest for the next sweep.

use crate::atoms::engram_types::{
    ContextAxis, ContextDescriptor, MemoryItem, SynchronicityConfig, SynchronicityLink,
};
use crate::engine::engram::cancel::CancelToken;
use crate::engine::engram::codec::Codec;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashSet;

/// Outcome of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryPass {
    pub links: Vec<SynchronicityLink>,
    pub comparisons: usize,
    /// Stopped early by cancellation or the comparison budget.
    pub truncated: bool,
}

/// True when two descriptors are unrelated enough for a link to be surprising.
pub fn eligible(a: &ContextDescriptor, b: &ContextDescriptor, max_descriptor_similarity: f32) -> bool {
    !a.agrees_on(b, ContextAxis::Domain) && a.similarity(b) < max_descriptor_similarity
}

fn label(ctx: &ContextDescriptor) -> &str {
    ctx.domain.as_deref().unwrap_or("unlabelled")
}

fn rationale(a: &MemoryItem, b: &MemoryItem, strength: f32, descriptor_similarity: f32) -> String {
    format!(
        "embedding similarity {:.2} across domains '{}' and '{}' (descriptor overlap {:.2})",
        strength,
        label(&a.context),
        label(&b.context),
        descriptor_similarity
    )
}

/// Scan `items` for new links. Pairs in `existing` (ordered ids) are skipped.
pub fn discover(
    items: &[MemoryItem],
    existing: &HashSet<(String, String)>,
    codec: &Codec,
    config: &SynchronicityConfig,
    cancel: &CancelToken,
    now: DateTime<Utc>,
) -> DiscoveryPass {
    let mut pass = DiscoveryPass::default();
    if !config.enabled {
        return pass;
    }

    let embedded: Vec<&MemoryItem> = items.iter().filter(|i| i.embedding.compressed().is_some()).collect();

    'outer: for (n, a) in embedded.iter().enumerate() {
        if cancel.is_cancelled() {
            pass.truncated = true;
            break;
        }
        let Some(ea) = a.embedding.compressed() else { continue };
        for b in &embedded[n + 1..] {
            if pass.comparisons >= config.max_comparisons {
                pass.truncated = true;
                break 'outer;
            }
            let Some(eb) = b.embedding.compressed() else { continue };
            let key = if a.id < b.id { (a.id.clone(), b.id.clone()) } else { (b.id.clone(), a.id.clone()) };
            if existing.contains(&key) {
                continue;
            }
            let overlap = a.context.similarity(&b.context);
            if !eligible(&a.context, &b.context, config.max_descriptor_similarity) {
                continue;
            }
            pass.comparisons += 1;
            let strength = codec.similarity(ea, eb);
            if strength >= config.threshold {
                if let Some(link) = SynchronicityLink::new(&a.id, &b.id, strength, rationale(a, b, strength, overlap), now) {
                    pass.links.push(link);
                }
            }
        }
    }

    debug!(
        "[engram:sync] {} comparisons, {} new links{}",
        pass.comparisons,
        pass.links.len(),
        if pass.truncated { " (truncated)" } else { "" }
    );
    pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::engram_types::{EmbeddingState, MemoryTier};
    use crate::engine::engram::codec;

    fn item(id: &str, domain: &str, hot: &[usize]) -> MemoryItem {
        let mut v = vec![0.0f32; 50];
        for &i in hot {
            v[i] = 1.0;
        }
        let mut it = MemoryItem::new(
            id.into(),
            format!("content {}", id),
            MemoryTier::LongTerm,
            ContextDescriptor::with_domain(domain),
            String::new(),
            Utc::now(),
        );
        it.embedding = EmbeddingState::Compressed(codec::compress(&v, 0.1));
        it
    }

    #[test]
    fn links_similar_items_across_domains() {
        let items = vec![
            item("a", "biology", &[1, 2, 3]),
            item("b", "distributed systems", &[1, 2, 3]),
            item("c", "biology", &[1, 2, 3]),
            item("d", "cooking", &[30, 31, 32]),
        ];
        let pass = discover(
            &items,
            &HashSet::new(),
            &Codec::default(),
            &SynchronicityConfig::default(),
            &CancelToken::new(),
            Utc::now(),
        );
        let pairs: Vec<(String, String)> =
            pass.links.iter().map(|l| (l.source_id.clone(), l.target_id.clone())).collect();
        // a-c share a domain, d points elsewhere
        assert_eq!(pairs, vec![("a".into(), "b".into()), ("b".into(), "c".into())]);
        assert!(pass.links[0].rationale.contains("biology"));
    }

    #[test]
    fn respects_existing_pairs_budget_and_cancel() {
        let items = vec![item("a", "x", &[1]), item("b", "y", &[1]), item("c", "z", &[1])];
        let existing = HashSet::from([("a".to_string(), "b".to_string())]);
        let codec = Codec::default();
        let pass = discover(&items, &existing, &codec, &SynchronicityConfig::default(), &CancelToken::new(), Utc::now());
        assert_eq!(pass.links.len(), 2);

        let cfg = SynchronicityConfig { max_comparisons: 1, ..Default::default() };
        let pass = discover(&items, &HashSet::new(), &codec, &cfg, &CancelToken::new(), Utc::now());
        assert_eq!(pass.links.len(), 1);
        assert!(pass.truncated);

        let cancel = CancelToken::new();
        cancel.cancel();
        let pass = discover(&items, &HashSet::new(), &codec, &SynchronicityConfig::default(), &cancel, Utc::now());
        assert!(pass.links.is_empty());
        assert!(pass.truncated);
    }
}
