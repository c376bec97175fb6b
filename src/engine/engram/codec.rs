// ── Engram: Compressed Embedding Codec ──────────────────────────────────────
//
// Sparsifies a dense embedding by keeping its highest-magnitude dimensions and
// scores similarity directly on the sparse form.
//
//   compress   : top-k by |v|, k = max(1, floor(ratio × dim)), ties → lower index
//   similarity : dot over shared indices / retained norms × correction, in [-1, 1]
//   validate   : structural checks + sparsity ceiling; failures are CorruptEmbedding
//
// Corrupt input never escapes a query: similarity() returns 0 for anything
// that does not validate structurally.

use crate::atoms::engram_types::{CodecConfig, CompressedEmbedding};
use crate::atoms::error::{EngineError, EngineResult};

/// Number of dimensions `compress` keeps for a vector of `dim` entries.
pub fn retained_count(dim: usize, ratio: f32) -> usize {
    if dim == 0 {
        return 0;
    }
    let k = (ratio.max(0.0) as f64 * dim as f64).floor() as usize;
    k.clamp(1, dim)
}

/// Largest retained count a persisted embedding may carry.
pub fn sparsity_bound(dim: usize, ceiling: f32) -> usize {
    // Guard against f32 → f64 widening pushing an exact product over the integer.
    let bound = (ceiling as f64 * dim as f64 - 1e-6).ceil().max(1.0) as usize;
    bound.min(dim)
}

fn magnitude(v: f32) -> f32 {
    if v.is_finite() {
        v.abs()
    } else {
        0.0
    }
}

/// Compress a dense vector, keeping the top-k dimensions by magnitude.
///
/// Exact zeros among the top-k are dropped (they carry nothing), but at least
/// one dimension is always retained.
pub fn compress(dense: &[f32], ratio: f32) -> CompressedEmbedding {
    let dim = dense.len();
    if dim == 0 {
        return CompressedEmbedding {
            original_dim: 0,
            indices: Vec::new(),
            values: Vec::new(),
            sparsity_ratio: 0.0,
        };
    }

    let k = retained_count(dim, ratio);
    let mut order: Vec<usize> = (0..dim).collect();
    order.sort_by(|&a, &b| {
        magnitude(dense[b])
            .partial_cmp(&magnitude(dense[a]))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut keep: Vec<usize> = order[..k].iter().copied().filter(|&i| magnitude(dense[i]) > 0.0).collect();
    if keep.is_empty() {
        keep.push(order[0]);
    }
    keep.sort_unstable();

    let values = keep
        .iter()
        .map(|&i| if dense[i].is_finite() { dense[i] } else { 0.0 })
        .collect();
    let indices: Vec<u32> = keep.iter().map(|&i| i as u32).collect();
    let sparsity_ratio = indices.len() as f32 / dim as f32;

    CompressedEmbedding { original_dim: dim as u32, indices, values, sparsity_ratio }
}

/// Structural validity: lengths match, indices strictly ascending and in range,
/// values finite, non-zero dimension.
pub fn validate_structure(c: &CompressedEmbedding) -> EngineResult<()> {
    if c.original_dim == 0 {
        return Err(EngineError::CorruptEmbedding("original_dim is 0".into()));
    }
    if c.indices.len() != c.values.len() {
        return Err(EngineError::CorruptEmbedding(format!(
            "{} indices vs {} values",
            c.indices.len(),
            c.values.len()
        )));
    }
    if c.indices.is_empty() {
        return Err(EngineError::CorruptEmbedding("no retained dimensions".into()));
    }
    let mut prev: Option<u32> = None;
    for &idx in &c.indices {
        if idx >= c.original_dim {
            return Err(EngineError::CorruptEmbedding(format!(
                "index {} out of range for dim {}",
                idx, c.original_dim
            )));
        }
        if prev.is_some_and(|p| p >= idx) {
            return Err(EngineError::CorruptEmbedding("indices not strictly ascending".into()));
        }
        prev = Some(idx);
    }
    if c.values.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::CorruptEmbedding("non-finite value".into()));
    }
    Ok(())
}

/// Full validation used on load: structure plus the sparsity ceiling.
pub fn validate(c: &CompressedEmbedding, ceiling: f32) -> EngineResult<()> {
    validate_structure(c)?;
    let bound = sparsity_bound(c.original_dim as usize, ceiling);
    if c.indices.len() > bound {
        return Err(EngineError::CorruptEmbedding(format!(
            "{} retained dimensions exceed bound {} (dim {}, ceiling {})",
            c.indices.len(),
            bound,
            c.original_dim,
            ceiling
        )));
    }
    Ok(())
}

/// Approximate cosine similarity on compressed forms. 0 for mismatched
/// dimensions or corrupt input.
pub fn similarity(a: &CompressedEmbedding, b: &CompressedEmbedding, correction: f32) -> f32 {
    if a.original_dim != b.original_dim {
        return 0.0;
    }
    if validate_structure(a).is_err() || validate_structure(b).is_err() {
        return 0.0;
    }

    let (mut i, mut j) = (0usize, 0usize);
    let mut dot = 0.0f64;
    while i < a.indices.len() && j < b.indices.len() {
        match a.indices[i].cmp(&b.indices[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a.values[i] as f64 * b.values[j] as f64;
                i += 1;
                j += 1;
            }
        }
    }

    let norm_a: f64 = a.values.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.values.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
    let denom = norm_a * norm_b;
    if denom < 1e-12 {
        return 0.0;
    }
    ((dot / denom) as f32 * correction).clamp(-1.0, 1.0)
}

/// Codec bound to a configuration.
#[derive(Debug, Clone)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn compress(&self, dense: &[f32]) -> CompressedEmbedding {
        compress(dense, self.config.sparsity_ratio)
    }

    pub fn similarity(&self, a: &CompressedEmbedding, b: &CompressedEmbedding) -> f32 {
        similarity(a, b, self.config.correction_factor)
    }

    pub fn validate(&self, c: &CompressedEmbedding) -> EngineResult<()> {
        validate(c, self.config.sparsity_ceiling)
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(dim: usize) -> Vec<f32> {
        (0..dim).map(|i| ((i * 37 % 101) as f32 - 50.0) / 50.0).collect()
    }

    #[test]
    fn keeps_top_k_by_magnitude() {
        let dense = vec![0.1, -0.9, 0.3, 0.8, -0.05, 0.0, 0.2, 0.4, 0.05, 0.6];
        let c = compress(&dense, 0.3);
        assert_eq!(c.original_dim, 10);
        // |−0.9|, 0.8, 0.6 → indices 1, 3, 9 (ascending), sign preserved
        assert_eq!(c.indices, vec![1, 3, 9]);
        assert_eq!(c.values, vec![-0.9, 0.8, 0.6]);
        assert!((c.sparsity_ratio - 0.3).abs() < 1e-6);
    }

    #[test]
    fn ties_prefer_lower_index() {
        let dense = vec![0.5, -0.5, 0.5, 0.5];
        let c = compress(&dense, 0.5);
        assert_eq!(c.indices, vec![0, 1]);
    }

    #[test]
    fn always_keeps_at_least_one() {
        let dense = vec![0.0, 0.0, 0.7];
        let c = compress(&dense, 0.01);
        assert_eq!(c.indices, vec![2]);
        let zeros = compress(&[0.0; 8], 0.1);
        assert_eq!(zeros.indices.len(), 1);
        assert_eq!(similarity(&zeros, &zeros, 1.2), 0.0);
    }

    #[test]
    fn sparsity_bound_holds_across_dims() {
        for dim in [1usize, 3, 7, 10, 64, 300, 384, 768, 1536] {
            let c = compress(&ramp(dim), 0.10);
            assert!(c.indices.len() <= sparsity_bound(dim, 0.10), "dim {}", dim);
            assert!(validate(&c, 0.10).is_ok(), "dim {}", dim);
        }
    }

    #[test]
    fn identical_vectors_score_one() {
        let c = compress(&ramp(384), 0.1);
        assert!((similarity(&c, &c, 1.2) - 1.0).abs() < 1e-6);
        assert!((similarity(&c, &c, 1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_support_scores_zero() {
        let mut a = vec![0.0f32; 20];
        let mut b = vec![0.0f32; 20];
        a[0] = 1.0;
        a[1] = 0.9;
        b[10] = 1.0;
        b[11] = 0.9;
        let (ca, cb) = (compress(&a, 0.1), compress(&b, 0.1));
        assert_eq!(similarity(&ca, &cb, 1.2), 0.0);
    }

    #[test]
    fn opposite_vectors_clamp_to_minus_one() {
        let a = ramp(100);
        let b: Vec<f32> = a.iter().map(|v| -v).collect();
        let s = similarity(&compress(&a, 0.1), &compress(&b, 0.1), 1.2);
        assert!((s + 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dims_score_zero() {
        let a = compress(&ramp(100), 0.1);
        let b = compress(&ramp(200), 0.1);
        assert_eq!(similarity(&a, &b, 1.2), 0.0);
    }

    #[test]
    fn corrupt_embeddings_are_rejected_and_score_zero() {
        let good = compress(&ramp(50), 0.1);

        let mut out_of_range = good.clone();
        out_of_range.indices[0] = 999;
        assert!(matches!(validate(&out_of_range, 0.1), Err(EngineError::CorruptEmbedding(_))));
        assert_eq!(similarity(&good, &out_of_range, 1.2), 0.0);

        let mut mismatched = good.clone();
        mismatched.values.pop();
        assert!(validate(&mismatched, 0.1).is_err());
        assert_eq!(similarity(&mismatched, &good, 1.2), 0.0);

        let mut unsorted = good.clone();
        unsorted.indices.reverse();
        assert!(validate_structure(&unsorted).is_err());

        let mut nan = good.clone();
        nan.values[0] = f32::NAN;
        assert!(validate_structure(&nan).is_err());
    }

    #[test]
    fn ceiling_violation_is_corrupt() {
        let dense = ramp(100);
        let wide = compress(&dense, 0.5);
        assert!(validate_structure(&wide).is_ok());
        assert!(validate(&wide, 0.1).is_err());
    }

    #[test]
    fn correction_factor_scales_partial_overlap() {
        let mut a = vec![0.0f32; 10];
        let mut b = vec![0.0f32; 10];
        a[0] = 1.0;
        a[1] = 1.0;
        b[0] = 1.0;
        b[2] = 1.0;
        let (ca, cb) = (compress(&a, 0.2), compress(&b, 0.2));
        let raw = similarity(&ca, &cb, 1.0);
        assert!((raw - 0.5).abs() < 1e-6);
        assert!((similarity(&ca, &cb, 1.2) - 0.6).abs() < 1e-6);
    }
}
