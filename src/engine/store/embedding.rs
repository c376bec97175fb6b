// ── Vector blob utilities ──────────────────────────────────────────────
// Little-endian u32 / f32 arrays stored as SQLite BLOBs.

use crate::atoms::engram_types::CompressedEmbedding;
use crate::atoms::error::{EngineError, EngineResult};

/// Convert a Vec<f32> to bytes for SQLite BLOB storage.
pub fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert a byte slice (from SQLite BLOB) to a Vec<f32>.
/// A length that is not a multiple of 4 means the blob was truncated.
pub fn bytes_to_f32_vec(bytes: &[u8]) -> EngineResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(EngineError::CorruptEmbedding(format!(
            "value blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn u32_vec_to_bytes(vec: &[u32]) -> Vec<u8> {
    vec.iter().flat_map(|i| i.to_le_bytes()).collect()
}

pub fn bytes_to_u32_vec(bytes: &[u8]) -> EngineResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(EngineError::CorruptEmbedding(format!(
            "index blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Rebuild a compressed embedding from its three persisted columns.
pub fn decode_compressed(
    indices: &[u8],
    values: &[u8],
    original_dim: i64,
) -> EngineResult<CompressedEmbedding> {
    if original_dim <= 0 || original_dim > u32::MAX as i64 {
        return Err(EngineError::CorruptEmbedding(format!("bad original_dim {}", original_dim)));
    }
    let indices = bytes_to_u32_vec(indices)?;
    let values = bytes_to_f32_vec(values)?;
    let sparsity_ratio = indices.len() as f32 / original_dim as f32;
    Ok(CompressedEmbedding { original_dim: original_dim as u32, indices, values, sparsity_ratio })
}

/// Cosine similarity between two dense vectors. Returns 0.0 if either is zero-length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_blobs_are_corrupt() {
        assert!(matches!(bytes_to_f32_vec(&[0, 1, 2]), Err(EngineError::CorruptEmbedding(_))));
        assert!(bytes_to_u32_vec(&[0; 7]).is_err());
        assert!(decode_compressed(&[], &[], 0).is_err());
    }

    #[test]
    fn decode_restores_columns() {
        let idx = u32_vec_to_bytes(&[2, 7, 9]);
        let val = f32_vec_to_bytes(&[0.5, -1.25, 3.0]);
        let c = decode_compressed(&idx, &val, 30).unwrap();
        assert_eq!(c.indices, vec![2, 7, 9]);
        assert_eq!(c.values, vec![0.5, -1.25, 3.0]);
        assert!((c.sparsity_ratio - 0.1).abs() < 1e-6);
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
