use crate::models::{Chunk, ChunkMatch};
use crate::SchemeError;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Similarity in `[0, 1]`: cosine similarity shifted so that opposite
/// vectors score 0 and identical ones score 1.
pub fn relevance(left: &[f32], right: &[f32]) -> f64 {
    (1.0 + f64::from(cosine_similarity(left, right))) / 2.0
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm < f32::EPSILON || right_norm < f32::EPSILON {
        0.0
    } else {
        (dot / (left_norm * right_norm)).clamp(-1.0, 1.0)
    }
}

/// Best first; equal scores fall back to scheme id, then chunk position.
pub fn compare_matches(left: &ChunkMatch, right: &ChunkMatch) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| left.scheme.id.cmp(&right.scheme.id))
        .then_with(|| left.chunk_index.cmp(&right.chunk_index))
}

/// Orders matches, keeps the best chunk of each scheme, and cuts to `limit`.
pub fn rank_matches(mut matches: Vec<ChunkMatch>, limit: usize) -> Vec<ChunkMatch> {
    matches.sort_by(compare_matches);
    let mut seen = HashSet::new();
    matches
        .into_iter()
        .filter(|candidate| seen.insert(candidate.scheme.id.clone()))
        .take(limit)
        .collect()
}

/// Checks that every chunk shares one dimension, and that it agrees with
/// `expected` when the repository already holds vectors. Returns the
/// dimension of the chunks, if any.
pub fn check_dimensions(chunks: &[Chunk], expected: Option<usize>) -> Result<Option<usize>, SchemeError> {
    let mut found = expected;
    for chunk in chunks {
        match found {
            Some(dimension) if dimension != chunk.vector.len() => {
                return Err(SchemeError::DimensionMismatch {
                    expected: dimension,
                    found: chunk.vector.len(),
                });
            }
            Some(_) => {}
            None => found = Some(chunk.vector.len()),
        }
    }
    Ok(if chunks.is_empty() { expected } else { found })
}
