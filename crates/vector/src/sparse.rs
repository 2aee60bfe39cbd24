//! Sparse-token encoding for the vector store.
//!
//! The inference service emits sparse weights keyed by textual tokens; the
//! vector store wants stable integer dimensions. Tokens are hashed with
//! FNV-1a so every process in a deployment derives the same dimension for
//! the same token.

use quarry_core::{fnv1a32, SparseWeights};

/// Map textual sparse weights to parallel `(indices, values)` arrays.
/// Colliding tokens (rare at 32 bits) have their weights summed.
pub fn encode_sparse(weights: &SparseWeights) -> (Vec<u32>, Vec<f32>) {
    let mut pairs: Vec<(u32, f32)> = Vec::with_capacity(weights.len());
    for (token, &weight) in weights {
        let index = fnv1a32(token);
        match pairs.iter_mut().find(|(i, _)| *i == index) {
            Some((_, w)) => *w += weight,
            None => pairs.push((index, weight)),
        }
    }
    pairs.sort_unstable_by_key(|(i, _)| *i);
    pairs.into_iter().unzip()
}
