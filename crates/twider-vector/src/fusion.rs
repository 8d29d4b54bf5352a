//! Reciprocal Rank Fusion (RRF) over ranked candidate lists.
//!
//! `score(d) = sum over lists containing d of 1 / (k + rank(d))`, with
//! 1-based ranks. Items found by only one list still score from that list.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use uuid::Uuid;

/// Smoothing constant from Cormack, Clarke and Buettcher (SIGIR 2009).
pub const RRF_K: u32 = 60;

/// One entry of a fused ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedHit<T = Uuid> {
    pub id: T,
    pub score: f64,
}

/// Fuse ranked lists into one ranking.
///
/// Sorted by descending score; equal scores are ordered by ascending id so
/// repeated identical queries paginate identically. An id repeated within a
/// single list only counts at its first position.
pub fn reciprocal_rank_fusion<T>(lists: &[Vec<T>], k: u32) -> Vec<FusedHit<T>>
where
    T: Copy + Eq + Hash + Ord,
{
    let k = k as f64;
    let mut scores: HashMap<T, f64> = HashMap::new();

    for list in lists {
        let mut seen: HashSet<T> = HashSet::with_capacity(list.len());
        for (rank, id) in list.iter().enumerate() {
            if !seen.insert(*id) {
                continue;
            }
            *scores.entry(*id).or_insert(0.0) += 1.0 / (k + (rank + 1) as f64);
        }
    }

    let mut fused: Vec<FusedHit<T>> = scores
        .into_iter()
        .map(|(id, score)| FusedHit { id, score })
        .collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

/// The `[offset, offset + limit)` window of `items`; empty past the end.
pub fn paginate<T>(items: Vec<T>, offset: u64, limit: u64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    items.into_iter().skip(offset).take(limit).collect()
}
