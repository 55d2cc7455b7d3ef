//! Cosine-similarity ranking.
//!
//! A pure function from (query embedding, candidates, threshold, cap) to an
//! ordered list of (id, score). No storage, no network; the orchestrator
//! owns everything stateful.
//!
//! Cosine similarity is used rather than euclidean distance: for this model
//! family only the direction of a vector encodes meaning, not its magnitude.

use std::cmp::Ordering;

use crate::items::{Candidate, ItemId};

/// Scores are kept to 4 decimal places
const SCORE_PRECISION: f32 = 10_000.0;

#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("query embedding is empty")]
    InvalidQuery,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// A ranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub id: ItemId,
    pub score: f32,
}

/// Ranking result plus the number of candidates dropped for having a
/// corrupt (wrong-length) embedding.
#[derive(Debug, Clone)]
pub struct RankOutcome {
    pub ranked: Vec<Ranked>,
    pub skipped: usize,
}

/// Rank candidates by cosine similarity to the query embedding.
///
/// Candidates scoring at or below `threshold` are dropped. Ordering is score
/// descending, ties broken by `created_at` descending so equally similar
/// items surface newest first. The tie-break is part of the contract; tests
/// compare against it.
///
/// An empty candidate set is an empty result, not an error. An empty or
/// wrong-length query embedding is the caller's bug and fails.
pub fn rank(
    query: &[f32],
    dimensions: usize,
    candidates: &[Candidate],
    threshold: f32,
    max_results: usize,
) -> Result<RankOutcome, RankError> {
    if query.is_empty() {
        return Err(RankError::InvalidQuery);
    }
    if query.len() != dimensions {
        return Err(RankError::DimensionMismatch {
            expected: dimensions,
            got: query.len(),
        });
    }

    let query_norm = l2_norm(query);
    if query_norm < f32::EPSILON {
        return Err(RankError::InvalidQuery);
    }

    let mut skipped = 0usize;
    let mut scored: Vec<(&Candidate, f32)> = vec![];

    for candidate in candidates {
        if candidate.embedding.len() != dimensions {
            skipped += 1;
            continue;
        }

        let score = cosine_similarity(query, &candidate.embedding, query_norm);
        if score > threshold {
            scored.push((candidate, score));
        }
    }

    scored.sort_by(|(a, score_a), (b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    scored.truncate(max_results);

    let ranked = scored
        .into_iter()
        .map(|(candidate, score)| Ranked {
            id: candidate.id.clone(),
            score: round_score(score),
        })
        .collect();

    Ok(RankOutcome { ranked, skipped })
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot / (query_norm * target_norm)
}

fn round_score(score: f32) -> f32 {
    (score * SCORE_PRECISION).round() / SCORE_PRECISION
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candidate(embedding: Vec<f32>, age_secs: i64) -> Candidate {
        Candidate {
            id: ItemId::new(),
            created_at: Utc::now() - Duration::seconds(age_secs),
            embedding,
        }
    }

    #[test]
    fn empty_candidates_rank_to_empty() {
        let outcome = rank(&[1.0, 0.0], 2, &[], 0.5, 10).unwrap();
        assert!(outcome.ranked.is_empty());
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn empty_query_is_invalid() {
        let result = rank(&[], 2, &[], 0.5, 10);
        assert!(matches!(result, Err(RankError::InvalidQuery)));
    }

    #[test]
    fn zero_norm_query_is_invalid() {
        let result = rank(&[0.0, 0.0], 2, &[], 0.5, 10);
        assert!(matches!(result, Err(RankError::InvalidQuery)));
    }

    #[test]
    fn wrong_length_query_is_a_dimension_mismatch() {
        let result = rank(&[1.0, 0.0, 0.0], 2, &[], 0.5, 10);
        assert!(matches!(
            result,
            Err(RankError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn results_are_ordered_by_score_descending() {
        let near = candidate(vec![1.0, 0.1, 0.0], 0);
        let far = candidate(vec![0.5, 0.8, 0.0], 0);

        let outcome = rank(&[1.0, 0.0, 0.0], 3, &[far.clone(), near.clone()], 0.0, 10).unwrap();

        assert_eq!(outcome.ranked.len(), 2);
        assert_eq!(outcome.ranked[0].id, near.id);
        assert!(outcome.ranked[0].score > outcome.ranked[1].score);
    }

    #[test]
    fn every_result_scores_strictly_above_threshold() {
        let candidates = vec![
            candidate(vec![1.0, 0.0], 0),
            candidate(vec![0.0, 1.0], 0),
            candidate(vec![1.0, 1.0], 0),
        ];

        let outcome = rank(&[1.0, 0.0], 2, &candidates, 0.7, 10).unwrap();
        assert!(!outcome.ranked.is_empty());
        for ranked in &outcome.ranked {
            assert!(ranked.score > 0.7, "score {} not above threshold", ranked.score);
        }
    }

    #[test]
    fn exact_threshold_score_is_dropped() {
        // identical vectors score exactly 1.0
        let candidates = vec![candidate(vec![1.0, 0.0], 0)];
        let outcome = rank(&[1.0, 0.0], 2, &candidates, 1.0, 10).unwrap();
        assert!(outcome.ranked.is_empty());
    }

    #[test]
    fn equal_scores_break_ties_by_recency() {
        let older = candidate(vec![1.0, 0.0], 3600);
        let newer = candidate(vec![1.0, 0.0], 0);

        let outcome = rank(&[1.0, 0.0], 2, &[older.clone(), newer.clone()], 0.5, 10).unwrap();

        assert_eq!(outcome.ranked.len(), 2);
        assert_eq!(outcome.ranked[0].id, newer.id);
        assert_eq!(outcome.ranked[1].id, older.id);
        assert_eq!(outcome.ranked[0].score, outcome.ranked[1].score);
    }

    #[test]
    fn corrupt_candidates_are_skipped_not_fatal() {
        let good = candidate(vec![1.0, 0.0], 0);
        let corrupt = candidate(vec![1.0, 0.0, 0.0, 0.0], 0);

        let outcome = rank(&[1.0, 0.0], 2, &[corrupt, good.clone()], 0.5, 10).unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.ranked.len(), 1);
        assert_eq!(outcome.ranked[0].id, good.id);
    }

    #[test]
    fn zero_norm_candidate_scores_zero() {
        let zero = candidate(vec![0.0, 0.0], 0);
        let outcome = rank(&[1.0, 0.0], 2, &[zero], 0.0, 10).unwrap();
        // score 0.0 is not strictly above threshold 0.0
        assert!(outcome.ranked.is_empty());
    }

    #[test]
    fn results_are_truncated_to_max() {
        let candidates: Vec<Candidate> =
            (0..10).map(|i| candidate(vec![1.0, i as f32 * 0.01], i)).collect();

        let outcome = rank(&[1.0, 0.0], 2, &candidates, 0.0, 3).unwrap();
        assert_eq!(outcome.ranked.len(), 3);
    }

    #[test]
    fn scores_are_rounded_to_four_decimals() {
        let outcome = rank(&[1.0, 0.0], 2, &[candidate(vec![1.0, 0.1], 0)], 0.0, 10).unwrap();

        let score = outcome.ranked[0].score;
        assert_eq!(score, (score * 10_000.0).round() / 10_000.0);
    }

    #[test]
    fn known_similarities_rank_as_expected() {
        // query built to land at 0.85 vs e1 and 0.40 vs e2
        let e1 = candidate(vec![1.0, 0.0, 0.0], 0);
        let e2 = candidate(vec![0.0, 1.0, 0.0], 0);
        let z = (1.0f32 - 0.85 * 0.85 - 0.40 * 0.40).sqrt();
        let query = [0.85, 0.40, z];

        let outcome = rank(&query, 3, &[e1.clone(), e2], 0.7, 20).unwrap();

        assert_eq!(outcome.ranked.len(), 1);
        assert_eq!(outcome.ranked[0].id, e1.id);
        assert_eq!(outcome.ranked[0].score, 0.85);
    }
}
