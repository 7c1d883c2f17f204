//! Candidate ranking for replica placement (§4.7): composite score of
//! trust, inverse hop distance, free-space hint, and recent success rate.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub trust: f64,
    pub inverse_hop: f64,
    pub free_space: f64,
    pub recent_success_rate: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            trust: 0.4,
            inverse_hop: 0.2,
            free_space: 0.2,
            recent_success_rate: 0.2,
        }
    }
}

/// The per-candidate inputs to the composite score, already normalised to
/// `[0, 1]` by the caller (the Replication Engine, which knows how to read
/// hop distance and trust off a `PeerRecord` and the Trust Store).
#[derive(Debug, Clone, Copy)]
pub struct CandidateStats {
    pub trust_score: f64,
    pub hop_distance: u32,
    pub free_space_hint: f64,
    pub recent_success_rate: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoredCandidate<T> {
    pub candidate: T,
    pub score: f64,
}

pub struct Scorer {
    weights: ScoringWeights,
}

impl Scorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, stats: &CandidateStats) -> f64 {
        let inverse_hop = if stats.hop_distance == 0 {
            1.0
        } else {
            (1.0 / stats.hop_distance as f64).min(1.0)
        };

        self.weights.trust * stats.trust_score.clamp(0.0, 1.0)
            + self.weights.inverse_hop * inverse_hop
            + self.weights.free_space * stats.free_space_hint.clamp(0.0, 1.0)
            + self.weights.recent_success_rate * stats.recent_success_rate.clamp(0.0, 1.0)
    }

    /// Rank candidates highest score first.
    pub fn rank<T: Clone>(&self, candidates: &[(T, CandidateStats)]) -> Vec<ScoredCandidate<T>> {
        let mut scored: Vec<_> = candidates
            .iter()
            .map(|(candidate, stats)| ScoredCandidate {
                candidate: candidate.clone(),
                score: self.score(stats),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored
    }

    pub fn select_top<T: Clone>(&self, candidates: &[(T, CandidateStats)], n: usize) -> Vec<T> {
        self.rank(candidates).into_iter().take(n).map(|sc| sc.candidate).collect()
    }
}
