//! replication - the Replication Engine (§4.7): candidate scoring,
//! retry/backoff policy, and the upload state machine that drives each
//! locally stored blob toward its target replica count.

pub mod backoff;
pub mod engine;
pub mod error;
pub mod scoring;

pub use backoff::{attempts_exhausted, backoff_delay_ms, BackoffConfig};
pub use engine::{ReplicationEngine, ReplicationEngineConfig, MAX_CHUNK_BYTES};
pub use error::{ReplicationError, Result};
pub use scoring::{CandidateStats, Scorer, ScoredCandidate, ScoringWeights};
