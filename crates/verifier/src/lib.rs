pub mod challenge;
pub mod error;
pub mod replay_cache;
pub mod verifier;

pub use challenge::ChallengeStore;
pub use error::{Result, VerifierError};
pub use replay_cache::ReplayCache;
pub use verifier::{VerificationOutcome, VerificationRequest, Verifier, VerifierConfig};
