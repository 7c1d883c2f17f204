//! dispatch - the Dispatch/Negotiation workflow (§4.9): task broadcast,
//! fitness-scored offer collection, winner selection, and signed
//! assignment issuance with challenge-nonce binding.

pub mod dispatch;
pub mod error;
pub mod fitness;
pub mod selection;

pub use dispatch::{
    Dispatch, DispatchConfig, TaskExecutor, DEFAULT_ASSIGNMENT_RETRIES, DEFAULT_OFFER_COLLECT_WINDOW,
    DEFAULT_TTL_HOPS,
};
pub use error::{DispatchError, Result};
pub use fitness::{fitness_score, FitnessConfig, FitnessInputs, FitnessWeights};
pub use selection::{select_best, RankedOffer};
