//! governor - the Resource Governor (§4.11): storage/cache/upload/
//! broadcast/peer-record quotas, refused with `QuotaExceeded` rather
//! than queued.

pub mod counters;
pub mod error;
pub mod governor;
pub mod rate_limit;

pub use counters::BoundedCounter;
pub use error::{QuotaExceeded, Result};
pub use governor::{GovernorConfig, GovernorCounters, ResourceGovernor};
pub use rate_limit::{RateLimitConfig, RateLimiter};
