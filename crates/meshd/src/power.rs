//! Battery/thermal sampling is platform-specific and out of scope (§1);
//! callers supply a `PowerSampler`, the same external-collaborator seam
//! `dispatch::TaskExecutor` uses for sandboxed execution.

use mesh_core::types::PowerHint;

pub trait PowerSampler: Send + Sync {
    fn sample(&self) -> PowerHint;
}

/// A fixed reading, useful for tests and for hosts with no power API
/// (treated as permanently on mains power).
pub struct StaticPowerSampler(pub PowerHint);

impl PowerSampler for StaticPowerSampler {
    fn sample(&self) -> PowerHint {
        self.0
    }
}

impl Default for StaticPowerSampler {
    fn default() -> Self {
        Self(PowerHint {
            battery_percent: 100.0,
            charging: true,
            thermal: mesh_core::types::ThermalState::Cool,
        })
    }
}
