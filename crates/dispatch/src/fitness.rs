//! Fitness scoring for task offers (§4.9): f = cpuAvail·0.35 + memAvail·0.25
//! + batteryHeadroom·0.2 + (1/hop)·0.1 + trustScore·0.1. Offers below
//! battery threshold or in critical thermal state must refuse (f = 0).

use mesh_core::types::{PowerHint, ThermalState};

#[derive(Debug, Clone, Copy)]
pub struct FitnessWeights {
    pub cpu_avail: f64,
    pub mem_avail: f64,
    pub battery_headroom: f64,
    pub inverse_hop: f64,
    pub trust_score: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            cpu_avail: 0.35,
            mem_avail: 0.25,
            battery_headroom: 0.2,
            inverse_hop: 0.1,
            trust_score: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitnessInputs {
    pub cpu_avail: f64,
    pub mem_avail: f64,
    pub power: PowerHint,
    pub hop_distance: u32,
    pub trust_score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct FitnessConfig {
    pub weights: FitnessWeights,
    pub min_battery_for_compute: f64,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            weights: FitnessWeights::default(),
            min_battery_for_compute: 30.0,
        }
    }
}

/// Compute the fitness score for one candidate executor. Returns `0.0`
/// unconditionally when the candidate's power/thermal state must refuse
/// the task (§4.9).
pub fn fitness_score(inputs: &FitnessInputs, config: &FitnessConfig) -> f64 {
    if !inputs.power.permits_compute(config.min_battery_for_compute, ThermalState::Warm) {
        return 0.0;
    }

    let inverse_hop = if inputs.hop_distance == 0 {
        1.0
    } else {
        (1.0 / inputs.hop_distance as f64).min(1.0)
    };
    let battery_headroom = inputs.power.battery_headroom(config.min_battery_for_compute);

    let w = config.weights;
    w.cpu_avail * inputs.cpu_avail.clamp(0.0, 1.0)
        + w.mem_avail * inputs.mem_avail.clamp(0.0, 1.0)
        + w.battery_headroom * battery_headroom
        + w.inverse_hop * inverse_hop
        + w.trust_score * inputs.trust_score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_power() -> PowerHint {
        PowerHint {
            battery_percent: 80.0,
            charging: true,
            thermal: ThermalState::Cool,
        }
    }

    #[test]
    fn full_inputs_score_near_one() {
        let inputs = FitnessInputs {
            cpu_avail: 1.0,
            mem_avail: 1.0,
            power: healthy_power(),
            hop_distance: 0,
            trust_score: 1.0,
        };
        let score = fitness_score(&inputs, &FitnessConfig::default());
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn critical_thermal_forces_zero() {
        let mut power = healthy_power();
        power.thermal = ThermalState::Critical;
        let inputs = FitnessInputs {
            cpu_avail: 1.0,
            mem_avail: 1.0,
            power,
            hop_distance: 0,
            trust_score: 1.0,
        };
        assert_eq!(fitness_score(&inputs, &FitnessConfig::default()), 0.0);
    }

    #[test]
    fn low_battery_not_charging_forces_zero() {
        let power = PowerHint {
            battery_percent: 5.0,
            charging: false,
            thermal: ThermalState::Cool,
        };
        let inputs = FitnessInputs {
            cpu_avail: 1.0,
            mem_avail: 1.0,
            power,
            hop_distance: 0,
            trust_score: 1.0,
        };
        assert_eq!(fitness_score(&inputs, &FitnessConfig::default()), 0.0);
    }

    #[test]
    fn farther_hop_distance_scores_lower() {
        let base = FitnessInputs {
            cpu_avail: 0.5,
            mem_avail: 0.5,
            power: healthy_power(),
            hop_distance: 1,
            trust_score: 0.5,
        };
        let far = FitnessInputs { hop_distance: 5, ..base };
        let config = FitnessConfig::default();
        assert!(fitness_score(&base, &config) > fitness_score(&far, &config));
    }
}
