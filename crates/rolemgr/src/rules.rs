//! Pure role-eligibility rules (§4.10). Kept free of any stored state so
//! the debounce/grace-period machinery in `manager.rs` can be tested
//! against `manager.rs` alone and these rules tested against plain
//! inputs.

use mesh_core::types::{PowerHint, Role, ThermalState};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
pub struct RoleBudgets {
    pub storage_quota_bytes: u64,
    pub compute_battery_threshold: f64,
}

impl Default for RoleBudgets {
    fn default() -> Self {
        Self {
            storage_quota_bytes: 5 * 1024 * 1024 * 1024,
            compute_battery_threshold: 30.0,
        }
    }
}

/// One recomputation's worth of externally observed state.
#[derive(Debug, Clone)]
pub struct RoleInputs {
    pub power: PowerHint,
    pub free_storage_bytes: u64,
    pub allowed_roles: HashSet<Role>,
    /// Reachability of each gateway target network, keyed by the
    /// gateway role it backs (`TOR_GATEWAY`, `CLEARNET_GATEWAY`,
    /// `I2P_GATEWAY`).
    pub gateway_connectivity: HashMap<Role, bool>,
}

const GATEWAY_ROLES: [Role; 3] = [Role::TorGateway, Role::ClearnetGateway, Role::I2pGateway];

/// The role set a node should hold right now, ignoring debounce and
/// demotion grace (§4.10 rules). `MESH_PARTICIPANT` is always present.
pub fn desired_roles(inputs: &RoleInputs, budgets: &RoleBudgets) -> HashSet<Role> {
    let mut roles = HashSet::new();
    roles.insert(Role::MeshParticipant);

    if inputs.allowed_roles.contains(&Role::StorageNode)
        && inputs.free_storage_bytes >= budgets.storage_quota_bytes
        && inputs.power.thermal <= ThermalState::Warm
    {
        roles.insert(Role::StorageNode);
    }

    if inputs.allowed_roles.contains(&Role::ComputeNode)
        && inputs.power.thermal <= ThermalState::Warm
        && (inputs.power.charging || inputs.power.battery_percent >= budgets.compute_battery_threshold)
    {
        roles.insert(Role::ComputeNode);
    }

    for gateway in GATEWAY_ROLES {
        if inputs.allowed_roles.contains(&gateway) && inputs.gateway_connectivity.get(&gateway).copied().unwrap_or(false)
        {
            roles.insert(gateway);
        }
    }

    if inputs.allowed_roles.contains(&Role::Relay) {
        roles.insert(Role::Relay);
    }

    roles
}
