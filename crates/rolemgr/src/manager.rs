//! Debounced, grace-period-aware role transitions (§4.10) layered over
//! the pure rules in `rules.rs`. Mirrors the registry-plus-lock shape of
//! `gossipd::membership::MembershipManager`: state lives behind
//! `parking_lot::RwLock`, callers recompute against fresh inputs rather
//! than the manager polling anything itself.

use crate::rules::{desired_roles, RoleBudgets, RoleInputs};
use mesh_core::types::Role;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_DEBOUNCE_MS: u64 = 2_000;
pub const DEFAULT_DEMOTION_GRACE_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy)]
pub struct RoleManagerConfig {
    pub budgets: RoleBudgets,
    pub debounce_ms: u64,
    pub demotion_grace_ms: u64,
}

impl Default for RoleManagerConfig {
    fn default() -> Self {
        Self {
            budgets: RoleBudgets::default(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            demotion_grace_ms: DEFAULT_DEMOTION_GRACE_MS,
        }
    }
}

/// What changed in one `recompute` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleTransition {
    pub promoted: Vec<Role>,
    /// Roles newly scheduled for hard removal once their grace period
    /// elapses (still present in `held_roles` until then).
    pub demotion_scheduled: Vec<Role>,
    /// Roles that became desired again before their grace period
    /// elapsed, and so were never actually removed.
    pub demotion_cancelled: Vec<Role>,
}

impl RoleTransition {
    fn is_empty(&self) -> bool {
        self.promoted.is_empty() && self.demotion_scheduled.is_empty() && self.demotion_cancelled.is_empty()
    }
}

struct State {
    held_roles: HashSet<Role>,
    pending_demotions: HashMap<Role, u64>,
    last_transition_ms: Option<u64>,
}

pub struct RoleManager {
    config: RoleManagerConfig,
    state: RwLock<State>,
}

impl RoleManager {
    pub fn new(config: RoleManagerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State {
                held_roles: HashSet::from([Role::MeshParticipant]),
                pending_demotions: HashMap::new(),
                last_transition_ms: None,
            }),
        }
    }

    /// The role set currently held, including roles mid-grace-period.
    pub fn held_roles(&self) -> HashSet<Role> {
        self.state.read().held_roles.clone()
    }

    /// Recompute against fresh inputs. No-ops (beyond recording that a
    /// recompute happened) when called again within `debounce_ms` of the
    /// last actual transition.
    pub fn recompute(&self, inputs: &RoleInputs, now_ms: u64) -> RoleTransition {
        let desired = desired_roles(inputs, &self.config.budgets);
        let mut state = self.state.write();

        if let Some(last) = state.last_transition_ms {
            if now_ms.saturating_sub(last) < self.config.debounce_ms {
                return RoleTransition::default();
            }
        }

        let mut transition = RoleTransition::default();

        for role in desired.iter().copied() {
            if state.pending_demotions.remove(&role).is_some() {
                transition.demotion_cancelled.push(role);
            }
            if state.held_roles.insert(role) {
                transition.promoted.push(role);
            }
        }

        for role in state.held_roles.clone() {
            if !desired.contains(&role) && !state.pending_demotions.contains_key(&role) {
                state.pending_demotions.insert(role, now_ms + self.config.demotion_grace_ms);
                transition.demotion_scheduled.push(role);
            }
        }

        if !transition.is_empty() {
            state.last_transition_ms = Some(now_ms);
        }

        transition
    }

    /// Hard-remove any role whose grace period has elapsed by `now_ms`.
    /// Callers should invoke this on a timer and cancel any obligation
    /// still running under a returned role.
    pub fn reap_expired_demotions(&self, now_ms: u64) -> Vec<Role> {
        let mut state = self.state.write();
        let expired: Vec<Role> = state
            .pending_demotions
            .iter()
            .filter(|(_, deadline)| now_ms >= **deadline)
            .map(|(role, _)| *role)
            .collect();

        for role in &expired {
            state.pending_demotions.remove(role);
            state.held_roles.remove(role);
        }
        expired
    }
}
