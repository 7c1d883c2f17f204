//! rolemgr - the Role Manager (§4.10): power/thermal-gated role set
//! computation, debounced transitions, and demotion grace periods.

pub mod error;
pub mod manager;
pub mod rules;

pub use error::{Result, RoleManagerError};
pub use manager::{RoleManager, RoleManagerConfig, RoleTransition, DEFAULT_DEBOUNCE_MS, DEFAULT_DEMOTION_GRACE_MS};
pub use rules::{desired_roles, RoleBudgets, RoleInputs};
