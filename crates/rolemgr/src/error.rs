use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoleManagerError {
    #[error("unknown gateway role: {0:?}")]
    UnknownGateway(mesh_core::Role),
}

pub type Result<T> = std::result::Result<T, RoleManagerError>;
