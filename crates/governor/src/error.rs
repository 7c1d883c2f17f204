use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("quota exceeded: {0}")]
pub struct QuotaExceeded(pub &'static str);

pub type Result<T> = std::result::Result<T, QuotaExceeded>;
