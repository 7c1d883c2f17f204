pub mod error;
pub mod store;

pub use error::{DropStoreError, Result};
pub use store::{DropStore, DropStoreConfig};
