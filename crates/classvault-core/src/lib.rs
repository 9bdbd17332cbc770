pub mod config;
pub mod error;
pub mod keys;
pub mod types;

pub use error::{VaultError, VaultResult};
pub use types::{KeyError, SyncResult};
