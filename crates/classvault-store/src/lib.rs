//! classvault-store: the on-device key-value store
//!
//! Values under encrypted keys are written as `salt:iv:ciphertext`; every other
//! key is stored raw. Writes to syncable keys refresh the timestamp ledger that
//! the sync engine compares against the cloud.

pub mod backend;
pub mod error;
pub mod ledger;
pub mod migrate;
pub mod session;
pub mod store;

pub use backend::{open_backend, JsonFileBackend, KvBackend, MemoryBackend};
pub use error::{StoreError, StoreResult};
pub use ledger::TimestampLedger;
pub use migrate::MigrationReport;
pub use session::Session;
pub use store::LocalStore;

#[cfg(feature = "rocksdb")]
pub use backend::RocksDbBackend;
