//! classvault-storage: remote per-user record store on top of OpenDAL
//!
//! Rows live as JSON objects under a configurable prefix:
//!
//! ```text
//! {prefix}/user_data/{user_id}/{data_type}.json
//! {prefix}/user_data_backups/{user_id}/{backup_id}.json
//! ```
//!
//! The payloads are ciphertext produced on the device; nothing here decrypts.

pub mod error;
pub mod health;
pub mod operator;
pub mod records;
pub mod remote;

pub use error::{RemoteError, RemoteResult};
pub use health::{check_health, is_healthy};
pub use operator::{build_operator, memory_operator};
pub use records::{Backup, BackupEntry, CloudRecord};
pub use remote::{OpendalRemote, RemoteStore};
