//! classvault-sync: reconciles syncable keys between the local store and the
//! remote record store
//!
//! - [`engine`]: `sync_all` (per-key last-writer-wins), single-key primitives,
//!   bulk `upload_all` / `download_all`
//! - [`backup`]: snapshots taken before bulk uploads, retention, restore
//! - [`triggers`]: app-start and back-online sync

pub mod auth;
pub mod backup;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod triggers;

pub use auth::AuthSession;
pub use conflict::{resolve, SyncDirection};
pub use engine::CloudSync;
pub use error::SyncError;
pub use triggers::AutoSync;
