use classvault_crypto::CipherError;
use std::path::PathBuf;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The persistent backend could not be opened. Nothing else can proceed.
    #[error("failed to open store at {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("no password in memory: unlock the store first")]
    Locked,

    #[error("a password is already configured")]
    PasswordAlreadyConfigured,

    #[error("key {0:?} is reserved for internal use")]
    ReservedKey(String),

    #[error("blocking task failed: {0}")]
    Task(String),
}
