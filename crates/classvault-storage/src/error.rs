use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// A user id, data type or backup id that cannot be used as a path segment.
    #[error("invalid {kind} {value:?}")]
    InvalidSegment { kind: &'static str, value: String },

    #[error("remote storage error: {0}")]
    Backend(#[from] opendal::Error),

    #[error("corrupt remote object {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Injected or wrapped failures from callers composing their own stores.
    #[error("{0}")]
    Other(String),
}
