use thiserror::Error;

/// Reasons a sync call does no work at all.
///
/// These surface as the single general error of a failed `SyncResult`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("sync already in progress")]
    InProgress,

    #[error("cloud sync is not configured")]
    NotConfigured,

    #[error("not authenticated")]
    NotAuthenticated,
}
