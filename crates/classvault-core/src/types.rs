use serde::{Deserialize, Serialize};
use std::fmt;

/// A failure attributed to one syncable key (or to the whole call when `key` is `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyError {
    pub key: Option<String>,
    pub message: String,
}

impl KeyError {
    pub fn for_key(key: &str, message: impl Into<String>) -> Self {
        Self {
            key: Some(key.to_string()),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            key: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{key}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of a sync, bulk transfer, or restore.
///
/// Failures are collected per key instead of aborting, so partial success is
/// representable. `success` is true iff `errors` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub uploaded: Vec<String>,
    pub downloaded: Vec<String>,
    pub errors: Vec<KeyError>,
}

impl SyncResult {
    /// A result that performed no work and failed for `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            uploaded: Vec::new(),
            downloaded: Vec::new(),
            errors: vec![KeyError::general(message)],
        }
    }

    /// Recompute `success` from `errors` and sort the key lists.
    pub fn finish(mut self) -> Self {
        self.uploaded.sort();
        self.downloaded.sort();
        self.success = self.errors.is_empty();
        self
    }

    /// Fold another result's key lists and errors into this one.
    pub fn absorb(&mut self, other: SyncResult) {
        self.uploaded.extend(other.uploaded);
        self.downloaded.extend(other.downloaded);
        self.errors.extend(other.errors);
    }

    pub fn has_error_for(&self, key: &str) -> bool {
        self.errors.iter().any(|e| e.key.as_deref() == Some(key))
    }
}
