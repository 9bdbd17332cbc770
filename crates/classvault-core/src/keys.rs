//! Key registry: which local keys are encrypted at rest, which are synced.
//!
//! The lists are fixed at compile time and shared by the local store and the
//! sync engine. Any key not listed in [`SYNCABLE_KEYS`] never leaves the device.

/// Business-data keys reconciled with the cloud.
pub const SYNCABLE_KEYS: &[&str] = &[
    "classes",
    "exams",
    "examResults",
    "lessons",
    "themes",
    "blockages",
    "appSettings",
    "gradingSchemes",
    "schedules",
    "holidays",
    "calendarEvents",
];

/// Keys whose values are written as `salt:iv:ciphertext`.
///
/// `appSettings` is synced but stored raw; `lessonDrafts` is encrypted but
/// stays on this device.
pub const ENCRYPTED_KEYS: &[&str] = &[
    "classes",
    "exams",
    "examResults",
    "lessons",
    "themes",
    "blockages",
    "gradingSchemes",
    "schedules",
    "holidays",
    "calendarEvents",
    "lessonDrafts",
];

/// Holds the encrypted sentinel proving knowledge of the password.
pub const PASSWORD_CHECK_KEY: &str = "__classvault_password_check";

/// Holds the timestamp ledger as a JSON object.
pub const TIMESTAMPS_KEY: &str = "__classvault_sync_timestamps";

/// Holds the RFC 3339 instant of the last successful full sync.
pub const LAST_SYNC_KEY: &str = "__classvault_last_sync";

const RESERVED_KEYS: &[&str] = &[PASSWORD_CHECK_KEY, TIMESTAMPS_KEY, LAST_SYNC_KEY];

pub fn is_syncable(key: &str) -> bool {
    SYNCABLE_KEYS.contains(&key)
}

pub fn is_encrypted(key: &str) -> bool {
    ENCRYPTED_KEYS.contains(&key)
}

/// Reserved keys are owned by the store and not writable through `set_item`.
pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}
