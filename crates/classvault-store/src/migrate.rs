//! One-shot encryption of values written before encryption existed.

use classvault_core::keys::ENCRYPTED_KEYS;
use classvault_crypto::looks_encrypted;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::LocalStore;

/// Outcome of [`LocalStore::migrate_unencrypted_data`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: Vec<String>,
    pub already_encrypted: Vec<String>,
    /// `(key, reason)` for keys left untouched after an error.
    pub failed: Vec<(String, String)>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl LocalStore {
    /// Encrypt every plaintext value under an encrypted key.
    ///
    /// Idempotent: values that already decrypt under the session password are
    /// skipped. A failure on one key is logged and does not stop the others.
    pub async fn migrate_unencrypted_data(&self) -> StoreResult<MigrationReport> {
        let session = self.session()?;
        let mut report = MigrationReport::default();

        for &key in ENCRYPTED_KEYS {
            let raw = match self.backend().get(key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key, error = %e, "migration: read failed");
                    report.failed.push((key.to_string(), e.to_string()));
                    continue;
                }
            };

            if looks_encrypted(&raw) && self.decrypt_blocking(raw.clone(), &session).await.is_ok() {
                debug!(key, "migration: already encrypted");
                report.already_encrypted.push(key.to_string());
                continue;
            }

            let outcome = async {
                let encrypted = self.encrypt_blocking(raw, &session).await?;
                self.write_touched(key, &encrypted)
            }
            .await;

            match outcome {
                Ok(()) => report.migrated.push(key.to_string()),
                Err(e) => {
                    warn!(key, error = %e, "migration: encrypt failed");
                    report.failed.push((key.to_string(), e.to_string()));
                }
            }
        }

        info!(
            migrated = report.migrated.len(),
            already_encrypted = report.already_encrypted.len(),
            failed = report.failed.len(),
            "legacy data migration finished"
        );
        Ok(report)
    }
}
