use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use classvault_core::keys::{
    is_encrypted, is_reserved, is_syncable, ENCRYPTED_KEYS, LAST_SYNC_KEY, PASSWORD_CHECK_KEY,
    TIMESTAMPS_KEY,
};
use classvault_crypto::{looks_encrypted, Cipher};

use crate::backend::{open_backend, KvBackend};
use crate::error::{StoreError, StoreResult};
use crate::ledger::TimestampLedger;
use crate::session::Session;

/// Plaintext of the password sentinel.
const PASSWORD_CHECK_VALUE: &str = "classvault-password-check-v1";

/// Local encrypted key-value store.
///
/// Owns the password session and the timestamp ledger. Each instance is fully
/// isolated: two stores can hold different passwords in the same process.
pub struct LocalStore {
    backend: Arc<dyn KvBackend>,
    cipher: Arc<Cipher>,
    session: RwLock<Option<Session>>,
    /// Serializes read-modify-write of the ledger.
    ledger_lock: Mutex<()>,
}

impl LocalStore {
    /// Open the persistent store at `path`. Failure here is fatal for the caller.
    pub fn open(path: &Path, cipher: Arc<Cipher>) -> StoreResult<Self> {
        let backend = open_backend(path)?;
        info!(path = %path.display(), "local store opened");
        Ok(Self::with_backend(backend, cipher))
    }

    pub fn with_backend(backend: Arc<dyn KvBackend>, cipher: Arc<Cipher>) -> Self {
        Self {
            backend,
            cipher,
            session: RwLock::new(None),
            ledger_lock: Mutex::new(()),
        }
    }

    pub fn cipher(&self) -> &Arc<Cipher> {
        &self.cipher
    }

    // ── Password session ─────────────────────────────────────────────────────

    pub fn set_password(&self, password: SecretString) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(Session::new(password));
    }

    pub fn clear_password(&self) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn has_password_in_memory(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub(crate) fn session(&self) -> StoreResult<Session> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(StoreError::Locked)
    }

    /// First-run setup: write the sentinel and activate the session.
    pub async fn setup_password(&self, password: SecretString) -> StoreResult<()> {
        if self.has_password()? {
            return Err(StoreError::PasswordAlreadyConfigured);
        }
        let session = Session::new(password);
        let sentinel = self
            .encrypt_blocking(PASSWORD_CHECK_VALUE.to_string(), &session)
            .await?;
        self.backend.set(PASSWORD_CHECK_KEY, &sentinel)?;
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
        info!("password configured");
        Ok(())
    }

    /// True iff the sentinel exists and decrypts under `password`. Never errors.
    pub async fn validate_password(&self, password: &SecretString) -> bool {
        let sentinel = match self.backend.get(PASSWORD_CHECK_KEY) {
            Ok(Some(sentinel)) => sentinel,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "reading password sentinel failed");
                return false;
            }
        };
        let candidate = Session::new(SecretString::from(password.expose_secret().to_owned()));
        match self.decrypt_blocking(sentinel, &candidate).await {
            Ok(plaintext) => plaintext == PASSWORD_CHECK_VALUE,
            Err(e) => {
                debug!(error = %e, "password validation failed");
                false
            }
        }
    }

    /// Validate and, on success, activate the session.
    pub async fn unlock(&self, password: SecretString) -> bool {
        if !self.validate_password(&password).await {
            return false;
        }
        self.set_password(password);
        true
    }

    /// Whether a password has ever been configured on this device.
    pub fn has_password(&self) -> StoreResult<bool> {
        Ok(self.backend.get(PASSWORD_CHECK_KEY)?.is_some())
    }

    // ── Items ────────────────────────────────────────────────────────────────

    pub async fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        reject_reserved(key)?;
        if is_encrypted(key) {
            let session = self.session()?;
            let encrypted = self.encrypt_blocking(value.to_string(), &session).await?;
            self.write_touched(key, &encrypted)?;
        } else {
            self.write_touched(key, value)?;
        }
        debug!(key, "item written");
        Ok(())
    }

    /// Read a value, decrypting encrypted keys.
    ///
    /// A value under an encrypted key that is not in `salt:iv:ciphertext` form
    /// is legacy plaintext from before migration and is returned as-is.
    pub async fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        reject_reserved(key)?;
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };
        if is_encrypted(key) && looks_encrypted(&raw) {
            let session = self.session()?;
            return self.decrypt_blocking(raw, &session).await.map(Some);
        }
        Ok(Some(raw))
    }

    /// Delete a value and its ledger entry.
    pub async fn remove_item(&self, key: &str) -> StoreResult<()> {
        reject_reserved(key)?;
        self.backend.remove(key)?;
        if is_syncable(key) {
            self.update_ledger(|ledger| {
                ledger.remove(key);
            })?;
        }
        debug!(key, "item removed");
        Ok(())
    }

    /// All user-visible keys, sorted.
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .backend
            .keys()?
            .into_iter()
            .filter(|k| !is_reserved(k))
            .collect())
    }

    /// Delete the sentinel and every encrypted key, then end the session.
    ///
    /// Irreversible. Callers are responsible for confirming with the user.
    pub async fn reset_all_data(&self) -> StoreResult<()> {
        self.backend.remove(PASSWORD_CHECK_KEY)?;
        for &key in ENCRYPTED_KEYS {
            self.backend.remove(key)?;
        }
        self.update_ledger(|ledger| {
            for &key in ENCRYPTED_KEYS {
                ledger.remove(key);
            }
        })?;
        self.clear_password();
        self.cipher.clear_key_cache();
        warn!(keys = ENCRYPTED_KEYS.len(), "all encrypted local data reset");
        Ok(())
    }

    // ── Ledger ───────────────────────────────────────────────────────────────

    pub fn get_timestamps(&self) -> StoreResult<TimestampLedger> {
        TimestampLedger::from_json(self.backend.get(TIMESTAMPS_KEY)?.as_deref())
    }

    pub fn get_timestamp(&self, key: &str) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.get_timestamps()?.get(key))
    }

    /// Set the ledger entry of a syncable key. Other keys are never tracked.
    pub fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> StoreResult<()> {
        if !is_syncable(key) {
            debug!(key, "not syncable, ledger untouched");
            return Ok(());
        }
        self.update_ledger(|ledger| ledger.set(key, at))
    }

    /// The ledger entry of `key`, stamping it with `now` first if it has none.
    pub fn ensure_timestamp(&self, key: &str, now: DateTime<Utc>) -> StoreResult<DateTime<Utc>> {
        let _guard = self.lock_ledger();
        let mut ledger = self.get_timestamps()?;
        if let Some(at) = ledger.get(key) {
            return Ok(at);
        }
        if is_syncable(key) {
            ledger.set(key, now);
            self.backend.set(TIMESTAMPS_KEY, &ledger.to_json()?)?;
        }
        Ok(now)
    }

    fn update_ledger<F: FnOnce(&mut TimestampLedger)>(&self, f: F) -> StoreResult<()> {
        let _guard = self.lock_ledger();
        let mut ledger = self.get_timestamps()?;
        f(&mut ledger);
        self.backend.set(TIMESTAMPS_KEY, &ledger.to_json()?)
    }

    fn lock_ledger(&self) -> MutexGuard<'_, ()> {
        self.ledger_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write a stored value and apply `f` to the ledger under one lock, so a
    /// concurrent writer never sees the value without its timestamp.
    fn write_with_ledger<F: FnOnce(&mut TimestampLedger)>(
        &self,
        key: &str,
        raw: &str,
        f: F,
    ) -> StoreResult<()> {
        let _guard = self.lock_ledger();
        self.backend.set(key, raw)?;
        if is_syncable(key) {
            let mut ledger = self.get_timestamps()?;
            f(&mut ledger);
            self.backend.set(TIMESTAMPS_KEY, &ledger.to_json()?)?;
        }
        Ok(())
    }

    /// Write a stored value and bump its ledger entry to now.
    pub(crate) fn write_touched(&self, key: &str, raw: &str) -> StoreResult<()> {
        self.write_with_ledger(key, raw, |ledger| {
            ledger.touch(key, Utc::now());
        })
    }

    // ── Raw access for the sync engine ───────────────────────────────────────

    /// Stored form of a value (ciphertext for encrypted keys). No password needed.
    pub fn get_raw_item(&self, key: &str) -> StoreResult<Option<String>> {
        reject_reserved(key)?;
        self.backend.get(key)
    }

    /// Write a stored form verbatim and refresh the ledger to now.
    pub fn set_raw_item(&self, key: &str, raw: &str) -> StoreResult<()> {
        reject_reserved(key)?;
        self.write_touched(key, raw)
    }

    /// Write a stored form verbatim and set its ledger entry to `at`.
    pub fn set_raw_item_with_timestamp(
        &self,
        key: &str,
        raw: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        reject_reserved(key)?;
        self.write_with_ledger(key, raw, |ledger| ledger.set(key, at))
    }

    /// Like [`Self::set_raw_item_with_timestamp`], but only while the ledger
    /// entry still equals `expected`. Returns false, writing nothing, when a
    /// local write moved it in the meantime.
    pub fn set_raw_item_if_unchanged(
        &self,
        key: &str,
        raw: &str,
        at: DateTime<Utc>,
        expected: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        reject_reserved(key)?;
        let _guard = self.lock_ledger();
        let mut ledger = self.get_timestamps()?;
        if ledger.get(key) != expected {
            debug!(key, "ledger moved since it was read, keeping local value");
            return Ok(false);
        }
        self.backend.set(key, raw)?;
        if is_syncable(key) {
            ledger.set(key, at);
            self.backend.set(TIMESTAMPS_KEY, &ledger.to_json()?)?;
        }
        Ok(true)
    }

    // ── Last successful sync ─────────────────────────────────────────────────

    pub fn last_sync(&self) -> StoreResult<Option<DateTime<Utc>>> {
        match self.backend.get(LAST_SYNC_KEY)? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| StoreError::Backend(format!("invalid last sync time {raw:?}: {e}"))),
            None => Ok(None),
        }
    }

    pub fn record_sync(&self, at: DateTime<Utc>) -> StoreResult<()> {
        self.backend.set(LAST_SYNC_KEY, &at.to_rfc3339())
    }

    // ── Cipher offload ───────────────────────────────────────────────────────

    pub(crate) async fn encrypt_blocking(
        &self,
        plaintext: String,
        session: &Session,
    ) -> StoreResult<String> {
        let cipher = Arc::clone(&self.cipher);
        let password = session.shared_password();
        let encrypted = tokio::task::spawn_blocking(move || cipher.encrypt(&plaintext, &password))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(encrypted)
    }

    pub(crate) async fn decrypt_blocking(
        &self,
        encoded: String,
        session: &Session,
    ) -> StoreResult<String> {
        let cipher = Arc::clone(&self.cipher);
        let password = session.shared_password();
        let plaintext = tokio::task::spawn_blocking(move || cipher.decrypt(&encoded, &password))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(plaintext)
    }

    pub(crate) fn backend(&self) -> &dyn KvBackend {
        self.backend.as_ref()
    }
}

fn reject_reserved(key: &str) -> StoreResult<()> {
    if is_reserved(key) {
        return Err(StoreError::ReservedKey(key.to_string()));
    }
    Ok(())
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("unlocked", &self.has_password_in_memory())
            .finish()
    }
}
