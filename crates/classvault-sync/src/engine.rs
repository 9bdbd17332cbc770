//! Sync engine: moves stored (already encrypted) values between the local
//! store and the remote record store.
//!
//!   - `sync_all`: per-key last-writer-wins using the timestamp ledger
//!   - `upload_data_type` / `download_data_type`: single-key primitives
//!   - `upload_all`: push every key with local data, after a backup
//!   - `download_all`: adopt every remote row with its remote timestamp
//!
//! `sync_all`, `upload_all`, `download_all`, `restore_backup` and
//! `delete_all_cloud_data` share one latch: a second caller is rejected, never
//! queued. Per-key failures are collected into the [`SyncResult`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use classvault_core::keys::{is_syncable, SYNCABLE_KEYS};
use classvault_core::{KeyError, SyncResult};
use classvault_storage::{CloudRecord, RemoteStore};
use classvault_store::LocalStore;

use crate::auth::AuthSession;
use crate::conflict::{resolve, SyncDirection};
use crate::error::SyncError;

pub const DEFAULT_BACKUP_RETENTION: usize = 3;

pub struct CloudSync {
    store: Arc<LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    auth: Arc<AuthSession>,
    latch: Mutex<()>,
    pub(crate) retention: usize,
}

/// Remote and user resolved at the start of one call.
pub(crate) struct Target {
    pub remote: Arc<dyn RemoteStore>,
    pub user_id: String,
}

impl CloudSync {
    /// `remote == None` means no backend is configured: every sync call
    /// degrades to a failed result and the store stays local-only.
    pub fn new(
        store: Arc<LocalStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        auth: Arc<AuthSession>,
    ) -> Self {
        Self {
            store,
            remote,
            auth,
            latch: Mutex::new(()),
            retention: DEFAULT_BACKUP_RETENTION,
        }
    }

    pub fn with_backup_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.remote.is_some()
    }

    pub fn is_syncing(&self) -> bool {
        self.latch.try_lock().is_err()
    }

    pub(crate) fn target(&self) -> Result<Target, SyncError> {
        let remote = self.remote.clone().ok_or(SyncError::NotConfigured)?;
        let user_id = self.auth.current_user().ok_or(SyncError::NotAuthenticated)?;
        Ok(Target { remote, user_id })
    }

    /// Take the latch, then resolve the target. Fails fast if either is unavailable.
    pub(crate) fn begin(&self) -> Result<(MutexGuard<'_, ()>, Target), SyncError> {
        let guard = self.latch.try_lock().map_err(|_| SyncError::InProgress)?;
        let target = self.target()?;
        Ok((guard, target))
    }

    // ── Full sync ────────────────────────────────────────────────────────────

    pub async fn sync_all(&self) -> SyncResult {
        let (_guard, target) = match self.begin() {
            Ok(started) => started,
            Err(e) => {
                warn!(reason = %e, "sync_all rejected");
                return SyncResult::failed(e.to_string());
            }
        };

        let remote_ts = match target.remote.list_timestamps(&target.user_id).await {
            Ok(ts) => ts,
            Err(e) => return SyncResult::failed(format!("listing remote timestamps: {e}")),
        };
        let local_ts = match self.store.get_timestamps() {
            Ok(ts) => ts,
            Err(e) => return SyncResult::failed(format!("reading local timestamps: {e}")),
        };

        let target = &target;
        let outcomes = join_all(SYNCABLE_KEYS.iter().map(|&key| {
            let seen = local_ts.get(key);
            let direction = resolve(seen, remote_ts.get(key).copied());
            async move {
                let outcome = match direction {
                    SyncDirection::Upload => self
                        .upload_key(target, key)
                        .await
                        .map(|done| done.then_some(direction)),
                    SyncDirection::Download => self
                        .download_key(target, key, Some(seen))
                        .await
                        .map(|done| done.then_some(direction)),
                    SyncDirection::UpToDate | SyncDirection::Skip => {
                        debug!(key, ?direction, "no transfer");
                        Ok(None)
                    }
                };
                (key, outcome)
            }
        }))
        .await;

        let mut result = SyncResult::default();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(Some(SyncDirection::Upload)) => result.uploaded.push(key.to_string()),
                Ok(Some(SyncDirection::Download)) => result.downloaded.push(key.to_string()),
                Ok(_) => {}
                Err(e) => record_key_error(&mut result, key, e),
            }
        }
        let result = result.finish();

        if result.success {
            if let Err(e) = self.store.record_sync(Utc::now()) {
                warn!(error = %e, "recording last sync time failed");
            }
        }
        info!(
            user = %target.user_id,
            uploaded = result.uploaded.len(),
            downloaded = result.downloaded.len(),
            errors = result.errors.len(),
            "sync_all finished"
        );
        result
    }

    // ── Single-key primitives ────────────────────────────────────────────────

    /// Upsert the stored form of `key` under its ledger timestamp.
    pub async fn upload_data_type(&self, key: &str) -> SyncResult {
        let target = match self.single_key_target(key) {
            Ok(target) => target,
            Err(result) => return result,
        };
        let mut result = SyncResult::default();
        match self.upload_key(&target, key).await {
            Ok(true) => result.uploaded.push(key.to_string()),
            Ok(false) => {}
            Err(e) => record_key_error(&mut result, key, e),
        }
        result.finish()
    }

    /// Adopt the remote row for `key`. A missing row is a no-op.
    pub async fn download_data_type(&self, key: &str) -> SyncResult {
        let target = match self.single_key_target(key) {
            Ok(target) => target,
            Err(result) => return result,
        };
        let mut result = SyncResult::default();
        match self.download_key(&target, key, None).await {
            Ok(true) => result.downloaded.push(key.to_string()),
            Ok(false) => {}
            Err(e) => record_key_error(&mut result, key, e),
        }
        result.finish()
    }

    fn single_key_target(&self, key: &str) -> Result<Target, SyncResult> {
        if !is_syncable(key) {
            return Err(SyncResult::failed(format!("{key} is not a syncable key")));
        }
        self.target().map_err(|e| SyncResult::failed(e.to_string()))
    }

    /// Returns false when there is no local value to upload.
    ///
    /// The timestamp is read before the value: a write landing in between
    /// leaves the ledger ahead of what was uploaded, so the next pass sends it.
    async fn upload_key(&self, target: &Target, key: &str) -> Result<bool> {
        let updated_at = match self.store.get_timestamp(key)? {
            Some(at) => at,
            None => {
                if self.store.get_raw_item(key)?.is_none() {
                    debug!(key, "no local data to upload");
                    return Ok(false);
                }
                // Values written before the ledger existed get stamped now.
                self.store.ensure_timestamp(key, Utc::now())?
            }
        };

        let Some(raw) = self
            .store
            .get_raw_item(key)
            .with_context(|| format!("reading local {key}"))?
        else {
            debug!(key, "no local data to upload");
            return Ok(false);
        };

        let record = CloudRecord {
            user_id: target.user_id.clone(),
            data_type: key.to_string(),
            encrypted_data: raw,
            updated_at,
        };
        target
            .remote
            .upsert(&record)
            .await
            .with_context(|| format!("uploading {key}"))?;
        debug!(key, user = %target.user_id, %updated_at, "uploaded");
        Ok(true)
    }

    /// Returns false when the remote has no row for `key`, or when `expected`
    /// is given and the local ledger entry no longer matches it.
    async fn download_key(
        &self,
        target: &Target,
        key: &str,
        expected: Option<Option<DateTime<Utc>>>,
    ) -> Result<bool> {
        let Some(record) = target
            .remote
            .fetch(&target.user_id, key)
            .await
            .with_context(|| format!("downloading {key}"))?
        else {
            debug!(key, "no remote row to download");
            return Ok(false);
        };
        let Some(expected) = expected else {
            self.adopt(&record)?;
            return Ok(true);
        };
        let adopted = self
            .store
            .set_raw_item_if_unchanged(
                &record.data_type,
                &record.encrypted_data,
                record.updated_at,
                expected,
            )
            .with_context(|| format!("storing downloaded {key}"))?;
        if adopted {
            debug!(key, updated_at = %record.updated_at, "downloaded");
        } else {
            info!(key, "local write during sync, keeping it for the next pass");
        }
        Ok(adopted)
    }

    /// Write a remote row locally, keeping the remote timestamp so the next
    /// `sync_all` sees both sides as equal.
    fn adopt(&self, record: &CloudRecord) -> Result<()> {
        self.store
            .set_raw_item_with_timestamp(
                &record.data_type,
                &record.encrypted_data,
                record.updated_at,
            )
            .with_context(|| format!("storing downloaded {}", record.data_type))?;
        debug!(key = %record.data_type, updated_at = %record.updated_at, "downloaded");
        Ok(())
    }

    // ── Bulk transfer ────────────────────────────────────────────────────────

    /// Push every syncable key that has local data, regardless of timestamps.
    ///
    /// A backup of the current remote rows is taken first. If that fails the
    /// upload still proceeds.
    pub async fn upload_all(&self) -> SyncResult {
        let (_guard, target) = match self.begin() {
            Ok(started) => started,
            Err(e) => {
                warn!(reason = %e, "upload_all rejected");
                return SyncResult::failed(e.to_string());
            }
        };

        match self.create_backup_for(&target).await {
            Ok(Some(backup)) => info!(backup = %backup.id, "backup taken before upload_all"),
            Ok(None) => debug!("no remote data to back up"),
            Err(e) => warn!(error = %format!("{e:#}"), "backup before upload_all failed, uploading anyway"),
        }

        let target = &target;
        let outcomes = join_all(SYNCABLE_KEYS.iter().map(|&key| async move {
            (key, self.upload_key(target, key).await)
        }))
        .await;

        let mut result = SyncResult::default();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(true) => result.uploaded.push(key.to_string()),
                Ok(false) => {}
                Err(e) => record_key_error(&mut result, key, e),
            }
        }
        let result = result.finish();
        info!(
            user = %target.user_id,
            uploaded = result.uploaded.len(),
            errors = result.errors.len(),
            "upload_all finished"
        );
        result
    }

    /// Adopt every remote row of the user, overwriting local ledger entries.
    pub async fn download_all(&self) -> SyncResult {
        let (_guard, target) = match self.begin() {
            Ok(started) => started,
            Err(e) => {
                warn!(reason = %e, "download_all rejected");
                return SyncResult::failed(e.to_string());
            }
        };
        self.download_all_for(&target).await
    }

    pub(crate) async fn download_all_for(&self, target: &Target) -> SyncResult {
        let records = match target.remote.fetch_all(&target.user_id).await {
            Ok(records) => records,
            Err(e) => return SyncResult::failed(format!("fetching remote rows: {e}")),
        };

        let mut result = SyncResult::default();
        for record in records {
            if !is_syncable(&record.data_type) {
                warn!(data_type = %record.data_type, "ignoring remote row for a local-only key");
                continue;
            }
            match self.adopt(&record) {
                Ok(()) => result.downloaded.push(record.data_type),
                Err(e) => record_key_error(&mut result, &record.data_type, e),
            }
        }
        let result = result.finish();
        info!(
            user = %target.user_id,
            downloaded = result.downloaded.len(),
            errors = result.errors.len(),
            "download_all finished"
        );
        result
    }

    // ── Account-level probes ─────────────────────────────────────────────────

    /// Whether the signed-in user has any remote rows. False when unconfigured
    /// or signed out.
    pub async fn has_cloud_data(&self) -> Result<bool> {
        let target = match self.target() {
            Ok(target) => target,
            Err(e) => {
                debug!(reason = %e, "cloud data probe skipped");
                return Ok(false);
            }
        };
        let count = target
            .remote
            .count(&target.user_id)
            .await
            .context("counting remote rows")?;
        Ok(count > 0)
    }

    /// Delete every remote row of the signed-in user. Backups are kept.
    pub async fn delete_all_cloud_data(&self) -> Result<usize> {
        let (_guard, target) = self.begin()?;
        let deleted = target
            .remote
            .delete_all(&target.user_id)
            .await
            .context("deleting remote rows")?;
        warn!(user = %target.user_id, count = deleted, "all cloud data deleted");
        Ok(deleted)
    }
}

fn record_key_error(result: &mut SyncResult, key: &str, error: anyhow::Error) {
    let message = format!("{error:#}");
    warn!(key, error = %message, "key failed");
    result.errors.push(KeyError::for_key(key, message));
}

impl std::fmt::Debug for CloudSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSync")
            .field("configured", &self.is_configured())
            .field("user", &self.auth.current_user())
            .field("retention", &self.retention)
            .finish()
    }
}
