//! Shared fixtures for sync integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use classvault_crypto::{Cipher, KdfParams};
use classvault_storage::{
    memory_operator, Backup, CloudRecord, OpendalRemote, RemoteError, RemoteResult, RemoteStore,
};
use classvault_core::keys::TIMESTAMPS_KEY;
use classvault_store::{KvBackend, LocalStore, MemoryBackend, StoreResult, TimestampLedger};
use classvault_sync::{AuthSession, CloudSync};

pub const USER: &str = "teacher-1";

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn fast_cipher() -> Arc<Cipher> {
    Arc::new(Cipher::new(KdfParams {
        iterations: 1_000,
        cache_capacity: 100,
    }))
}

pub fn memory_store() -> Arc<LocalStore> {
    Arc::new(LocalStore::with_backend(
        Arc::new(MemoryBackend::new()),
        fast_cipher(),
    ))
}

pub fn memory_remote() -> Arc<OpendalRemote> {
    Arc::new(OpendalRemote::new(memory_operator().unwrap(), "classvault"))
}

pub fn engine(store: Arc<LocalStore>, remote: Arc<dyn RemoteStore>) -> CloudSync {
    CloudSync::new(store, Some(remote), Arc::new(AuthSession::signed_in(USER)))
}

pub fn row(data_type: &str, data: &str, at: &str) -> CloudRecord {
    CloudRecord {
        user_id: USER.into(),
        data_type: data_type.into(),
        encrypted_data: data.into(),
        updated_at: ts(at),
    }
}

/// Wraps a remote with fault injection: per-key failures, an offline switch,
/// and an optional gate that holds `list_timestamps` until released.
pub struct FaultyRemote {
    inner: Arc<dyn RemoteStore>,
    fail_key: Option<String>,
    offline: AtomicBool,
    gate: Option<Arc<Notify>>,
    after_fetch: Option<Arc<dyn Fn() + Send + Sync>>,
    calls: AtomicUsize,
}

impl FaultyRemote {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self {
            inner,
            fail_key: None,
            offline: AtomicBool::new(false),
            gate: None,
            after_fetch: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, key: &str) -> Self {
        self.fail_key = Some(key.to_string());
        self
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Run `hook` after every successful `fetch`, before the caller sees the row.
    pub fn after_fetch(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.after_fetch = Some(Arc::new(hook));
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of remote calls made so far (ping excluded).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, key: Option<&str>) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Other("network unreachable".into()));
        }
        if key.is_some() && key == self.fail_key.as_deref() {
            return Err(RemoteError::Other(format!(
                "injected failure for {}",
                key.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FaultyRemote {
    async fn list_timestamps(
        &self,
        user_id: &str,
    ) -> RemoteResult<BTreeMap<String, DateTime<Utc>>> {
        self.enter(None)?;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.inner.list_timestamps(user_id).await
    }

    async fn fetch(&self, user_id: &str, data_type: &str) -> RemoteResult<Option<CloudRecord>> {
        self.enter(Some(data_type))?;
        let row = self.inner.fetch(user_id, data_type).await?;
        if let Some(hook) = &self.after_fetch {
            hook();
        }
        Ok(row)
    }

    async fn fetch_all(&self, user_id: &str) -> RemoteResult<Vec<CloudRecord>> {
        self.enter(None)?;
        self.inner.fetch_all(user_id).await
    }

    async fn upsert(&self, record: &CloudRecord) -> RemoteResult<()> {
        self.enter(Some(&record.data_type))?;
        self.inner.upsert(record).await
    }

    async fn count(&self, user_id: &str) -> RemoteResult<usize> {
        self.enter(None)?;
        self.inner.count(user_id).await
    }

    async fn delete_all(&self, user_id: &str) -> RemoteResult<usize> {
        self.enter(None)?;
        self.inner.delete_all(user_id).await
    }

    async fn insert_backup(&self, backup: &Backup) -> RemoteResult<()> {
        self.enter(Some("__backup"))?;
        self.inner.insert_backup(backup).await
    }

    async fn list_backups(&self, user_id: &str) -> RemoteResult<Vec<Backup>> {
        self.enter(None)?;
        self.inner.list_backups(user_id).await
    }

    async fn get_backup(&self, user_id: &str, id: &str) -> RemoteResult<Option<Backup>> {
        self.enter(None)?;
        self.inner.get_backup(user_id, id).await
    }

    async fn delete_backup(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        self.enter(None)?;
        self.inner.delete_backup(user_id, id).await
    }

    async fn ping(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Other("network unreachable".into()));
        }
        self.inner.ping().await
    }
}

/// Backend that simulates a local edit racing a sync: the first read of
/// `key` returns the stored value, then `value` is written and the key's
/// ledger entry moved to `at`, as `set_item` would.
pub struct InterleavingBackend {
    inner: MemoryBackend,
    key: &'static str,
    value: &'static str,
    at: DateTime<Utc>,
    fired: AtomicBool,
}

impl InterleavingBackend {
    pub fn new(key: &'static str, value: &'static str, at: DateTime<Utc>) -> Self {
        Self {
            inner: MemoryBackend::new(),
            key,
            value,
            at,
            fired: AtomicBool::new(true),
        }
    }

    /// Fire on the next read of the key.
    pub fn arm(&self) {
        self.fired.store(false, Ordering::SeqCst);
    }

    fn edit(&self) -> StoreResult<()> {
        self.inner.set(self.key, self.value)?;
        let mut ledger = TimestampLedger::from_json(self.inner.get(TIMESTAMPS_KEY)?.as_deref())?;
        ledger.set(self.key, self.at);
        self.inner.set(TIMESTAMPS_KEY, &ledger.to_json()?)
    }
}

impl KvBackend for InterleavingBackend {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self.inner.get(key)?;
        if key == self.key && !self.fired.swap(true, Ordering::SeqCst) {
            self.edit()?;
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.inner.remove(key)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys()
    }
}
