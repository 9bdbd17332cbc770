//! Automatic sync on app start and when connectivity comes back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use classvault_core::SyncResult;

use crate::engine::CloudSync;

pub struct AutoSync {
    sync: Arc<CloudSync>,
    enabled: bool,
    /// Last observed connectivity. Starts online so the first successful
    /// probe is not mistaken for a reconnect.
    online: AtomicBool,
}

impl AutoSync {
    pub fn new(sync: Arc<CloudSync>, enabled: bool) -> Self {
        Self {
            sync,
            enabled,
            online: AtomicBool::new(true),
        }
    }

    pub fn sync(&self) -> &Arc<CloudSync> {
        &self.sync
    }

    /// One `sync_all` if enabled and this device has never completed a sync.
    pub async fn on_app_start(&self) -> Option<SyncResult> {
        if !self.enabled {
            return None;
        }
        match self.sync.store().last_sync() {
            Ok(Some(at)) => {
                debug!(last_sync = %at, "already synced on this device, no start-up sync");
                return None;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "reading last sync time failed, syncing anyway"),
        }
        info!("first start-up sync");
        Some(self.sync.sync_all().await)
    }

    /// One `sync_all` on an offline to online transition. Other reports only
    /// update the remembered state.
    pub async fn on_connectivity_change(&self, online: bool) -> Option<SyncResult> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if !self.enabled || !online || was_online {
            return None;
        }
        info!("back online, syncing");
        Some(self.sync.sync_all().await)
    }

    /// Probe the remote every `interval` and feed transitions to
    /// [`Self::on_connectivity_change`] until `cancel` fires.
    pub async fn watch_connectivity(&self, interval: Duration, cancel: CancellationToken) {
        let Some(remote) = self.sync.remote().cloned() else {
            debug!("no remote configured, connectivity watch not started");
            return;
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "watching connectivity");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("connectivity watch cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let online = remote.ping().await.is_ok();
                    if !online {
                        debug!("remote unreachable");
                    }
                    if let Some(result) = self.on_connectivity_change(online).await {
                        if !result.success {
                            warn!(errors = result.errors.len(), "reconnect sync finished with errors");
                        }
                    }
                }
            }
        }
    }
}
