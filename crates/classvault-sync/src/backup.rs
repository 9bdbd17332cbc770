//! Backups of the remote rows, taken before wholesale overwrites.

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};

use classvault_core::{KeyError, SyncResult};
use classvault_storage::Backup;

use crate::engine::{CloudSync, Target};

impl CloudSync {
    /// Snapshot every remote row of the signed-in user, then prune to the
    /// retention limit. `None` when there is nothing to back up.
    pub async fn create_backup(&self) -> Result<Option<Backup>> {
        let target = self.target()?;
        self.create_backup_for(&target).await
    }

    pub(crate) async fn create_backup_for(&self, target: &Target) -> Result<Option<Backup>> {
        let records = target
            .remote
            .fetch_all(&target.user_id)
            .await
            .context("reading remote rows for backup")?;
        if records.is_empty() {
            return Ok(None);
        }

        let backup = Backup::snapshot(&target.user_id, &records);
        target
            .remote
            .insert_backup(&backup)
            .await
            .context("inserting backup")?;
        info!(
            user = %target.user_id,
            backup = %backup.id,
            rows = backup.backup_data.len(),
            "backup created"
        );

        if let Err(e) = self.prune_backups(target).await {
            warn!(user = %target.user_id, error = %format!("{e:#}"), "pruning old backups failed");
        }
        Ok(Some(backup))
    }

    /// Delete everything past the newest `retention` backups.
    async fn prune_backups(&self, target: &Target) -> Result<usize> {
        let backups = target
            .remote
            .list_backups(&target.user_id)
            .await
            .context("listing backups")?;
        let mut pruned = 0;
        for stale in backups.iter().skip(self.retention) {
            target
                .remote
                .delete_backup(&target.user_id, &stale.id)
                .await
                .with_context(|| format!("deleting backup {}", stale.id))?;
            debug!(backup = %stale.id, "pruned backup");
            pruned += 1;
        }
        Ok(pruned)
    }

    /// Retained backups of the signed-in user, newest first.
    pub async fn get_backups(&self) -> Result<Vec<Backup>> {
        let target = self.target()?;
        let mut backups = target
            .remote
            .list_backups(&target.user_id)
            .await
            .context("listing backups")?;
        backups.truncate(self.retention);
        Ok(backups)
    }

    /// Write every row of backup `id` back to the remote, then adopt the
    /// restored state locally with a full download.
    ///
    /// Overwrites remote and local data. Callers confirm with the user first.
    pub async fn restore_backup(&self, id: &str) -> SyncResult {
        let (_guard, target) = match self.begin() {
            Ok(started) => started,
            Err(e) => {
                warn!(reason = %e, "restore rejected");
                return SyncResult::failed(e.to_string());
            }
        };

        let backup = match target.remote.get_backup(&target.user_id, id).await {
            Ok(Some(backup)) => backup,
            Ok(None) => return SyncResult::failed(format!("backup {id} not found")),
            Err(e) => return SyncResult::failed(format!("reading backup {id}: {e}")),
        };

        let records = backup.records();
        let remote = &target.remote;
        let outcomes = join_all(records.iter().map(|record| async move {
            (record.data_type.as_str(), remote.upsert(record).await)
        }))
        .await;

        let mut result = SyncResult::default();
        for (data_type, outcome) in outcomes {
            if let Err(e) = outcome {
                warn!(key = data_type, error = %e, "restoring row failed");
                result
                    .errors
                    .push(KeyError::for_key(data_type, format!("restoring: {e}")));
            }
        }

        result.absorb(self.download_all_for(&target).await);
        let result = result.finish();
        info!(
            backup = %id,
            restored = records.len(),
            errors = result.errors.len(),
            "restore finished"
        );
        result
    }
}
