//! Per-user record store.
//!
//! [`RemoteStore`] is the seam the sync engine talks to. [`OpendalRemote`]
//! implements it on any OpenDAL operator; every operation is scoped to one
//! user's directory, and ids are validated before they become path segments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opendal::Operator;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{RemoteError, RemoteResult};
use crate::records::{Backup, CloudRecord};

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `data_type -> updated_at` for every row of the user.
    async fn list_timestamps(&self, user_id: &str)
        -> RemoteResult<BTreeMap<String, DateTime<Utc>>>;

    async fn fetch(&self, user_id: &str, data_type: &str) -> RemoteResult<Option<CloudRecord>>;

    async fn fetch_all(&self, user_id: &str) -> RemoteResult<Vec<CloudRecord>>;

    /// Insert or replace the row for `(record.user_id, record.data_type)`.
    async fn upsert(&self, record: &CloudRecord) -> RemoteResult<()>;

    async fn count(&self, user_id: &str) -> RemoteResult<usize>;

    /// Delete every row of the user. Returns how many were removed.
    async fn delete_all(&self, user_id: &str) -> RemoteResult<usize>;

    async fn insert_backup(&self, backup: &Backup) -> RemoteResult<()>;

    /// All backups of the user, newest first.
    async fn list_backups(&self, user_id: &str) -> RemoteResult<Vec<Backup>>;

    async fn get_backup(&self, user_id: &str, id: &str) -> RemoteResult<Option<Backup>>;

    async fn delete_backup(&self, user_id: &str, id: &str) -> RemoteResult<()>;

    /// Cheap reachability probe.
    async fn ping(&self) -> RemoteResult<()>;
}

/// [`RemoteStore`] over an OpenDAL operator.
#[derive(Clone)]
pub struct OpendalRemote {
    op: Operator,
    prefix: String,
}

impl OpendalRemote {
    pub fn new(op: Operator, prefix: &str) -> Self {
        Self {
            op,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn user_dir(&self, table: &str, user_id: &str) -> RemoteResult<String> {
        let user_id = segment("user id", user_id)?;
        Ok(if self.prefix.is_empty() {
            format!("{table}/{user_id}/")
        } else {
            format!("{}/{table}/{user_id}/", self.prefix)
        })
    }

    fn record_path(&self, user_id: &str, data_type: &str) -> RemoteResult<String> {
        let dir = self.user_dir("user_data", user_id)?;
        Ok(format!("{dir}{}.json", segment("data type", data_type)?))
    }

    fn backup_path(&self, user_id: &str, id: &str) -> RemoteResult<String> {
        let dir = self.user_dir("user_data_backups", user_id)?;
        Ok(format!("{dir}{}.json", segment("backup id", id)?))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> RemoteResult<Option<T>> {
        match self.op.read(path).await {
            Ok(data) => {
                let value = serde_json::from_slice(&data.to_bytes()).map_err(|e| {
                    RemoteError::Corrupt {
                        path: path.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: serde::Serialize>(&self, path: &str, value: &T) -> RemoteResult<()> {
        let json = serde_json::to_vec_pretty(value)?;
        self.op.write(path, json).await?;
        Ok(())
    }

    /// Paths of the `.json` objects directly under `dir`.
    async fn list_objects(&self, dir: &str) -> RemoteResult<Vec<String>> {
        let entries = match self.op.list(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file() && entry.name().ends_with(".json"))
            .map(|entry| entry.path().to_string())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Decode every object under `dir`. Undecodable objects are logged and
    /// skipped so one bad row cannot hide its siblings.
    async fn read_all<T: serde::de::DeserializeOwned>(&self, dir: &str) -> RemoteResult<Vec<T>> {
        let mut out = Vec::new();
        for path in self.list_objects(dir).await? {
            match self.read_json(&path).await {
                Ok(Some(value)) => out.push(value),
                // Listed but gone: deleted concurrently.
                Ok(None) => {}
                Err(RemoteError::Corrupt { path, reason }) => {
                    warn!(%path, %reason, "skipping undecodable remote object");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl RemoteStore for OpendalRemote {
    async fn list_timestamps(
        &self,
        user_id: &str,
    ) -> RemoteResult<BTreeMap<String, DateTime<Utc>>> {
        Ok(self
            .fetch_all(user_id)
            .await?
            .into_iter()
            .map(|r| (r.data_type, r.updated_at))
            .collect())
    }

    async fn fetch(&self, user_id: &str, data_type: &str) -> RemoteResult<Option<CloudRecord>> {
        let path = self.record_path(user_id, data_type)?;
        self.read_json(&path).await
    }

    async fn fetch_all(&self, user_id: &str) -> RemoteResult<Vec<CloudRecord>> {
        let dir = self.user_dir("user_data", user_id)?;
        let records: Vec<CloudRecord> = self.read_all(&dir).await?;
        // The object name is authoritative; ignore rows whose body disagrees.
        Ok(records
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect())
    }

    async fn upsert(&self, record: &CloudRecord) -> RemoteResult<()> {
        let path = self.record_path(&record.user_id, &record.data_type)?;
        self.write_json(&path, record).await?;
        debug!(user = %record.user_id, data_type = %record.data_type, "remote row upserted");
        Ok(())
    }

    async fn count(&self, user_id: &str) -> RemoteResult<usize> {
        let dir = self.user_dir("user_data", user_id)?;
        Ok(self.list_objects(&dir).await?.len())
    }

    async fn delete_all(&self, user_id: &str) -> RemoteResult<usize> {
        let dir = self.user_dir("user_data", user_id)?;
        let paths = self.list_objects(&dir).await?;
        for path in &paths {
            self.op.delete(path).await?;
        }
        debug!(user = %user_id, count = paths.len(), "remote rows deleted");
        Ok(paths.len())
    }

    async fn insert_backup(&self, backup: &Backup) -> RemoteResult<()> {
        let path = self.backup_path(&backup.user_id, &backup.id)?;
        self.write_json(&path, backup).await
    }

    async fn list_backups(&self, user_id: &str) -> RemoteResult<Vec<Backup>> {
        let dir = self.user_dir("user_data_backups", user_id)?;
        let mut backups: Vec<Backup> = self.read_all(&dir).await?;
        backups.retain(|b| b.user_id == user_id);
        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(backups)
    }

    async fn get_backup(&self, user_id: &str, id: &str) -> RemoteResult<Option<Backup>> {
        let path = self.backup_path(user_id, id)?;
        let backup: Option<Backup> = self.read_json(&path).await?;
        Ok(backup.filter(|b| b.user_id == user_id))
    }

    async fn delete_backup(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        let path = self.backup_path(user_id, id)?;
        self.op.delete(&path).await?;
        Ok(())
    }

    async fn ping(&self) -> RemoteResult<()> {
        crate::health::check_health(&self.op, &self.prefix)
            .await
            .map_err(|e| RemoteError::Other(e.to_string()))
    }
}

/// Accept `value` as a single path segment.
fn segment<'a>(kind: &'static str, value: &'a str) -> RemoteResult<&'a str> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '@' | '.'));
    if valid {
        Ok(value)
    } else {
        Err(RemoteError::InvalidSegment {
            kind,
            value: value.to_string(),
        })
    }
}
