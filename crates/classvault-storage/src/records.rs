//! Remote row types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One user's remote copy of one syncable key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudRecord {
    pub user_id: String,
    pub data_type: String,
    /// Stored form from the device, opaque to the server.
    pub encrypted_data: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub encrypted_data: String,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time snapshot of every [`CloudRecord`] of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub backup_data: BTreeMap<String, BackupEntry>,
}

impl Backup {
    /// Snapshot `records` under a fresh time-ordered id.
    pub fn snapshot(user_id: &str, records: &[CloudRecord]) -> Self {
        let backup_data = records
            .iter()
            .map(|r| {
                (
                    r.data_type.clone(),
                    BackupEntry {
                        encrypted_data: r.encrypted_data.clone(),
                        updated_at: r.updated_at,
                    },
                )
            })
            .collect();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            backup_data,
        }
    }

    /// The rows this snapshot restores to.
    pub fn records(&self) -> Vec<CloudRecord> {
        self.backup_data
            .iter()
            .map(|(data_type, entry)| CloudRecord {
                user_id: self.user_id.clone(),
                data_type: data_type.clone(),
                encrypted_data: entry.encrypted_data.clone(),
                updated_at: entry.updated_at,
            })
            .collect()
    }
}
