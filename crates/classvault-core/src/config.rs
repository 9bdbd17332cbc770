use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub log: LogConfig,
    pub store: StoreConfig,
    pub crypto: CryptoConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
}

impl VaultConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found (using defaults)");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Local store path. A `.json` suffix selects the JSON file backend.
    pub path: PathBuf,
}

/// Key derivation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-HMAC-SHA256 rounds (default: 20000)
    pub pbkdf2_iterations: u32,
    /// Maximum cached (password, salt) derivations (default: 100)
    pub key_cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Remote backend: "s3", "fs", or "memory". Empty disables cloud sync.
    pub backend: String,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Root directory for the "fs" backend
    pub root: Option<PathBuf>,
    /// Object prefix under which user rows and backups live
    pub prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

impl StorageConfig {
    pub fn is_configured(&self) -> bool {
        !self.backend.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Enable cloud sync (default: false)
    pub enabled: bool,
    /// Signed-in account id; absent means not authenticated
    pub user_id: Option<String>,
    /// Run one sync on start if this device never synced
    pub sync_on_start: bool,
    /// Backups retained per user (default: 3)
    pub backup_retention: usize,
    /// Connectivity probe interval for `watch`, in seconds
    pub connectivity_interval_secs: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/classvault/store.json"),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: 20_000,
            key_cache_capacity: 100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: String::new(),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "classvault".into(),
            root: None,
            prefix: "classvault".into(),
            enforce_tls: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user_id: None,
            sync_on_start: true,
            backup_retention: 3,
            connectivity_interval_secs: 30,
        }
    }
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[store]
path = "/var/lib/classvault/store.db"

[crypto]
pbkdf2_iterations = 50000
key_cache_capacity = 10

[storage]
backend = "s3"
endpoint = "https://s3.example.com"
region = "eu-west-1"
bucket = "school"
prefix = "prod"
enforce_tls = true

[sync]
enabled = true
user_id = "teacher-42"
sync_on_start = false
backup_retention = 5
connectivity_interval_secs = 10
"#;
        let config: VaultConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.store.path, PathBuf::from("/var/lib/classvault/store.db"));
        assert_eq!(config.crypto.pbkdf2_iterations, 50000);
        assert_eq!(config.crypto.key_cache_capacity, 10);
        assert!(config.storage.is_configured());
        assert_eq!(config.storage.bucket, "school");
        assert!(config.storage.enforce_tls);
        assert!(config.sync.enabled);
        assert_eq!(config.sync.user_id.as_deref(), Some("teacher-42"));
        assert!(!config.sync.sync_on_start);
        assert_eq!(config.sync.backup_retention, 5);
    }

    #[test]
    fn test_parse_defaults() {
        let config: VaultConfig = toml::from_str("").unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
        assert_eq!(config.crypto.pbkdf2_iterations, 20_000);
        assert_eq!(config.crypto.key_cache_capacity, 100);
        assert!(!config.storage.is_configured());
        assert!(!config.sync.enabled);
        assert!(config.sync.user_id.is_none());
        assert_eq!(config.sync.backup_retention, 3);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[storage]
backend = "fs"
root = "/tmp/classvault-remote"
"#;
        let config: VaultConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.storage.backend, "fs");
        assert_eq!(config.storage.root, Some(PathBuf::from("/tmp/classvault-remote")));
        assert_eq!(config.storage.prefix, "classvault");
        assert_eq!(config.sync.connectivity_interval_secs, 30);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.crypto.pbkdf2_iterations, 20_000);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync\nenabled = yes").unwrap();
        let err = VaultConfig::load(&path).unwrap_err();
        assert!(matches!(err, VaultError::Config(_)));
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home(Path::new("/absolute/path"));
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
        if let Some(home) = std::env::var_os("HOME") {
            let expanded = expand_home(Path::new("~/data/store.json"));
            assert_eq!(expanded, PathBuf::from(home).join("data/store.json"));
        }
    }
}
