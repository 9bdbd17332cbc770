//! cvault: classvault command-line interface
//!
//! Local store:
//!   init | verify | get | set | rm | keys | migrate | reset --yes
//!
//! Cloud:
//!   status | sync | push-all | pull-all | cloud has | cloud delete --yes
//!   backup list | backup create | backup restore <id> --yes | watch
//!
//! Misc:
//!   config show

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use classvault_core::config::{expand_home, VaultConfig};
use classvault_core::keys::{is_encrypted, is_syncable};
use classvault_core::SyncResult;
use classvault_crypto::{Cipher, KdfParams};
use classvault_storage::{build_operator, OpendalRemote, RemoteStore};
use classvault_store::LocalStore;
use classvault_sync::{AuthSession, AutoSync, CloudSync};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "cvault",
    version,
    about = "classvault encrypted local store and cloud sync",
    long_about = "cvault: manage the classvault encrypted store, its password, cloud sync and backups"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "CLASSVAULT_CONFIG",
        default_value = "~/.config/classvault/config.toml"
    )]
    config: PathBuf,

    /// Signed-in user id for cloud operations (overrides sync.user_id)
    #[arg(long, env = "CLASSVAULT_USER")]
    user: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides log.level
    #[arg(long, env = "CLASSVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides log.format
    #[arg(long, env = "CLASSVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set the store password on first run
    Init,

    /// Check a password against the store
    Verify,

    /// Print the value stored under a key
    Get { key: String },

    /// Store a value under a key ("-" reads the value from stdin)
    Set { key: String, value: String },

    /// Remove a key
    Rm { key: String },

    /// List keys with their encryption and sync status
    Keys,

    /// Encrypt values written before encryption was enabled
    Migrate,

    /// Delete the password and every encrypted key (irreversible)
    Reset {
        #[arg(long)]
        yes: bool,
    },

    /// Show local store and cloud status
    Status,

    /// Reconcile syncable keys with the cloud (last writer wins)
    Sync,

    /// Upload every syncable key, replacing cloud copies (backs up first)
    #[command(name = "push-all")]
    PushAll,

    /// Download every cloud row, replacing local copies
    #[command(name = "pull-all")]
    PullAll,

    /// Cloud account data
    Cloud {
        #[command(subcommand)]
        action: CloudAction,
    },

    /// Cloud backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Sync on start, then re-sync whenever the remote becomes reachable again
    Watch,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum CloudAction {
    /// Whether the cloud holds any data for this user
    Has,
    /// Delete all cloud rows for this user (backups are kept)
    Delete {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BackupAction {
    /// List retained backups, newest first
    List,
    /// Snapshot the current cloud rows
    Create,
    /// Restore a backup to the cloud, then download it locally
    Restore {
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_home(&cli.config);
    let config = VaultConfig::load(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.log.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "cvault starting"
    );

    let user = cli.user.as_deref();
    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
        Commands::Init => cmd_init(&config).await,
        Commands::Verify => cmd_verify(&config).await,
        Commands::Get { key } => cmd_get(&config, &key).await,
        Commands::Set { key, value } => cmd_set(&config, &key, &value).await,
        Commands::Rm { key } => cmd_rm(&config, &key).await,
        Commands::Keys => cmd_keys(&config),
        Commands::Migrate => cmd_migrate(&config).await,
        Commands::Reset { yes } => cmd_reset(&config, yes).await,
        Commands::Status => cmd_status(&config, user).await,
        Commands::Sync => {
            let sync = build_sync(&config, user)?;
            report(with_spinner("sync", sync.sync_all()).await)
        }
        Commands::PushAll => {
            let sync = build_sync(&config, user)?;
            report(with_spinner("push-all", sync.upload_all()).await)
        }
        Commands::PullAll => {
            let sync = build_sync(&config, user)?;
            report(with_spinner("pull-all", sync.download_all()).await)
        }
        Commands::Cloud { action } => cmd_cloud(&config, user, action).await,
        Commands::Backup { action } => cmd_backup(&config, user, action).await,
        Commands::Watch => cmd_watch(&config, user).await,
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so command output stays pipeable.
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

fn open_store(config: &VaultConfig) -> Result<Arc<LocalStore>> {
    let cipher = Arc::new(Cipher::new(KdfParams {
        iterations: config.crypto.pbkdf2_iterations,
        cache_capacity: config.crypto.key_cache_capacity,
    }));
    let path = expand_home(&config.store.path);
    let store = LocalStore::open(&path, cipher)
        .with_context(|| format!("opening store {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_remote(config: &VaultConfig) -> Result<Option<Arc<dyn RemoteStore>>> {
    if !config.storage.is_configured() {
        return Ok(None);
    }
    let op = build_operator(&config.storage).context("building storage operator")?;
    let remote: Arc<dyn RemoteStore> = Arc::new(OpendalRemote::new(op, &config.storage.prefix));
    Ok(Some(remote))
}

fn build_sync(config: &VaultConfig, user: Option<&str>) -> Result<CloudSync> {
    let store = open_store(config)?;
    let remote = build_remote(config)?;
    let auth = Arc::new(AuthSession::new());
    if let Some(user) = user.map(str::to_string).or_else(|| config.sync.user_id.clone()) {
        auth.sign_in(user);
    }
    Ok(CloudSync::new(store, remote, auth).with_backup_retention(config.sync.backup_retention))
}

/// `CLASSVAULT_PASSWORD`, or a no-echo prompt.
fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("CLASSVAULT_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

async fn unlock(store: &LocalStore) -> Result<()> {
    if !store.has_password()? {
        anyhow::bail!("no password configured: run `cvault init` first");
    }
    let password = read_password("Password: ")?;
    if !store.unlock(password).await {
        anyhow::bail!("wrong password");
    }
    Ok(())
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

async fn with_spinner<F: std::future::Future<Output = SyncResult>>(
    prefix: &str,
    fut: F,
) -> SyncResult {
    let pb = make_spinner(prefix);
    pb.set_message("working...");
    let result = fut.await;
    pb.finish_and_clear();
    result
}

fn report(result: SyncResult) -> Result<()> {
    if !result.uploaded.is_empty() {
        println!("uploaded:   {}", result.uploaded.join(", "));
    }
    if !result.downloaded.is_empty() {
        println!("downloaded: {}", result.downloaded.join(", "));
    }
    if result.uploaded.is_empty() && result.downloaded.is_empty() && result.success {
        println!("up to date");
    }
    for error in &result.errors {
        eprintln!("error: {error}");
    }
    if !result.success {
        anyhow::bail!("{} error(s)", result.errors.len());
    }
    Ok(())
}

// ── Local store commands ──────────────────────────────────────────────────────

async fn cmd_init(config: &VaultConfig) -> Result<()> {
    let store = open_store(config)?;
    if store.has_password()? {
        anyhow::bail!("a password is already configured (use `cvault reset --yes` to start over)");
    }
    let password = read_password("New password: ")?;
    if std::env::var("CLASSVAULT_PASSWORD").is_err() {
        let confirm = read_password("Repeat password: ")?;
        if password.expose_secret() != confirm.expose_secret() {
            anyhow::bail!("passwords do not match");
        }
    }
    store.setup_password(password).await?;
    println!("password set");

    let report = store.migrate_unencrypted_data().await?;
    if !report.migrated.is_empty() {
        println!("encrypted existing data: {}", report.migrated.join(", "));
    }
    Ok(())
}

async fn cmd_verify(config: &VaultConfig) -> Result<()> {
    let store = open_store(config)?;
    let password = read_password("Password: ")?;
    if store.validate_password(&password).await {
        println!("password OK");
        Ok(())
    } else {
        anyhow::bail!("wrong password (or no password configured)")
    }
}

async fn cmd_get(config: &VaultConfig, key: &str) -> Result<()> {
    let store = open_store(config)?;
    if is_encrypted(key) {
        unlock(&store).await?;
    }
    match store.get_item(key).await? {
        Some(value) => println!("{value}"),
        None => anyhow::bail!("{key}: not set"),
    }
    Ok(())
}

async fn cmd_set(config: &VaultConfig, key: &str, value: &str) -> Result<()> {
    let store = open_store(config)?;
    let value = if value == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading value from stdin")?;
        buf
    } else {
        value.to_string()
    };
    if is_encrypted(key) {
        unlock(&store).await?;
    }
    store.set_item(key, &value).await?;
    Ok(())
}

async fn cmd_rm(config: &VaultConfig, key: &str) -> Result<()> {
    let store = open_store(config)?;
    store.remove_item(key).await?;
    Ok(())
}

fn cmd_keys(config: &VaultConfig) -> Result<()> {
    let store = open_store(config)?;
    let ledger = store.get_timestamps()?;
    for key in store.keys()? {
        let enc = if is_encrypted(&key) { "enc" } else { "   " };
        let sync = if is_syncable(&key) { "sync" } else { "    " };
        match ledger.get(&key) {
            Some(at) => println!("{enc} {sync}  {key:<16} {at}"),
            None => println!("{enc} {sync}  {key}"),
        }
    }
    Ok(())
}

async fn cmd_migrate(config: &VaultConfig) -> Result<()> {
    let store = open_store(config)?;
    unlock(&store).await?;
    let report = store.migrate_unencrypted_data().await?;
    println!("migrated:          {}", report.migrated.len());
    println!("already encrypted: {}", report.already_encrypted.len());
    for (key, reason) in &report.failed {
        eprintln!("failed: {key}: {reason}");
    }
    if !report.is_clean() {
        anyhow::bail!("{} key(s) could not be migrated", report.failed.len());
    }
    Ok(())
}

async fn cmd_reset(config: &VaultConfig, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("reset deletes the password and all encrypted data; re-run with --yes");
    }
    let store = open_store(config)?;
    store.reset_all_data().await?;
    println!("local encrypted data reset");
    Ok(())
}

// ── Cloud commands ────────────────────────────────────────────────────────────

async fn cmd_status(config: &VaultConfig, user: Option<&str>) -> Result<()> {
    let sync = build_sync(config, user)?;
    let store = sync.store();
    println!("store:      {}", expand_home(&config.store.path).display());
    println!("password:   {}", if store.has_password()? { "configured" } else { "not set" });
    println!("keys:       {}", store.keys()?.len());
    println!("tracked:    {}", store.get_timestamps()?.len());
    match store.last_sync()? {
        Some(at) => println!("last sync:  {at}"),
        None => println!("last sync:  never"),
    }

    let Some(remote) = sync.remote() else {
        println!("cloud:      not configured (local only)");
        return Ok(());
    };
    println!(
        "cloud:      {} ({})",
        config.storage.backend, config.storage.prefix
    );
    match sync.auth().current_user() {
        Some(user) => println!("user:       {user}"),
        None => println!("user:       not signed in"),
    }
    match remote.ping().await {
        Ok(()) => {
            println!("reachable:  yes");
            println!("cloud data: {}", if sync.has_cloud_data().await? { "yes" } else { "no" });
        }
        Err(e) => println!("reachable:  no ({e})"),
    }
    Ok(())
}

async fn cmd_cloud(config: &VaultConfig, user: Option<&str>, action: CloudAction) -> Result<()> {
    let sync = build_sync(config, user)?;
    match action {
        CloudAction::Has => {
            let has = sync.has_cloud_data().await?;
            println!("{}", if has { "yes" } else { "no" });
        }
        CloudAction::Delete { yes } => {
            if !yes {
                anyhow::bail!("this deletes all cloud data for the user; re-run with --yes");
            }
            let deleted = sync.delete_all_cloud_data().await?;
            println!("deleted {deleted} cloud row(s)");
        }
    }
    Ok(())
}

async fn cmd_backup(config: &VaultConfig, user: Option<&str>, action: BackupAction) -> Result<()> {
    let sync = build_sync(config, user)?;
    match action {
        BackupAction::List => {
            let backups = sync.get_backups().await?;
            if backups.is_empty() {
                println!("no backups");
            }
            for backup in backups {
                println!(
                    "{}  {}  {} key(s)",
                    backup.id,
                    backup.created_at,
                    backup.backup_data.len()
                );
            }
        }
        BackupAction::Create => match sync.create_backup().await? {
            Some(backup) => println!("created backup {}", backup.id),
            None => println!("no cloud data to back up"),
        },
        BackupAction::Restore { id, yes } => {
            if !yes {
                anyhow::bail!(
                    "restore overwrites cloud and local copies of every key in the backup; re-run with --yes"
                );
            }
            report(with_spinner("restore", sync.restore_backup(&id)).await)?;
        }
    }
    Ok(())
}

async fn cmd_watch(config: &VaultConfig, user: Option<&str>) -> Result<()> {
    let sync = Arc::new(build_sync(config, user)?);
    if !sync.is_configured() {
        anyhow::bail!("cloud sync is not configured (set [storage] backend)");
    }
    let auto = AutoSync::new(sync, config.sync.enabled);
    if !config.sync.enabled {
        tracing::warn!("sync.enabled is false: watching without syncing");
    }

    if config.sync.sync_on_start {
        if let Some(result) = auto.on_app_start().await {
            report(result).ok();
        }
    }

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    let interval = Duration::from_secs(config.sync.connectivity_interval_secs.max(1));
    auto.watch_connectivity(interval, cancel).await;
    Ok(())
}

// ── `cvault config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
