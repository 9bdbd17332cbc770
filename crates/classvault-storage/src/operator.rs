//! OpenDAL Operator factory for classvault remote backends

use anyhow::{Context, Result};
use opendal::Operator;

use classvault_core::config::{expand_home, StorageConfig};

/// Build an OpenDAL Operator for the configured backend.
///
/// `s3` reads credentials from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
/// If `enforce_tls` is true and the S3 endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_operator(cfg: &StorageConfig) -> Result<Operator> {
    let op = match cfg.backend.trim() {
        "s3" => s3_operator(cfg)?,
        "fs" => {
            let root = cfg
                .root
                .as_deref()
                .context("storage.root is required for the fs backend")?;
            let root = expand_home(root);
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder)
                .context("creating OpenDAL fs operator")?
                .finish()
        }
        "memory" => memory_operator()?,
        "" => anyhow::bail!("no remote storage backend configured"),
        other => anyhow::bail!("unknown storage backend {other:?} (expected s3, fs or memory)"),
    };

    Ok(op
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        ))
}

/// Process-local operator. Contents vanish when the last clone is dropped.
pub fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}

// Path-style addressing is the opendal 0.55 default, which MinIO-style
// endpoints require. Do not call enable_virtual_host_style().
fn s3_operator(cfg: &StorageConfig) -> Result<Operator> {
    if cfg.endpoint.starts_with("http://") {
        if cfg.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                cfg.endpoint
            );
        }
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
        );
    }

    let mut builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket);
    if let Ok(key_id) = std::env::var("AWS_ACCESS_KEY_ID") {
        builder = builder.access_key_id(&key_id);
    }
    if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
        builder = builder.secret_access_key(&secret);
    }

    Ok(Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .finish())
}
