//! Top-level error types for the forum mirror.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("PII_PEPPER must be 64 hex characters (256-bit secret)")]
    InvalidPepper,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Store gateway and cursor errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to MySQL: {0}")]
    Connect(sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("malformed sync cursor: {0}")]
    MalformedCursor(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Chat-platform client errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("rate limited on channel {channel_id}")]
    RateLimited { channel_id: u64 },

    #[error("platform request failed: {0}")]
    Request(String),

    #[error("not connected to the gateway")]
    NotConnected,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Media pipeline errors. Always per-attachment; the enclosing post
/// still persists when one of these is logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("unsupported attachment extension: {0}")]
    UnsupportedExtension(String),

    #[error("attachment exceeds {limit_bytes} bytes")]
    TooLarge { limit_bytes: u64 },

    #[error("download failed: {0}")]
    Download(String),

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("webp encode failed: {0}")]
    Encode(String),

    #[error("upload failed: {0}")]
    Upload(String),
}

/// Sync engine errors. These abort the run without advancing the cursor.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("sync cancelled")]
    Cancelled,

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
