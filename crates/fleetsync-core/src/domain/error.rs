//! Domain-level error taxonomy for fleetsync.

/// Errors produced by fleetsync operations.
///
/// Transient git/tool command failures are deliberately NOT errors: the
/// repository client and upgrader report them through return values and
/// keep going. This enum covers the conditions that should reach a caller.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid cron expression: {0}")]
    Cron(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("failed to start process: {0}")]
    Spawn(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("config parse error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fleetsync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
