use thiserror::Error;

/// Failure to produce a sample at all.
///
/// Per-field failures never surface here; sources fill those fields with the
/// not-running sentinel instead.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse {0}")]
    Parse(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("already sampling; stop the current session first")]
    AlreadyRunning,

    #[error("sample source failed: {0}")]
    Source(#[from] SourceError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("could not spawn sampling worker: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProfilerError>;
