use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// How a failure is treated by retry logic. Every component error type maps
/// into one of these through its `kind()` accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network, quota or resource hiccups. Retried with backoff.
    Transient,
    /// Malformed input, unsupported format. Never retried.
    Permanent,
    /// Wall-clock budget exceeded.
    Timeout,
    /// Webhook rejected at the boundary. No state change follows.
    SignatureRejected,
    /// Queue at capacity. Callers receive backpressure, not an enqueue.
    ResourceExhausted,
}

impl FailureKind {
    pub fn retryable(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Timeout => "timeout",
            FailureKind::SignatureRejected => "signature_rejected",
            FailureKind::ResourceExhausted => "resource_exhausted",
        };
        f.write_str(label)
    }
}
