use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::error::FailureKind;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("encoder binary unavailable: {0}")]
    Unavailable(String),
    #[error("unsupported or corrupt input: {reason}")]
    UnsupportedInput { reason: String },
    #[error("encoder exceeded wall-clock budget of {budget:?}")]
    Timeout { budget: Duration },
    #[error("encoder invocation cancelled")]
    Cancelled,
    #[error("failed to parse encoder output: {0}")]
    Parse(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl EncoderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EncoderError::Unavailable(_) => FailureKind::Transient,
            EncoderError::Io { .. } => FailureKind::Transient,
            EncoderError::Timeout { .. } => FailureKind::Timeout,
            EncoderError::UnsupportedInput { .. }
            | EncoderError::Parse(_)
            | EncoderError::Cancelled => FailureKind::Permanent,
        }
    }
}

impl From<std::io::Error> for EncoderError {
    fn from(source: std::io::Error) -> Self {
        EncoderError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

pub type EncoderResult<T> = Result<T, EncoderError>;
