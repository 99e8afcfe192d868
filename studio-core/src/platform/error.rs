use thiserror::Error;

use crate::error::FailureKind;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request to remote platform timed out")]
    Timeout,
    #[error("platform api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("webhook signature rejected: {0}")]
    SignatureRejected(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl PlatformError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PlatformError::Network(_) | PlatformError::Timeout => FailureKind::Transient,
            PlatformError::Api { status, .. } if *status >= 500 => FailureKind::Transient,
            PlatformError::Api { .. } => FailureKind::Permanent,
            PlatformError::SignatureRejected(_) => FailureKind::SignatureRejected,
            PlatformError::InvalidPayload(_) | PlatformError::InvalidUrl(_) => {
                FailureKind::Permanent
            }
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            PlatformError::Timeout
        } else {
            PlatformError::Network(error.to_string())
        }
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;
