use std::path::PathBuf;

use thiserror::Error;

use crate::encoder::EncoderError;
use crate::error::FailureKind;
use crate::jobs::JobError;
use crate::platform::PlatformError;
use crate::transcribe::TranscribeError;

use super::models::VideoStatus;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("failed to open video database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on video database: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("video store path not configured")]
    MissingStore,
    #[error("video not found: {0}")]
    NotFound(String),
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("video {video_id} cannot move from {from} to {to}")]
    IllegalTransition {
        video_id: String,
        from: VideoStatus,
        to: VideoStatus,
    },
    #[error("concurrent update on video {0}, retries exhausted")]
    Conflict(String),
    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: String },
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Jobs(#[from] JobError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Transcription(#[from] TranscribeError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StudioError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StudioError::Open { .. } | StudioError::Database(_) | StudioError::Conflict(_) => {
                FailureKind::Transient
            }
            StudioError::Platform(inner) => inner.kind(),
            StudioError::Jobs(inner) => inner.kind(),
            StudioError::Encoder(inner) => inner.kind(),
            StudioError::Transcription(inner) => inner.kind(),
            _ => FailureKind::Permanent,
        }
    }
}

pub type StudioResult<T> = Result<T, StudioError>;
