mod render;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::TranscriptionSection;
use crate::encoder::{CancelFlag, EncoderEngine, EncoderError};
use crate::error::FailureKind;
use crate::retry::BackoffPolicy;

pub use render::{to_json, to_srt, to_vtt};

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("audio extraction failed: {0}")]
    Audio(#[from] EncoderError),
    #[error("speech-to-text provider error {status:?}: {message}")]
    Provider { status: Option<u16>, message: String },
    #[error("network error reaching speech-to-text provider: {0}")]
    Network(String),
    #[error("invalid transcript: {0}")]
    InvalidTranscript(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TranscribeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TranscribeError::Audio(inner) => inner.kind(),
            TranscribeError::Network(_) => FailureKind::Transient,
            TranscribeError::Provider { status, .. } => match status {
                Some(code) if *code >= 500 || *code == 429 => FailureKind::Transient,
                Some(_) => FailureKind::Permanent,
                None => FailureKind::Transient,
            },
            TranscribeError::InvalidTranscript(_) | TranscribeError::Serialization(_) => {
                FailureKind::Permanent
            }
        }
    }
}

pub type TranscribeResult<T> = Result<T, TranscribeError>;

/// One timed caption unit. Segments for a video are time-ordered and
/// non-overlapping; confidence lies in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f64,
    pub speaker: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Raw provider response, before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderTranscript {
    pub segments: Vec<ProviderSegment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: Option<f64>,
    pub speaker: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Hosted speech-to-text service seam. Injected so tests substitute fakes.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
    ) -> TranscribeResult<ProviderTranscript>;
}

/// HTTP implementation posting extracted audio to the configured endpoint.
pub struct HttpSpeechClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl HttpSpeechClient {
    pub fn new(config: &TranscriptionSection) -> TranscribeResult<Self> {
        let http = Client::builder()
            .user_agent("studio-core/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| TranscribeError::Network(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechClient {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
    ) -> TranscribeResult<ProviderTranscript> {
        let audio = tokio::fs::read(audio_path)
            .await
            .map_err(|err| TranscribeError::Audio(EncoderError::Io {
                path: audio_path.to_path_buf(),
                source: err,
            }))?;
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .query(&[("language", language)])
            .header("content-type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TranscribeError::Provider {
                        status: None,
                        message: "request timed out".to_string(),
                    }
                } else {
                    TranscribeError::Network(err.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Provider {
                status: Some(status.as_u16()),
                message,
            });
        }
        response
            .json::<ProviderTranscript>()
            .await
            .map_err(|err| TranscribeError::InvalidTranscript(err.to_string()))
    }
}

/// Extracts audio, submits it with bounded retry, and normalizes the result.
/// Partial transcripts are never returned; normalization is all-or-nothing.
pub struct Transcriber {
    engine: Arc<EncoderEngine>,
    provider: Arc<dyn SpeechToText>,
    backoff: BackoffPolicy,
    default_language: String,
    merge_gap: f64,
}

impl Transcriber {
    pub fn new(
        engine: Arc<EncoderEngine>,
        provider: Arc<dyn SpeechToText>,
        config: &TranscriptionSection,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            engine,
            provider,
            backoff,
            default_language: config.default_language.clone(),
            merge_gap: config.merge_gap_ms as f64 / 1000.0,
        }
    }

    pub async fn transcribe(
        &self,
        video_path: &Path,
        language: Option<&str>,
        cancel: &CancelFlag,
    ) -> TranscribeResult<Vec<TranscriptionSegment>> {
        let language = language.unwrap_or(&self.default_language);
        let audio_path = self.engine.extract_audio(video_path, cancel).await?;
        let raw = self.submit_with_retry(&audio_path, language).await;
        // The extracted audio is an intermediate; remove it regardless of
        // the provider outcome.
        let _ = std::fs::remove_file(&audio_path);
        let raw = raw?;
        let segments = normalize_segments(raw.segments, self.merge_gap)?;
        debug!(
            video = %video_path.display(),
            language,
            segments = segments.len(),
            "transcription normalized"
        );
        Ok(segments)
    }

    async fn submit_with_retry(
        &self,
        audio_path: &Path,
        language: &str,
    ) -> TranscribeResult<ProviderTranscript> {
        let mut attempt = 0u32;
        loop {
            match self.provider.transcribe(audio_path, language).await {
                Ok(raw) => return Ok(raw),
                Err(err) if err.kind().retryable() && attempt + 1 < self.backoff.max_attempts() => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        wait = ?delay,
                        error = %err,
                        "retrying speech-to-text submission"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Orders segments, clamps confidence into [0, 1], merges segments whose
/// boundary gap is below `merge_gap` for the same speaker, and enforces
/// non-overlap. Irreparable timing yields a permanent error.
pub fn normalize_segments(
    raw: Vec<ProviderSegment>,
    merge_gap: f64,
) -> TranscribeResult<Vec<TranscriptionSegment>> {
    let mut candidates: Vec<TranscriptionSegment> = raw
        .into_iter()
        .filter(|segment| !segment.text.trim().is_empty())
        .map(|segment| TranscriptionSegment {
            start: segment.start,
            end: segment.end,
            text: segment.text.trim().to_string(),
            confidence: segment.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
            speaker: segment.speaker,
            keywords: segment.keywords,
        })
        .collect();

    for segment in &candidates {
        if !segment.start.is_finite() || !segment.end.is_finite() || segment.start < 0.0 {
            return Err(TranscribeError::InvalidTranscript(format!(
                "segment has invalid timing: {:.3}..{:.3}",
                segment.start, segment.end
            )));
        }
        if segment.end <= segment.start {
            return Err(TranscribeError::InvalidTranscript(format!(
                "segment ends before it starts: {:.3}..{:.3}",
                segment.start, segment.end
            )));
        }
    }

    candidates.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut merged: Vec<TranscriptionSegment> = Vec::with_capacity(candidates.len());
    for segment in candidates {
        match merged.last_mut() {
            Some(previous)
                if segment.start - previous.end <= merge_gap
                    && previous.speaker == segment.speaker =>
            {
                previous.end = previous.end.max(segment.end);
                previous.text.push(' ');
                previous.text.push_str(&segment.text);
                previous.confidence = previous.confidence.min(segment.confidence);
                previous.keywords.extend(segment.keywords);
            }
            Some(previous) if segment.start < previous.end => {
                // Distinct speakers overlapping: clamp the boundary.
                let mut clamped = segment;
                clamped.start = previous.end;
                if clamped.end <= clamped.start {
                    return Err(TranscribeError::InvalidTranscript(
                        "segment fully contained in its predecessor".to_string(),
                    ));
                }
                merged.push(clamped);
            }
            _ => merged.push(segment),
        }
    }
    Ok(merged)
}
