use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StudioError;

/// Video lifecycle. `Ready` and `Error` are terminal; the only legal moves
/// are uploading -> processing, processing -> ready and processing -> error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Uploading,
    Processing,
    Ready,
    Error,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploading => "uploading",
            VideoStatus::Processing => "processing",
            VideoStatus::Ready => "ready",
            VideoStatus::Error => "error",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, VideoStatus::Ready | VideoStatus::Error)
    }

    pub fn can_transition(&self, next: VideoStatus) -> bool {
        matches!(
            (self, next),
            (VideoStatus::Uploading, VideoStatus::Processing)
                | (VideoStatus::Processing, VideoStatus::Ready)
                | (VideoStatus::Processing, VideoStatus::Error)
        )
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(VideoStatus::Uploading),
            "processing" => Ok(VideoStatus::Processing),
            "ready" => Ok(VideoStatus::Ready),
            "error" => Ok(VideoStatus::Error),
            other => Err(StudioError::InvalidStatus(other.to_string())),
        }
    }
}

/// AI enrichment lifecycle, independent of the video lifecycle. A failed
/// run may be retried (failed -> processing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Disabled,
}

impl AiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiStatus::Pending => "pending",
            AiStatus::Processing => "processing",
            AiStatus::Completed => "completed",
            AiStatus::Failed => "failed",
            AiStatus::Disabled => "disabled",
        }
    }

    pub fn can_transition(&self, next: AiStatus) -> bool {
        matches!(
            (self, next),
            (AiStatus::Pending, AiStatus::Processing)
                | (AiStatus::Processing, AiStatus::Completed)
                | (AiStatus::Processing, AiStatus::Failed)
                | (AiStatus::Failed, AiStatus::Processing)
        )
    }
}

impl fmt::Display for AiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiStatus {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AiStatus::Pending),
            "processing" => Ok(AiStatus::Processing),
            "completed" => Ok(AiStatus::Completed),
            "failed" => Ok(AiStatus::Failed),
            "disabled" => Ok(AiStatus::Disabled),
            other => Err(StudioError::InvalidStatus(other.to_string())),
        }
    }
}

/// A video record. `version` backs optimistic concurrency on status
/// transitions; readers never block writers.
#[derive(Debug, Clone, Serialize)]
pub struct Video {
    pub video_id: String,
    pub owner_id: String,
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub source_path: Option<String>,
    pub asset_id: Option<String>,
    pub playback_id: Option<String>,
    pub upload_id: Option<String>,
    pub duration_seconds: Option<f64>,
    pub aspect_ratio: Option<String>,
    pub resolution: Option<String>,
    pub size_bytes: Option<u64>,
    pub thumbnail_url: Option<String>,
    pub preview_gif_url: Option<String>,
    pub status: VideoStatus,
    pub processing_progress: f64,
    pub error_message: Option<String>,
    pub ai_status: AiStatus,
    pub has_transcript: bool,
    pub has_analysis: bool,
    pub has_tags: bool,
    pub has_chapters: bool,
    pub view_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub is_public: bool,
    pub link_expires_at: Option<DateTime<Utc>>,
    pub max_views: Option<i64>,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Video {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            video_id: row.get("video_id")?,
            owner_id: row.get("owner_id")?,
            project_id: row.get("project_id")?,
            title: row.get("title")?,
            source_path: row.get("source_path")?,
            asset_id: row.get("asset_id")?,
            playback_id: row.get("playback_id")?,
            upload_id: row.get("upload_id")?,
            duration_seconds: row.get("duration_seconds")?,
            aspect_ratio: row.get("aspect_ratio")?,
            resolution: row.get("resolution")?,
            size_bytes: row.get::<_, Option<i64>>("size_bytes")?.map(|v| v as u64),
            thumbnail_url: row.get("thumbnail_url")?,
            preview_gif_url: row.get("preview_gif_url")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(VideoStatus::Error),
            processing_progress: row.get("processing_progress")?,
            error_message: row.get("error_message")?,
            ai_status: row
                .get::<_, String>("ai_status")?
                .parse()
                .unwrap_or(AiStatus::Disabled),
            has_transcript: row.get::<_, i64>("has_transcript")? != 0,
            has_analysis: row.get::<_, i64>("has_analysis")? != 0,
            has_tags: row.get::<_, i64>("has_tags")? != 0,
            has_chapters: row.get::<_, i64>("has_chapters")? != 0,
            view_count: row.get("view_count")?,
            comment_count: row.get("comment_count")?,
            share_count: row.get("share_count")?,
            is_public: row.get::<_, i64>("is_public")? != 0,
            link_expires_at: to_utc(row.get("link_expires_at")?),
            max_views: row.get("max_views")?,
            version: row.get("version")?,
            created_at: to_utc(row.get("created_at")?),
            updated_at: to_utc(row.get("updated_at")?),
        })
    }

    /// Whether the sharing link still admits viewers.
    pub fn link_active(&self, now: DateTime<Utc>) -> bool {
        if let Some(expires) = self.link_expires_at {
            if now >= expires {
                return false;
            }
        }
        if let Some(cap) = self.max_views {
            if self.view_count >= cap {
                return false;
            }
        }
        true
    }
}

fn to_utc(value: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    value.map(|dt| Utc.from_utc_datetime(&dt))
}

/// Parameters for registering a new video.
#[derive(Debug, Clone, Default)]
pub struct NewVideo {
    pub owner_id: String,
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub source_path: Option<String>,
    pub size_bytes: Option<u64>,
}

impl NewVideo {
    pub fn generate_id() -> String {
        format!("vid-{}", Uuid::new_v4().simple())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    pub owner_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<VideoStatus>,
    pub ai_status: Option<AiStatus>,
    pub title_query: Option<String>,
    pub limit: Option<usize>,
}

/// Sharing controls applied to a video link.
#[derive(Debug, Clone, Default)]
pub struct SharingSettings {
    pub is_public: bool,
    pub password_hash: Option<String>,
    pub link_expires_at: Option<DateTime<Utc>>,
    pub max_views: Option<i64>,
}

/// Per-kind event tallies and a per-day view rollup over a window, plus
/// the lifetime counters.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub video_id: String,
    pub view_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub events_in_window: Vec<(String, i64)>,
    pub views_by_day: Vec<(String, i64)>,
}

/// A stored transcript alongside its language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTranscript {
    pub video_id: String,
    pub language: String,
    pub segments: Vec<crate::transcribe::TranscriptionSegment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_status_transitions() {
        assert!(VideoStatus::Uploading.can_transition(VideoStatus::Processing));
        assert!(VideoStatus::Processing.can_transition(VideoStatus::Ready));
        assert!(VideoStatus::Processing.can_transition(VideoStatus::Error));
        assert!(!VideoStatus::Uploading.can_transition(VideoStatus::Ready));
        assert!(!VideoStatus::Ready.can_transition(VideoStatus::Processing));
        assert!(!VideoStatus::Error.can_transition(VideoStatus::Processing));
    }

    #[test]
    fn ai_status_allows_retry_after_failure() {
        assert!(AiStatus::Failed.can_transition(AiStatus::Processing));
        assert!(!AiStatus::Completed.can_transition(AiStatus::Processing));
        assert!(!AiStatus::Disabled.can_transition(AiStatus::Processing));
    }
}
