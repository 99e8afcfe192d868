use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::warn;

use crate::platform::WebhookEvent;
use crate::sqlite::configure_connection;
use crate::transcribe::TranscriptionSegment;

use super::error::{StudioError, StudioResult};
use super::models::{
    AiStatus, AnalyticsSummary, NewVideo, SharingSettings, StoredTranscript, Video, VideoFilter,
    VideoStatus,
};

const VIDEOS_SCHEMA: &str = include_str!("../../../sql/videos.sql");

/// How a webhook event relates to what the store has already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// First sighting; caller must process it.
    Fresh,
    /// Seen before but processing never finished; caller should reprocess.
    Replay,
    /// Seen and fully processed; caller must not act again.
    Duplicate,
}

/// Counter and flag fields that jobs flip as artifacts land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFlag {
    Transcript,
    Analysis,
    Tags,
    Chapters,
}

impl ArtifactFlag {
    fn column(&self) -> &'static str {
        match self {
            ArtifactFlag::Transcript => "has_transcript",
            ArtifactFlag::Analysis => "has_analysis",
            ArtifactFlag::Tags => "has_tags",
            ArtifactFlag::Chapters => "has_chapters",
        }
    }
}

/// Facts learned from the encoder or the remote platform, applied
/// field-by-field; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct MediaFacts {
    pub duration_seconds: Option<f64>,
    pub aspect_ratio: Option<String>,
    pub resolution: Option<String>,
    pub size_bytes: Option<u64>,
    pub playback_id: Option<String>,
    pub thumbnail_url: Option<String>,
    pub preview_gif_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VideoStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for VideoStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl VideoStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StudioResult<VideoStore> {
        let path = self.path.ok_or(StudioError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(VideoStore { path, flags })
    }
}

/// SQLite-backed record of videos, webhook events, transcripts and
/// analytics. Status transitions use compare-and-swap on the row version.
#[derive(Debug, Clone)]
pub struct VideoStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl VideoStore {
    pub fn builder() -> VideoStoreBuilder {
        VideoStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StudioResult<Self> {
        VideoStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> StudioResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StudioError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| StudioError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StudioResult<()> {
        let conn = self.open()?;
        conn.execute_batch(VIDEOS_SCHEMA)?;
        Ok(())
    }

    pub fn insert(&self, new: &NewVideo) -> StudioResult<Video> {
        let video_id = NewVideo::generate_id();
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO videos (video_id, owner_id, project_id, title, source_path, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &video_id,
                &new.owner_id,
                new.project_id.as_deref(),
                new.title.as_deref(),
                new.source_path.as_deref(),
                new.size_bytes.map(|v| v as i64),
            ],
        )?;
        self.get(&video_id)
    }

    pub fn get(&self, video_id: &str) -> StudioResult<Video> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT * FROM videos WHERE video_id = ?1",
            [video_id],
            Video::from_row,
        )
        .optional()?
        .ok_or_else(|| StudioError::NotFound(video_id.to_string()))
    }

    pub fn find_by_asset(&self, asset_id: &str) -> StudioResult<Option<Video>> {
        let conn = self.open()?;
        Ok(conn
            .query_row(
                "SELECT * FROM videos WHERE asset_id = ?1",
                [asset_id],
                Video::from_row,
            )
            .optional()?)
    }

    pub fn find_by_upload(&self, upload_id: &str) -> StudioResult<Option<Video>> {
        let conn = self.open()?;
        Ok(conn
            .query_row(
                "SELECT * FROM videos WHERE upload_id = ?1",
                [upload_id],
                Video::from_row,
            )
            .optional()?)
    }

    pub fn list(&self, filter: &VideoFilter) -> StudioResult<Vec<Video>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM videos
             WHERE (?1 IS NULL OR owner_id = ?1)
               AND (?2 IS NULL OR project_id = ?2)
               AND (?3 IS NULL OR status = ?3)
               AND (?4 IS NULL OR ai_status = ?4)
               AND (?5 IS NULL OR title LIKE '%' || ?5 || '%')
             ORDER BY created_at DESC
             LIMIT ?6",
        )?;
        let rows = stmt
            .query_map(
                params![
                    filter.owner_id.as_deref(),
                    filter.project_id.as_deref(),
                    filter.status.map(|status| status.as_str()),
                    filter.ai_status.map(|status| status.as_str()),
                    filter.title_query.as_deref(),
                    filter.limit.unwrap_or(50) as i64,
                ],
                Video::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Compare-and-swap transition. Succeeds only when the row still holds
    /// `expected_version` and the stored status equals `from`; exactly one
    /// of several racing writers observes `true`.
    pub fn try_transition(
        &self,
        video_id: &str,
        expected_version: i64,
        from: VideoStatus,
        to: VideoStatus,
        error_message: Option<&str>,
    ) -> StudioResult<bool> {
        if !from.can_transition(to) {
            return Err(StudioError::IllegalTransition {
                video_id: video_id.to_string(),
                from,
                to,
            });
        }
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE videos
             SET status = ?3, error_message = ?4, version = version + 1,
                 updated_at = CURRENT_TIMESTAMP
             WHERE video_id = ?1 AND version = ?2 AND status = ?5",
            params![
                video_id,
                expected_version,
                to.as_str(),
                error_message,
                from.as_str(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn update_ai_status(
        &self,
        video_id: &str,
        from: AiStatus,
        to: AiStatus,
    ) -> StudioResult<bool> {
        if !from.can_transition(to) {
            return Ok(false);
        }
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE videos
             SET ai_status = ?3, updated_at = CURRENT_TIMESTAMP
             WHERE video_id = ?1 AND ai_status = ?2",
            params![video_id, from.as_str(), to.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn attach_remote(
        &self,
        video_id: &str,
        upload_id: Option<&str>,
        asset_id: Option<&str>,
    ) -> StudioResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE videos
             SET upload_id = COALESCE(?2, upload_id),
                 asset_id = COALESCE(?3, asset_id),
                 updated_at = CURRENT_TIMESTAMP
             WHERE video_id = ?1",
            params![video_id, upload_id, asset_id],
        )?;
        if affected == 0 {
            return Err(StudioError::NotFound(video_id.to_string()));
        }
        Ok(())
    }

    pub fn update_media_facts(&self, video_id: &str, facts: &MediaFacts) -> StudioResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE videos
             SET duration_seconds = COALESCE(?2, duration_seconds),
                 aspect_ratio = COALESCE(?3, aspect_ratio),
                 resolution = COALESCE(?4, resolution),
                 size_bytes = COALESCE(?5, size_bytes),
                 playback_id = COALESCE(?6, playback_id),
                 thumbnail_url = COALESCE(?7, thumbnail_url),
                 preview_gif_url = COALESCE(?8, preview_gif_url),
                 updated_at = CURRENT_TIMESTAMP
             WHERE video_id = ?1",
            params![
                video_id,
                facts.duration_seconds,
                facts.aspect_ratio.as_deref(),
                facts.resolution.as_deref(),
                facts.size_bytes.map(|v| v as i64),
                facts.playback_id.as_deref(),
                facts.thumbnail_url.as_deref(),
                facts.preview_gif_url.as_deref(),
            ],
        )?;
        if affected == 0 {
            return Err(StudioError::NotFound(video_id.to_string()));
        }
        Ok(())
    }

    pub fn set_artifact_flag(
        &self,
        video_id: &str,
        flag: ArtifactFlag,
        value: bool,
    ) -> StudioResult<()> {
        let conn = self.open()?;
        let sql = format!(
            "UPDATE videos SET {} = ?2, updated_at = CURRENT_TIMESTAMP WHERE video_id = ?1",
            flag.column()
        );
        let affected = conn.execute(&sql, params![video_id, value as i64])?;
        if affected == 0 {
            return Err(StudioError::NotFound(video_id.to_string()));
        }
        Ok(())
    }

    pub fn set_progress(&self, video_id: &str, progress: f64) -> StudioResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE videos
             SET processing_progress = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE video_id = ?1 AND status = 'processing'",
            params![video_id, progress.clamp(0.0, 1.0)],
        )?;
        Ok(())
    }

    pub fn update_sharing(&self, video_id: &str, sharing: &SharingSettings) -> StudioResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE videos
             SET is_public = ?2, password_hash = ?3, link_expires_at = ?4, max_views = ?5,
                 updated_at = CURRENT_TIMESTAMP
             WHERE video_id = ?1",
            params![
                video_id,
                sharing.is_public as i64,
                sharing.password_hash.as_deref(),
                sharing.link_expires_at.map(|dt| dt.naive_utc()),
                sharing.max_views,
            ],
        )?;
        if affected == 0 {
            return Err(StudioError::NotFound(video_id.to_string()));
        }
        Ok(())
    }

    /// Records an inbound event keyed by its platform-assigned id. Replays
    /// of unprocessed events are surfaced so crash recovery can finish them.
    pub fn record_event(&self, event: &WebhookEvent) -> StudioResult<EventDisposition> {
        let conn = self.open()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO webhook_events
                 (event_id, event_type, asset_id, raw_payload, received_at, processed)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                &event.event_id,
                &event.event_type,
                event.asset_id.as_deref(),
                event.raw.to_string(),
                event.received_at.naive_utc(),
            ],
        )?;
        if inserted > 0 {
            return Ok(EventDisposition::Fresh);
        }
        let processed: i64 = conn.query_row(
            "SELECT processed FROM webhook_events WHERE event_id = ?1",
            [&event.event_id],
            |row| row.get(0),
        )?;
        if processed == 0 {
            Ok(EventDisposition::Replay)
        } else {
            Ok(EventDisposition::Duplicate)
        }
    }

    pub fn mark_event_processed(&self, event_id: &str) -> StudioResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE webhook_events SET processed = 1 WHERE event_id = ?1",
            [event_id],
        )?;
        Ok(())
    }

    /// Holds an event that arrived before its video row existed.
    pub fn buffer_orphan(&self, event: &WebhookEvent, asset_id: &str) -> StudioResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR IGNORE INTO orphan_events (event_id, asset_id, raw_payload, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &event.event_id,
                asset_id,
                event.raw.to_string(),
                event.received_at.naive_utc(),
            ],
        )?;
        Ok(())
    }

    /// Drains buffered events for `asset_id`, oldest first, removing them.
    pub fn take_orphans(&self, asset_id: &str) -> StudioResult<Vec<String>> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let payloads = {
            let mut stmt = tx.prepare(
                "SELECT raw_payload FROM orphan_events
                 WHERE asset_id = ?1 ORDER BY received_at ASC",
            )?;
            let rows = stmt
                .query_map([asset_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute("DELETE FROM orphan_events WHERE asset_id = ?1", [asset_id])?;
        tx.commit()?;
        Ok(payloads)
    }

    /// Discards buffered events older than `window`, logging each drop.
    pub fn discard_expired_orphans(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StudioResult<usize> {
        let cutoff = (now - window).naive_utc();
        let conn = self.open()?;
        let expired: Vec<(String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT event_id, asset_id FROM orphan_events WHERE received_at < ?1",
            )?;
            let rows = stmt
                .query_map([cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        for (event_id, asset_id) in &expired {
            warn!(event_id, asset_id, "discarding expired orphan webhook event");
        }
        conn.execute("DELETE FROM orphan_events WHERE received_at < ?1", [cutoff])?;
        Ok(expired.len())
    }

    /// Deletes processed webhook events older than `retention`. Rows still
    /// awaiting processing are kept regardless of age.
    pub fn prune_processed_events(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> StudioResult<usize> {
        let cutoff = (now - retention).naive_utc();
        let conn = self.open()?;
        let removed = conn.execute(
            "DELETE FROM webhook_events WHERE processed = 1 AND received_at < ?1",
            [cutoff],
        )?;
        Ok(removed)
    }

    pub fn store_transcript(
        &self,
        video_id: &str,
        language: &str,
        segments: &[TranscriptionSegment],
    ) -> StudioResult<()> {
        let encoded = serde_json::to_string(segments)?;
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO transcripts (video_id, segments, language)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(video_id) DO UPDATE SET
                 segments = excluded.segments,
                 language = excluded.language,
                 created_at = CURRENT_TIMESTAMP",
            params![video_id, encoded, language],
        )?;
        Ok(())
    }

    pub fn fetch_transcript(&self, video_id: &str) -> StudioResult<Option<StoredTranscript>> {
        let conn = self.open()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT segments, language FROM transcripts WHERE video_id = ?1",
                [video_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((segments, language)) => Ok(Some(StoredTranscript {
                video_id: video_id.to_string(),
                language,
                segments: serde_json::from_str(&segments)?,
            })),
            None => Ok(None),
        }
    }

    /// Counts a view when the sharing link still admits it. Returns whether
    /// the view was admitted.
    pub fn record_view(&self, video_id: &str, now: DateTime<Utc>) -> StudioResult<bool> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let video = tx
            .query_row(
                "SELECT * FROM videos WHERE video_id = ?1",
                [video_id],
                Video::from_row,
            )
            .optional()?
            .ok_or_else(|| StudioError::NotFound(video_id.to_string()))?;
        if !video.link_active(now) {
            return Ok(false);
        }
        tx.execute(
            "UPDATE videos SET view_count = view_count + 1, updated_at = CURRENT_TIMESTAMP
             WHERE video_id = ?1",
            [video_id],
        )?;
        tx.execute(
            "INSERT INTO analytics_events (video_id, event_kind, occurred_at)
             VALUES (?1, 'view', ?2)",
            params![video_id, now.naive_utc()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn record_engagement(&self, video_id: &str, kind: &str) -> StudioResult<()> {
        let column = match kind {
            "comment" => Some("comment_count"),
            "share" => Some("share_count"),
            _ => None,
        };
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        if let Some(column) = column {
            let sql = format!(
                "UPDATE videos SET {column} = {column} + 1, updated_at = CURRENT_TIMESTAMP
                 WHERE video_id = ?1"
            );
            let affected = tx.execute(&sql, [video_id])?;
            if affected == 0 {
                return Err(StudioError::NotFound(video_id.to_string()));
            }
        }
        tx.execute(
            "INSERT INTO analytics_events (video_id, event_kind, occurred_at)
             VALUES (?1, ?2, ?3)",
            params![video_id, kind, Utc::now().naive_utc()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn analytics_summary(
        &self,
        video_id: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StudioResult<AnalyticsSummary> {
        let video = self.get(video_id)?;
        let cutoff = (now - window).naive_utc();
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT event_kind, COUNT(*) FROM analytics_events
             WHERE video_id = ?1 AND occurred_at >= ?2
             GROUP BY event_kind ORDER BY event_kind",
        )?;
        let events_in_window = stmt
            .query_map(params![video_id, cutoff], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut stmt = conn.prepare(
            "SELECT date(occurred_at), COUNT(*) FROM analytics_events
             WHERE video_id = ?1 AND event_kind = 'view' AND occurred_at >= ?2
             GROUP BY date(occurred_at) ORDER BY date(occurred_at)",
        )?;
        let views_by_day = stmt
            .query_map(params![video_id, cutoff], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AnalyticsSummary {
            video_id: video.video_id,
            view_count: video.view_count,
            comment_count: video.comment_count,
            share_count: video.share_count,
            events_in_window,
            views_by_day,
        })
    }

    pub fn delete(&self, video_id: &str) -> StudioResult<()> {
        let conn = self.open()?;
        let affected = conn.execute("DELETE FROM videos WHERE video_id = ?1", [video_id])?;
        if affected == 0 {
            return Err(StudioError::NotFound(video_id.to_string()));
        }
        Ok(())
    }

    pub fn backup_to(&self, destination: impl AsRef<Path>) -> StudioResult<()> {
        let destination_path = destination.as_ref();
        let source = self.open()?;
        let mut dest = Connection::open(destination_path)?;
        configure_connection(&dest).map_err(|source| StudioError::Open {
            source,
            path: destination_path.to_path_buf(),
        })?;
        let backup = Backup::new(&source, &mut dest)?;
        backup.run_to_completion(10, StdDuration::from_millis(50), None)?;
        Ok(())
    }
}
