pub mod error;
pub mod models;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::StudioConfig;
use crate::encoder::{ThumbnailArtifact, ThumbnailSize};
use crate::error::FailureKind;
use crate::jobs::{JobPayload, JobStatus, JobStore, ProcessingJob};
use crate::platform::{
    interpret_event, parse_event, verify_signature, AssetOptions, AssetSource, DirectUpload,
    FitMode, GifParams, MediaPlatform, PlatformError, ThumbnailParams, WebhookAction, WebhookEvent,
};
use crate::transcribe::{to_json, to_srt, to_vtt, TranscriptionSegment};
use crate::worker::CancelRegistry;

pub use error::{StudioError, StudioResult};
pub use models::{
    AiStatus, AnalyticsSummary, NewVideo, SharingSettings, StoredTranscript, Video, VideoFilter,
    VideoStatus,
};
pub use store::{ArtifactFlag, EventDisposition, MediaFacts, VideoStore};

/// A freshly registered video, with the direct-upload handle when one was
/// requested.
#[derive(Debug, Clone)]
pub struct VideoCreation {
    pub video: Video,
    pub upload: Option<DirectUpload>,
}

/// What `ingest_webhook` did with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Applied(WebhookAction),
    /// Event references an asset no video row claims yet; held for replay.
    Buffered { asset_id: String },
    Duplicate,
    Ignored { event_type: String },
}

/// Artifacts a worker hands back when a job finishes.
#[derive(Debug, Clone)]
pub enum JobArtifacts {
    Export {
        output_path: PathBuf,
    },
    Thumbnails {
        artifacts: Vec<ThumbnailArtifact>,
    },
    Compress {
        output_path: PathBuf,
        size_bytes: u64,
    },
    Transcript {
        language: String,
        segments: Vec<TranscriptionSegment>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    Srt,
    Vtt,
    Json,
}

/// Orchestrates the video lifecycle across the local store, the job queue
/// and the remote platform. Webhooks and job completions converge here.
pub struct VideoStudio {
    store: VideoStore,
    jobs: JobStore,
    platform: Arc<dyn MediaPlatform>,
    config: StudioConfig,
    backoff: crate::retry::BackoffPolicy,
    cancels: CancelRegistry,
}

impl VideoStudio {
    pub fn new(
        store: VideoStore,
        jobs: JobStore,
        platform: Arc<dyn MediaPlatform>,
        config: StudioConfig,
    ) -> Self {
        let backoff = crate::retry::BackoffPolicy::from_config(&config.retry);
        Self {
            store,
            jobs,
            platform,
            config,
            backoff,
            cancels: CancelRegistry::default(),
        }
    }

    pub fn store(&self) -> &VideoStore {
        &self.store
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn cancellations(&self) -> CancelRegistry {
        self.cancels.clone()
    }

    /// Registers a video and, when asked, provisions a direct upload on the
    /// remote platform.
    pub async fn create_video(
        &self,
        new: NewVideo,
        request_upload: bool,
    ) -> StudioResult<VideoCreation> {
        if let Some(size) = new.size_bytes {
            if size > self.config.limits.max_upload_bytes {
                return Err(StudioError::Unsupported {
                    what: "upload size",
                    value: size.to_string(),
                });
            }
        }
        let video = self.store.insert(&new)?;
        let mut upload = None;
        if request_upload {
            let direct = self
                .platform
                .create_direct_upload(
                    self.config.platform.upload_timeout_seconds,
                    &self.config.platform.cors_origin,
                )
                .await?;
            self.store
                .attach_remote(&video.video_id, Some(&direct.upload_id), None)?;
            upload = Some(direct);
        }
        info!(video_id = %video.video_id, upload = upload.is_some(), "video registered");
        Ok(VideoCreation {
            video: self.store.get(&video.video_id)?,
            upload,
        })
    }

    /// Pulls a source the platform can fetch itself; the video moves to
    /// processing immediately.
    pub async fn ingest_from_url(&self, video_id: &str, source_url: &str) -> StudioResult<Video> {
        let video = self.store.get(video_id)?;
        let asset = self
            .platform
            .create_asset(
                AssetSource::Url(source_url.to_string()),
                &AssetOptions {
                    playback_policy: vec!["public".to_string()],
                    passthrough: Some(video.video_id.clone()),
                },
            )
            .await?;
        self.store
            .attach_remote(video_id, None, Some(&asset.asset_id))?;
        // The video must be processing before replay: a buffered ready
        // event cannot move a still-uploading row.
        self.transition(video_id, VideoStatus::Processing, None)?;
        self.replay_orphans(&asset.asset_id)?;
        self.store.get(video_id)
    }

    pub async fn delete_video(&self, video_id: &str) -> StudioResult<()> {
        let video = self.store.get(video_id)?;
        if let Some(asset_id) = &video.asset_id {
            match self.platform.delete_asset(asset_id).await {
                Ok(()) => {}
                Err(PlatformError::Api { status: 404, .. }) => {
                    warn!(video_id, asset_id, "remote asset already gone");
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.store.delete(video_id)
    }

    pub fn get_video(&self, video_id: &str) -> StudioResult<Video> {
        self.store.get(video_id)
    }

    pub fn search_videos(&self, filter: &VideoFilter) -> StudioResult<Vec<Video>> {
        self.store.list(filter)
    }

    pub fn update_sharing(&self, video_id: &str, sharing: &SharingSettings) -> StudioResult<()> {
        self.store.update_sharing(video_id, sharing)
    }

    pub fn record_view(&self, video_id: &str, now: DateTime<Utc>) -> StudioResult<bool> {
        self.store.record_view(video_id, now)
    }

    pub fn record_engagement(&self, video_id: &str, kind: &str) -> StudioResult<()> {
        self.store.record_engagement(video_id, kind)
    }

    pub fn analytics_summary(
        &self,
        video_id: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StudioResult<AnalyticsSummary> {
        self.store.analytics_summary(video_id, window, now)
    }

    pub fn transcript_document(
        &self,
        video_id: &str,
        format: TranscriptFormat,
    ) -> StudioResult<String> {
        let transcript = self
            .store
            .fetch_transcript(video_id)?
            .ok_or_else(|| StudioError::NotFound(format!("transcript for {video_id}")))?;
        Ok(match format {
            TranscriptFormat::Srt => to_srt(&transcript.segments),
            TranscriptFormat::Vtt => to_vtt(&transcript.segments),
            TranscriptFormat::Json => to_json(&transcript.segments)?,
        })
    }

    /// Verifies, deduplicates and applies one webhook delivery.
    pub fn ingest_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> StudioResult<IngestOutcome> {
        verify_signature(
            payload,
            signature_header,
            &self.config.webhook.secret,
            Duration::seconds(self.config.webhook.tolerance_seconds),
            now,
        )?;
        let event = parse_event(payload, now)?;
        match self.store.record_event(&event)? {
            EventDisposition::Duplicate => {
                debug!(event_id = %event.event_id, "duplicate webhook event ignored");
                return Ok(IngestOutcome::Duplicate);
            }
            EventDisposition::Fresh | EventDisposition::Replay => {}
        }
        let action = interpret_event(&event);
        let outcome = self.apply_action(&event, &action)?;
        self.store.mark_event_processed(&event.event_id)?;
        Ok(outcome)
    }

    /// Drops buffered orphan events that outlived the configured window and
    /// prunes processed webhook events past their retention. Returns the
    /// number of rows removed.
    pub fn maintain(&self, now: DateTime<Utc>) -> StudioResult<usize> {
        let discarded = self.store.discard_expired_orphans(
            Duration::seconds(self.config.webhook.orphan_window_seconds),
            now,
        )?;
        let pruned = self.store.prune_processed_events(
            Duration::seconds(self.config.webhook.event_retention_seconds),
            now,
        )?;
        Ok(discarded + pruned)
    }

    fn apply_action(
        &self,
        event: &WebhookEvent,
        action: &WebhookAction,
    ) -> StudioResult<IngestOutcome> {
        match action {
            WebhookAction::UploadCompleted {
                upload_id,
                asset_id,
            } => match self.store.find_by_upload(upload_id)? {
                Some(video) => {
                    self.store
                        .attach_remote(&video.video_id, None, Some(asset_id))?;
                    self.transition_lenient(&video.video_id, VideoStatus::Processing, None)?;
                    self.replay_orphans(asset_id)?;
                    Ok(IngestOutcome::Applied(action.clone()))
                }
                None => {
                    self.store.buffer_orphan(event, asset_id)?;
                    Ok(IngestOutcome::Buffered {
                        asset_id: asset_id.clone(),
                    })
                }
            },
            WebhookAction::AssetReady {
                asset_id,
                playback_id,
                duration_seconds,
                aspect_ratio,
            } => match self.store.find_by_asset(asset_id)? {
                Some(video) => {
                    self.apply_asset_ready(
                        &video,
                        playback_id.as_deref(),
                        *duration_seconds,
                        aspect_ratio.as_deref(),
                    )?;
                    Ok(IngestOutcome::Applied(action.clone()))
                }
                None => {
                    self.store.buffer_orphan(event, asset_id)?;
                    Ok(IngestOutcome::Buffered {
                        asset_id: asset_id.clone(),
                    })
                }
            },
            WebhookAction::AssetErrored { asset_id, message } => {
                match self.store.find_by_asset(asset_id)? {
                    Some(video) => {
                        self.transition_lenient(
                            &video.video_id,
                            VideoStatus::Error,
                            Some(message),
                        )?;
                        Ok(IngestOutcome::Applied(action.clone()))
                    }
                    None => {
                        self.store.buffer_orphan(event, asset_id)?;
                        Ok(IngestOutcome::Buffered {
                            asset_id: asset_id.clone(),
                        })
                    }
                }
            }
            WebhookAction::RecordingReady { asset_id } => {
                if self.store.find_by_asset(asset_id)?.is_none() {
                    info!(asset_id, "recording ready for unknown asset");
                }
                Ok(IngestOutcome::Ignored {
                    event_type: event.event_type.clone(),
                })
            }
            WebhookAction::StreamConnected | WebhookAction::Unknown { .. } => {
                debug!(event_type = %event.event_type, "webhook event not actionable");
                Ok(IngestOutcome::Ignored {
                    event_type: event.event_type.clone(),
                })
            }
        }
    }

    /// Re-applies events that arrived before the asset was claimed.
    fn replay_orphans(&self, asset_id: &str) -> StudioResult<()> {
        for payload in self.store.take_orphans(asset_id)? {
            let event = match parse_event(payload.as_bytes(), Utc::now()) {
                Ok(event) => event,
                Err(err) => {
                    warn!(asset_id, error = %err, "dropping unparseable orphan event");
                    continue;
                }
            };
            match interpret_event(&event) {
                WebhookAction::AssetReady {
                    playback_id,
                    duration_seconds,
                    aspect_ratio,
                    ..
                } => {
                    if let Some(video) = self.store.find_by_asset(asset_id)? {
                        self.apply_asset_ready(
                            &video,
                            playback_id.as_deref(),
                            duration_seconds,
                            aspect_ratio.as_deref(),
                        )?;
                    }
                }
                WebhookAction::AssetErrored { message, .. } => {
                    if let Some(video) = self.store.find_by_asset(asset_id)? {
                        self.transition_lenient(
                            &video.video_id,
                            VideoStatus::Error,
                            Some(&message),
                        )?;
                    }
                }
                other => {
                    debug!(asset_id, action = ?other, "orphan event had no effect on replay");
                }
            }
            self.store.mark_event_processed(&event.event_id)?;
        }
        Ok(())
    }

    fn apply_asset_ready(
        &self,
        video: &Video,
        playback_id: Option<&str>,
        duration_seconds: Option<f64>,
        aspect_ratio: Option<&str>,
    ) -> StudioResult<()> {
        let mut facts = MediaFacts {
            duration_seconds,
            aspect_ratio: aspect_ratio.map(str::to_string),
            playback_id: playback_id.map(str::to_string),
            ..MediaFacts::default()
        };
        if let Some(playback) = playback_id {
            facts.thumbnail_url = self
                .platform
                .thumbnail_url(
                    playback,
                    &ThumbnailParams {
                        width: 640,
                        height: 360,
                        fit_mode: FitMode::Preserve,
                        time: 1.0,
                    },
                )
                .ok()
                .map(|url| url.to_string());
            facts.preview_gif_url = self
                .platform
                .gif_url(
                    playback,
                    &GifParams {
                        width: 320,
                        height: 180,
                        fps: 15,
                        start: 0.0,
                        end: 3.0,
                    },
                )
                .ok()
                .map(|url| url.to_string());
        }
        self.store.update_media_facts(&video.video_id, &facts)?;
        self.store.set_progress(&video.video_id, 1.0)?;
        self.transition_lenient(&video.video_id, VideoStatus::Ready, None)
    }

    /// Strict transition with compare-and-swap retry. Reaching a state the
    /// video already occupies is a no-op success.
    pub fn transition(
        &self,
        video_id: &str,
        to: VideoStatus,
        error_message: Option<&str>,
    ) -> StudioResult<Video> {
        for _ in 0..self.backoff.max_attempts().max(1) {
            let video = self.store.get(video_id)?;
            if video.status == to {
                return Ok(video);
            }
            if !video.status.can_transition(to) {
                return Err(StudioError::IllegalTransition {
                    video_id: video_id.to_string(),
                    from: video.status,
                    to,
                });
            }
            if self
                .store
                .try_transition(video_id, video.version, video.status, to, error_message)?
            {
                return self.store.get(video_id);
            }
        }
        Err(StudioError::Conflict(video_id.to_string()))
    }

    /// Webhook-path transition: an illegal move is logged and dropped
    /// instead of failing the delivery.
    fn transition_lenient(
        &self,
        video_id: &str,
        to: VideoStatus,
        error_message: Option<&str>,
    ) -> StudioResult<()> {
        match self.transition(video_id, to, error_message) {
            Ok(_) => Ok(()),
            Err(StudioError::IllegalTransition { from, .. }) => {
                warn!(video_id, %from, %to, "transition not applicable, leaving state unchanged");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn request_export(
        &self,
        video_id: &str,
        options: crate::encoder::ExportOptions,
    ) -> StudioResult<ProcessingJob> {
        if !self
            .config
            .limits
            .supported_codecs
            .iter()
            .any(|codec| codec == &options.codec)
        {
            return Err(StudioError::Unsupported {
                what: "codec",
                value: options.codec,
            });
        }
        if !self
            .config
            .limits
            .supported_containers
            .iter()
            .any(|container| container == &options.container)
        {
            return Err(StudioError::Unsupported {
                what: "container",
                value: options.container,
            });
        }
        self.enqueue_local(video_id, JobPayload::Export(options), 0)
    }

    pub fn request_thumbnails(
        &self,
        video_id: &str,
        sizes: Vec<ThumbnailSize>,
        time_offsets: Vec<f64>,
    ) -> StudioResult<ProcessingJob> {
        let sizes = if sizes.is_empty() {
            vec![
                ThumbnailSize::Small,
                ThumbnailSize::Medium,
                ThumbnailSize::Large,
            ]
        } else {
            sizes
        };
        let time_offsets = if time_offsets.is_empty() {
            vec![1.0]
        } else {
            time_offsets
        };
        self.enqueue_local(
            video_id,
            JobPayload::Thumbnail {
                sizes,
                time_offsets,
            },
            0,
        )
    }

    pub fn request_compression(
        &self,
        video_id: &str,
        target_bitrate_kbps: u64,
    ) -> StudioResult<ProcessingJob> {
        if target_bitrate_kbps == 0 {
            return Err(StudioError::Unsupported {
                what: "bitrate",
                value: target_bitrate_kbps.to_string(),
            });
        }
        self.enqueue_local(
            video_id,
            JobPayload::Compress {
                target_bitrate_kbps,
            },
            0,
        )
    }

    /// Queues transcription and moves the AI lifecycle to processing.
    /// Completed and disabled videos are not re-transcribed.
    pub fn request_transcription(
        &self,
        video_id: &str,
        language: Option<String>,
    ) -> StudioResult<ProcessingJob> {
        let video = self.store.get(video_id)?;
        match video.ai_status {
            AiStatus::Pending | AiStatus::Failed => {
                self.store
                    .update_ai_status(video_id, video.ai_status, AiStatus::Processing)?;
            }
            AiStatus::Processing => {}
            AiStatus::Completed | AiStatus::Disabled => {
                return Err(StudioError::Unsupported {
                    what: "ai status",
                    value: video.ai_status.to_string(),
                });
            }
        }
        self.enqueue_local(video_id, JobPayload::Transcribe { language }, 0)
    }

    fn enqueue_local(
        &self,
        video_id: &str,
        payload: JobPayload,
        priority: i64,
    ) -> StudioResult<ProcessingJob> {
        let video = self.store.get(video_id)?;
        if video.source_path.is_none() {
            return Err(StudioError::Unsupported {
                what: "source",
                value: "video has no local source file".to_string(),
            });
        }
        Ok(self.jobs.enqueue(&video.video_id, payload, priority)?)
    }

    pub fn cancel_job(&self, job_id: &str) -> StudioResult<()> {
        self.jobs.cancel(job_id)?;
        self.cancels.signal(job_id);
        Ok(())
    }

    /// Best-effort progress propagation from a running worker.
    pub fn report_progress(&self, job: &ProcessingJob, progress: f64) {
        if let Err(err) = self.jobs.report_progress(&job.job_id, progress) {
            debug!(job_id = %job.job_id, error = %err, "progress dropped");
            return;
        }
        if let Err(err) = self.store.set_progress(&job.video_id, progress) {
            debug!(video_id = %job.video_id, error = %err, "video progress dropped");
        }
    }

    /// Records a finished job and folds its artifacts into the video row.
    pub fn complete_job(&self, job: &ProcessingJob, artifacts: JobArtifacts) -> StudioResult<()> {
        let result = artifact_summary(&artifacts);
        self.jobs.complete(&job.job_id, &result)?;
        match &artifacts {
            JobArtifacts::Export { output_path } => {
                debug!(job_id = %job.job_id, path = %output_path.display(), "export finished");
            }
            JobArtifacts::Thumbnails { artifacts } => {
                if let Some(first) = artifacts.first() {
                    self.store.update_media_facts(
                        &job.video_id,
                        &MediaFacts {
                            thumbnail_url: Some(first.path.to_string_lossy().to_string()),
                            ..MediaFacts::default()
                        },
                    )?;
                }
            }
            JobArtifacts::Compress { size_bytes, .. } => {
                self.store.update_media_facts(
                    &job.video_id,
                    &MediaFacts {
                        size_bytes: Some(*size_bytes),
                        ..MediaFacts::default()
                    },
                )?;
            }
            JobArtifacts::Transcript { language, segments } => {
                self.store
                    .store_transcript(&job.video_id, language, segments)?;
                self.store
                    .set_artifact_flag(&job.video_id, ArtifactFlag::Transcript, true)?;
                self.store
                    .update_ai_status(&job.video_id, AiStatus::Processing, AiStatus::Completed)?;
            }
        }
        self.maybe_finish_local(&job.video_id)?;
        Ok(())
    }

    /// Records a failed attempt; a terminally failed job marks the video.
    pub fn fail_job(
        &self,
        job: &ProcessingJob,
        message: &str,
        kind: FailureKind,
    ) -> StudioResult<()> {
        let status = self
            .jobs
            .fail(&job.job_id, message, kind.retryable(), &self.backoff)?;
        if status != JobStatus::Failed {
            return Ok(());
        }
        match job.kind {
            crate::jobs::JobKind::Transcribe => {
                self.store
                    .update_ai_status(&job.video_id, AiStatus::Processing, AiStatus::Failed)?;
            }
            _ => {
                self.transition_lenient(
                    &job.video_id,
                    VideoStatus::Error,
                    Some(&format!("job {} failed: {message}", job.job_id)),
                )?;
            }
        }
        Ok(())
    }

    /// Videos without a remote asset finish when their last job drains;
    /// asset-backed videos wait for the platform's ready event.
    fn maybe_finish_local(&self, video_id: &str) -> StudioResult<()> {
        let video = self.store.get(video_id)?;
        if video.status != VideoStatus::Processing || video.asset_id.is_some() {
            return Ok(());
        }
        if self.jobs.live_count_for_video(video_id)? == 0 {
            self.store.set_progress(video_id, 1.0)?;
            self.transition_lenient(video_id, VideoStatus::Ready, None)?;
        }
        Ok(())
    }

    /// Moves a locally sourced video into processing once its jobs are
    /// queued. Explicit because local videos get no upload webhook.
    pub fn begin_local_processing(&self, video_id: &str) -> StudioResult<Video> {
        self.transition(video_id, VideoStatus::Processing, None)
    }
}

fn artifact_summary(artifacts: &JobArtifacts) -> serde_json::Value {
    match artifacts {
        JobArtifacts::Export { output_path } => json!({
            "output_path": output_path.to_string_lossy(),
        }),
        JobArtifacts::Thumbnails { artifacts } => json!({
            "thumbnails": artifacts
                .iter()
                .map(|artifact| {
                    json!({
                        "path": artifact.path.to_string_lossy(),
                        "width": artifact.width,
                        "height": artifact.height,
                        "time_offset": artifact.time_offset,
                    })
                })
                .collect::<Vec<_>>(),
        }),
        JobArtifacts::Compress {
            output_path,
            size_bytes,
        } => json!({
            "output_path": output_path.to_string_lossy(),
            "size_bytes": size_bytes,
        }),
        JobArtifacts::Transcript { language, segments } => json!({
            "language": language,
            "segments": segments.len(),
        }),
    }
}
