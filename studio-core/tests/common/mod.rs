#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use studio_core::config::{
    EncoderSection, LimitsSection, PathsSection, PlatformSection, RetrySection,
    TranscriptionSection, WebhookSection, WorkersSection,
};
use studio_core::{
    sign_payload, AssetOptions, AssetSource, DirectUpload, GifParams, IngestOutcome, JobStore,
    MediaPlatform, PlatformResult, RemoteAsset, StudioConfig, ThumbnailParams, VideoStore,
    VideoStudio,
};
use tempfile::TempDir;
use url::Url;

pub const WEBHOOK_SECRET: &str = "whsec-test";

pub fn test_config(root: &Path) -> StudioConfig {
    StudioConfig {
        paths: PathsSection {
            base_dir: root.display().to_string(),
            data_dir: "data".to_string(),
            scratch_dir: "scratch".to_string(),
            output_dir: "output".to_string(),
            logs_dir: "logs".to_string(),
        },
        limits: LimitsSection {
            max_upload_bytes: 1024 * 1024 * 1024,
            max_queued_jobs: 100,
            supported_containers: vec!["mp4".to_string(), "webm".to_string()],
            supported_codecs: vec!["h264".to_string(), "vp9".to_string()],
        },
        encoder: EncoderSection {
            ffmpeg_path: "/usr/bin/ffmpeg".to_string(),
            ffprobe_path: "/usr/bin/ffprobe".to_string(),
            timeout_seconds: 30,
            audio_codec: "pcm_s16le".to_string(),
            thumbnail_format: "png".to_string(),
        },
        workers: WorkersSection {
            export: 1,
            thumbnail: 1,
            compress: 1,
            transcribe: 1,
            poll_interval_ms: 20,
        },
        platform: PlatformSection {
            base_url: "https://api.platform.test/video/v1/".to_string(),
            playback_base_url: "https://image.platform.test/".to_string(),
            token_id: "token-id".to_string(),
            token_secret: "token-secret".to_string(),
            upload_timeout_seconds: 3600,
            cors_origin: "*".to_string(),
        },
        webhook: WebhookSection {
            secret: WEBHOOK_SECRET.to_string(),
            tolerance_seconds: 300,
            orphan_window_seconds: 3600,
            event_retention_seconds: 86400,
        },
        transcription: TranscriptionSection {
            endpoint: "https://speech.test/v1/transcribe".to_string(),
            api_key: "speech-key".to_string(),
            default_language: "en".to_string(),
            merge_gap_ms: 300,
        },
        retry: RetrySection {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        },
    }
}

/// In-memory platform double. Asset and upload ids are sequential so tests
/// can predict them.
#[derive(Default)]
pub struct FakePlatform {
    counter: AtomicUsize,
    pub deleted: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl MediaPlatform for FakePlatform {
    async fn create_direct_upload(
        &self,
        _timeout_seconds: u64,
        _cors_origin: &str,
    ) -> PlatformResult<DirectUpload> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(DirectUpload {
            upload_id: format!("up-{n}"),
            upload_url: format!("https://uploads.platform.test/{n}"),
        })
    }

    async fn create_asset(
        &self,
        _source: AssetSource,
        _options: &AssetOptions,
    ) -> PlatformResult<RemoteAsset> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteAsset {
            asset_id: format!("asset-{n}"),
            playback_id: None,
            status: "preparing".to_string(),
            duration_seconds: None,
            aspect_ratio: None,
        })
    }

    async fn get_asset(&self, asset_id: &str) -> PlatformResult<RemoteAsset> {
        Ok(RemoteAsset {
            asset_id: asset_id.to_string(),
            playback_id: Some(format!("pb-{asset_id}")),
            status: "ready".to_string(),
            duration_seconds: Some(10.0),
            aspect_ratio: Some("16:9".to_string()),
        })
    }

    async fn delete_asset(&self, asset_id: &str) -> PlatformResult<()> {
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(asset_id.to_string());
        }
        Ok(())
    }

    fn thumbnail_url(&self, playback_id: &str, _params: &ThumbnailParams) -> PlatformResult<Url> {
        Ok(Url::parse(&format!(
            "https://image.platform.test/{playback_id}/thumbnail.png"
        ))
        .expect("static url"))
    }

    fn gif_url(&self, playback_id: &str, _params: &GifParams) -> PlatformResult<Url> {
        Ok(Url::parse(&format!(
            "https://image.platform.test/{playback_id}/animated.gif"
        ))
        .expect("static url"))
    }
}

pub fn build_studio(temp: &TempDir) -> (VideoStudio, Arc<FakePlatform>) {
    let config = test_config(temp.path());
    let store = VideoStore::builder()
        .path(temp.path().join("videos.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    let jobs = JobStore::builder()
        .path(temp.path().join("jobs.sqlite"))
        .capacity(config.limits.max_queued_jobs)
        .build()
        .unwrap();
    jobs.initialize().unwrap();
    let platform = Arc::new(FakePlatform::default());
    let platform_dyn: Arc<dyn MediaPlatform> = Arc::clone(&platform) as Arc<dyn MediaPlatform>;
    let studio = VideoStudio::new(store, jobs, platform_dyn, config);
    (studio, platform)
}

/// Signs and delivers a webhook body the way the remote platform would.
pub fn deliver(studio: &VideoStudio, body: &serde_json::Value) -> IngestOutcome {
    let payload = body.to_string();
    let now = Utc::now();
    let header = sign_payload(payload.as_bytes(), WEBHOOK_SECRET, now.timestamp());
    studio
        .ingest_webhook(payload.as_bytes(), &header, now)
        .expect("webhook accepted")
}
