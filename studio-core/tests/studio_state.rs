mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{build_studio, deliver};
use serde_json::json;
use studio_core::{
    AiStatus, IngestOutcome, NewVideo, SharingSettings, StudioError, VideoFilter, VideoStatus,
    VideoStore, WebhookAction,
};
use tempfile::TempDir;

fn new_video(owner: &str) -> NewVideo {
    NewVideo {
        owner_id: owner.to_string(),
        title: Some("clip".to_string()),
        ..NewVideo::default()
    }
}

#[tokio::test]
async fn upload_flow_reaches_ready_through_webhooks() {
    let temp = TempDir::new().unwrap();
    let (studio, _platform) = build_studio(&temp);

    let creation = studio.create_video(new_video("alice"), true).await.unwrap();
    let video = creation.video;
    assert_eq!(video.status, VideoStatus::Uploading);
    let upload = creation.upload.expect("upload requested");
    assert_eq!(video.upload_id.as_deref(), Some(upload.upload_id.as_str()));

    let outcome = deliver(
        &studio,
        &json!({
            "id": "evt-1",
            "type": "video.upload.asset_created",
            "data": {"id": "asset-1", "upload_id": upload.upload_id}
        }),
    );
    assert!(matches!(
        outcome,
        IngestOutcome::Applied(WebhookAction::UploadCompleted { .. })
    ));
    let video = studio.get_video(&video.video_id).unwrap();
    assert_eq!(video.status, VideoStatus::Processing);
    assert_eq!(video.asset_id.as_deref(), Some("asset-1"));

    let outcome = deliver(
        &studio,
        &json!({
            "id": "evt-2",
            "type": "video.asset.ready",
            "data": {
                "id": "asset-1",
                "playback_ids": [{"id": "pb-1"}],
                "duration": 42.5,
                "aspect_ratio": "16:9"
            }
        }),
    );
    assert!(matches!(
        outcome,
        IngestOutcome::Applied(WebhookAction::AssetReady { .. })
    ));

    let video = studio.get_video(&video.video_id).unwrap();
    assert_eq!(video.status, VideoStatus::Ready);
    assert_eq!(video.playback_id.as_deref(), Some("pb-1"));
    assert_eq!(video.duration_seconds, Some(42.5));
    assert_eq!(video.aspect_ratio.as_deref(), Some("16:9"));
    assert_eq!(video.processing_progress, 1.0);
    assert!(video
        .thumbnail_url
        .as_deref()
        .unwrap()
        .contains("pb-1/thumbnail.png"));
    assert!(video
        .preview_gif_url
        .as_deref()
        .unwrap()
        .contains("pb-1/animated.gif"));
}

#[tokio::test]
async fn asset_error_marks_video_errored() {
    let temp = TempDir::new().unwrap();
    let (studio, _platform) = build_studio(&temp);
    let creation = studio.create_video(new_video("bob"), true).await.unwrap();
    let upload_id = creation.upload.unwrap().upload_id;

    deliver(
        &studio,
        &json!({
            "id": "evt-1",
            "type": "video.upload.asset_created",
            "data": {"id": "asset-err", "upload_id": upload_id}
        }),
    );
    deliver(
        &studio,
        &json!({
            "id": "evt-2",
            "type": "video.asset.errored",
            "data": {"id": "asset-err", "errors": {"messages": ["input file is corrupt"]}}
        }),
    );

    let video = studio.get_video(&creation.video.video_id).unwrap();
    assert_eq!(video.status, VideoStatus::Error);
    assert_eq!(video.error_message.as_deref(), Some("input file is corrupt"));
}

#[tokio::test]
async fn terminal_states_do_not_regress() {
    let temp = TempDir::new().unwrap();
    let (studio, _platform) = build_studio(&temp);
    let creation = studio.create_video(new_video("carol"), true).await.unwrap();
    let video_id = creation.video.video_id.clone();
    let upload_id = creation.upload.unwrap().upload_id;

    deliver(
        &studio,
        &json!({
            "id": "evt-1",
            "type": "video.upload.asset_created",
            "data": {"id": "asset-1", "upload_id": upload_id}
        }),
    );
    deliver(
        &studio,
        &json!({
            "id": "evt-2",
            "type": "video.asset.ready",
            "data": {"id": "asset-1", "playback_ids": [{"id": "pb-1"}]}
        }),
    );
    assert_eq!(
        studio.get_video(&video_id).unwrap().status,
        VideoStatus::Ready
    );

    // A late error event is dropped rather than regressing the video.
    let outcome = deliver(
        &studio,
        &json!({
            "id": "evt-3",
            "type": "video.asset.errored",
            "data": {"id": "asset-1", "errors": {"messages": ["late failure"]}}
        }),
    );
    assert!(matches!(outcome, IngestOutcome::Applied(_)));
    let video = studio.get_video(&video_id).unwrap();
    assert_eq!(video.status, VideoStatus::Ready);
    assert!(video.error_message.is_none());

    // Strict transitions refuse to leave a terminal state.
    let err = studio
        .transition(&video_id, VideoStatus::Processing, None)
        .unwrap_err();
    assert!(matches!(err, StudioError::IllegalTransition { .. }));
}

#[tokio::test]
async fn illegal_shortcut_is_rejected() {
    let temp = TempDir::new().unwrap();
    let (studio, _platform) = build_studio(&temp);
    let creation = studio.create_video(new_video("dave"), false).await.unwrap();
    let err = studio
        .transition(&creation.video.video_id, VideoStatus::Ready, None)
        .unwrap_err();
    assert!(matches!(
        err,
        StudioError::IllegalTransition {
            from: VideoStatus::Uploading,
            to: VideoStatus::Ready,
            ..
        }
    ));
}

#[test]
fn concurrent_transition_has_exactly_one_winner() {
    let temp = TempDir::new().unwrap();
    let store = VideoStore::builder()
        .path(temp.path().join("videos.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    let video = store
        .insert(&NewVideo {
            owner_id: "erin".to_string(),
            ..NewVideo::default()
        })
        .unwrap();
    store
        .try_transition(
            &video.video_id,
            video.version,
            VideoStatus::Uploading,
            VideoStatus::Processing,
            None,
        )
        .unwrap();
    let video = store.get(&video.video_id).unwrap();

    let wins = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let wins = Arc::clone(&wins);
        let video_id = video.video_id.clone();
        let version = video.version;
        handles.push(std::thread::spawn(move || {
            let won = store
                .try_transition(
                    &video_id,
                    version,
                    VideoStatus::Processing,
                    VideoStatus::Ready,
                    None,
                )
                .unwrap();
            if won {
                wins.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    let stored = store.get(&video.video_id).unwrap();
    assert_eq!(stored.status, VideoStatus::Ready);
    assert_eq!(stored.version, video.version + 1);
}

#[tokio::test]
async fn list_filters_on_ai_status() {
    let temp = TempDir::new().unwrap();
    let (studio, _platform) = build_studio(&temp);
    let first = studio.create_video(new_video("gina"), false).await.unwrap();
    let _second = studio.create_video(new_video("gina"), false).await.unwrap();
    assert!(studio
        .store()
        .update_ai_status(&first.video.video_id, AiStatus::Pending, AiStatus::Processing)
        .unwrap());

    let rows = studio
        .search_videos(&VideoFilter {
            ai_status: Some(AiStatus::Processing),
            ..VideoFilter::default()
        })
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].video_id, first.video.video_id);

    let rows = studio
        .search_videos(&VideoFilter {
            ai_status: Some(AiStatus::Pending),
            ..VideoFilter::default()
        })
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_ne!(rows[0].video_id, first.video.video_id);
}

#[tokio::test]
async fn view_cap_blocks_views_once_spent() {
    let temp = TempDir::new().unwrap();
    let (studio, _platform) = build_studio(&temp);
    let creation = studio.create_video(new_video("hana"), false).await.unwrap();
    let video_id = creation.video.video_id.clone();
    studio
        .update_sharing(
            &video_id,
            &SharingSettings {
                is_public: true,
                max_views: Some(2),
                ..SharingSettings::default()
            },
        )
        .unwrap();

    let now = Utc::now();
    assert!(studio.record_view(&video_id, now).unwrap());
    assert!(studio.record_view(&video_id, now).unwrap());
    assert!(!studio.record_view(&video_id, now).unwrap());
    assert_eq!(studio.get_video(&video_id).unwrap().view_count, 2);
}

#[tokio::test]
async fn expired_link_rejects_views() {
    let temp = TempDir::new().unwrap();
    let (studio, _platform) = build_studio(&temp);
    let creation = studio.create_video(new_video("ivan"), false).await.unwrap();
    let video_id = creation.video.video_id.clone();
    studio
        .update_sharing(
            &video_id,
            &SharingSettings {
                is_public: true,
                link_expires_at: Some(Utc::now() - Duration::hours(1)),
                ..SharingSettings::default()
            },
        )
        .unwrap();

    assert!(!studio.record_view(&video_id, Utc::now()).unwrap());
    assert_eq!(studio.get_video(&video_id).unwrap().view_count, 0);
}

#[tokio::test]
async fn analytics_rolls_views_up_by_day() {
    let temp = TempDir::new().unwrap();
    let (studio, _platform) = build_studio(&temp);
    let creation = studio.create_video(new_video("judy"), false).await.unwrap();
    let video_id = creation.video.video_id.clone();

    let now = Utc::now();
    assert!(studio.record_view(&video_id, now).unwrap());
    assert!(studio.record_view(&video_id, now).unwrap());
    studio.record_engagement(&video_id, "share").unwrap();

    let summary = studio
        .analytics_summary(&video_id, Duration::days(7), now)
        .unwrap();
    assert_eq!(summary.view_count, 2);
    assert_eq!(summary.share_count, 1);
    let today = now.format("%Y-%m-%d").to_string();
    assert_eq!(summary.views_by_day, vec![(today, 2)]);
}

#[tokio::test]
async fn delete_video_removes_remote_asset() {
    let temp = TempDir::new().unwrap();
    let (studio, platform) = build_studio(&temp);
    let creation = studio.create_video(new_video("frank"), true).await.unwrap();
    let video_id = creation.video.video_id.clone();
    let upload_id = creation.upload.unwrap().upload_id;

    deliver(
        &studio,
        &json!({
            "id": "evt-1",
            "type": "video.upload.asset_created",
            "data": {"id": "asset-9", "upload_id": upload_id}
        }),
    );

    studio.delete_video(&video_id).await.unwrap();
    assert!(matches!(
        studio.get_video(&video_id),
        Err(StudioError::NotFound(_))
    ));
    assert_eq!(
        platform.deleted.lock().unwrap().as_slice(),
        ["asset-9".to_string()]
    );
}
