use std::time::Duration;

use studio_core::{BackoffPolicy, JobError, JobKind, JobPayload, JobStatus, JobStore};
use tempfile::TempDir;

fn open_store(capacity: usize) -> (TempDir, JobStore) {
    let temp = TempDir::new().unwrap();
    let store = JobStore::builder()
        .path(temp.path().join("jobs.sqlite"))
        .capacity(capacity)
        .max_attempts(3)
        .build()
        .unwrap();
    store.initialize().unwrap();
    (temp, store)
}

fn no_delay() -> BackoffPolicy {
    BackoffPolicy::new(3, Duration::ZERO, Duration::ZERO)
}

fn compress_payload(bitrate: u64) -> JobPayload {
    JobPayload::Compress {
        target_bitrate_kbps: bitrate,
    }
}

#[test]
fn duplicate_submissions_collapse_onto_live_job() {
    let (_temp, store) = open_store(10);
    let first = store.enqueue("vid-1", compress_payload(900), 0).unwrap();
    let second = store.enqueue("vid-1", compress_payload(900), 0).unwrap();
    assert_eq!(first.job_id, second.job_id);

    // A different payload is different work.
    let third = store.enqueue("vid-1", compress_payload(700), 0).unwrap();
    assert_ne!(first.job_id, third.job_id);

    // Once the first job completes, the same submission becomes new work.
    let claimed = store.claim_next(JobKind::Compress).unwrap().unwrap();
    store
        .complete(&claimed.job_id, &serde_json::json!({"ok": true}))
        .unwrap();
    let fresh = store.enqueue("vid-1", compress_payload(900), 0).unwrap();
    assert_ne!(first.job_id, fresh.job_id);
}

#[test]
fn claim_respects_kind_and_priority() {
    let (_temp, store) = open_store(10);
    store.enqueue("vid-low", compress_payload(500), 0).unwrap();
    let urgent = store.enqueue("vid-high", compress_payload(600), 5).unwrap();

    assert!(store.claim_next(JobKind::Export).unwrap().is_none());

    let claimed = store.claim_next(JobKind::Compress).unwrap().unwrap();
    assert_eq!(claimed.job_id, urgent.job_id);
    assert_eq!(claimed.status, JobStatus::Active);
    assert_eq!(claimed.attempts, 1);
}

#[test]
fn retryable_failures_requeue_until_budget_spent() {
    let (_temp, store) = open_store(10);
    store.enqueue("vid-1", compress_payload(800), 0).unwrap();
    let backoff = no_delay();

    for attempt in 1..=2 {
        let job = store.claim_next(JobKind::Compress).unwrap().unwrap();
        assert_eq!(job.attempts, attempt);
        let status = store
            .fail(&job.job_id, "encoder busy", true, &backoff)
            .unwrap();
        assert_eq!(status, JobStatus::Queued);
    }

    let job = store.claim_next(JobKind::Compress).unwrap().unwrap();
    assert_eq!(job.attempts, 3);
    let status = store
        .fail(&job.job_id, "encoder busy", true, &backoff)
        .unwrap();
    assert_eq!(status, JobStatus::Failed);

    // Attempt budget spent: nothing left to claim.
    assert!(store.claim_next(JobKind::Compress).unwrap().is_none());
    let stored = store.get(&job.job_id).unwrap();
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.error.as_deref(), Some("encoder busy"));
}

#[test]
fn permanent_failures_skip_remaining_attempts() {
    let (_temp, store) = open_store(10);
    store.enqueue("vid-1", compress_payload(800), 0).unwrap();
    let job = store.claim_next(JobKind::Compress).unwrap().unwrap();
    let status = store
        .fail(&job.job_id, "unsupported codec", false, &no_delay())
        .unwrap();
    assert_eq!(status, JobStatus::Failed);
    assert!(store.claim_next(JobKind::Compress).unwrap().is_none());
}

#[test]
fn terminal_jobs_never_transition_again() {
    let (_temp, store) = open_store(10);
    store.enqueue("vid-1", compress_payload(800), 0).unwrap();
    let job = store.claim_next(JobKind::Compress).unwrap().unwrap();
    store
        .complete(&job.job_id, &serde_json::json!({"path": "out.mp4"}))
        .unwrap();

    let err = store.cancel(&job.job_id).unwrap_err();
    assert!(matches!(err, JobError::InvalidTransition { .. }));
    let err = store
        .complete(&job.job_id, &serde_json::json!({}))
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidTransition { .. }));
    let err = store.report_progress(&job.job_id, 0.5).unwrap_err();
    assert!(matches!(err, JobError::InvalidTransition { .. }));
}

#[test]
fn full_queue_applies_backpressure() {
    let (_temp, store) = open_store(2);
    store.enqueue("vid-1", compress_payload(100), 0).unwrap();
    store.enqueue("vid-2", compress_payload(200), 0).unwrap();
    let err = store
        .enqueue("vid-3", compress_payload(300), 0)
        .unwrap_err();
    assert!(matches!(err, JobError::QueueFull { capacity: 2 }));

    // Terminal jobs free capacity.
    let job = store.claim_next(JobKind::Compress).unwrap().unwrap();
    store.cancel(&job.job_id).unwrap();
    store.enqueue("vid-3", compress_payload(300), 0).unwrap();
}

#[test]
fn cancellation_is_terminal_for_queued_and_active_jobs() {
    let (_temp, store) = open_store(10);
    let queued = store.enqueue("vid-1", compress_payload(100), 0).unwrap();
    store.cancel(&queued.job_id).unwrap();
    assert_eq!(
        store.get(&queued.job_id).unwrap().status,
        JobStatus::Cancelled
    );
    assert!(store.claim_next(JobKind::Compress).unwrap().is_none());
}

#[test]
fn live_count_tracks_queued_and_active() {
    let (_temp, store) = open_store(10);
    store.enqueue("vid-1", compress_payload(100), 0).unwrap();
    store
        .enqueue(
            "vid-1",
            JobPayload::Transcribe {
                language: Some("en".to_string()),
            },
            0,
        )
        .unwrap();
    assert_eq!(store.live_count_for_video("vid-1").unwrap(), 2);

    let job = store.claim_next(JobKind::Compress).unwrap().unwrap();
    assert_eq!(store.live_count_for_video("vid-1").unwrap(), 2);
    store
        .complete(&job.job_id, &serde_json::json!({}))
        .unwrap();
    assert_eq!(store.live_count_for_video("vid-1").unwrap(), 1);
}
