use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::encoder::{CancelFlag, EncoderEngine, EncoderError, ProgressFn};
use crate::error::FailureKind;
use crate::jobs::{JobKind, JobPayload, ProcessingJob};
use crate::studio::{JobArtifacts, VideoStudio};
use crate::transcribe::Transcriber;

/// Shared map of in-flight jobs to their cancellation flags. Cancelling a
/// job signals its flag so the encoder can stop mid-run.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<String, CancelFlag>>>,
}

impl CancelRegistry {
    pub fn register(&self, job_id: &str) -> CancelFlag {
        let flag = CancelFlag::new();
        if let Ok(mut map) = self.inner.lock() {
            map.insert(job_id.to_string(), flag.clone());
        }
        flag
    }

    pub fn signal(&self, job_id: &str) {
        if let Ok(map) = self.inner.lock() {
            if let Some(flag) = map.get(job_id) {
                flag.cancel();
            }
        }
    }

    pub fn remove(&self, job_id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(job_id);
        }
    }
}

/// Fixed pools of workers, one pool per job kind. Each worker polls the
/// queue, runs the job against the local toolchain and reports back.
pub struct WorkerPool {
    studio: Arc<VideoStudio>,
    engine: Arc<EncoderEngine>,
    transcriber: Arc<Transcriber>,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        studio: Arc<VideoStudio>,
        engine: Arc<EncoderEngine>,
        transcriber: Arc<Transcriber>,
    ) -> Self {
        let poll_interval = Duration::from_millis(studio.config().workers.poll_interval_ms.max(10));
        Self {
            studio,
            engine,
            transcriber,
            poll_interval,
        }
    }

    fn pool_size(&self, kind: JobKind) -> usize {
        let workers = &self.studio.config().workers;
        match kind {
            JobKind::Export => workers.export,
            JobKind::Thumbnail => workers.thumbnail,
            JobKind::Compress => workers.compress,
            JobKind::Transcribe => workers.transcribe,
        }
    }

    /// Spawns every configured worker. Tasks drain in-flight work and exit
    /// once `shutdown` is signalled.
    pub fn spawn(&self, shutdown: &CancelFlag) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for kind in JobKind::ALL {
            for slot in 0..self.pool_size(kind) {
                let studio = Arc::clone(&self.studio);
                let engine = Arc::clone(&self.engine);
                let transcriber = Arc::clone(&self.transcriber);
                let registry = studio.cancellations();
                let shutdown = shutdown.clone();
                let poll_interval = self.poll_interval;
                handles.push(tokio::spawn(async move {
                    info!(%kind, slot, "worker started");
                    worker_loop(
                        kind,
                        studio,
                        engine,
                        transcriber,
                        registry,
                        poll_interval,
                        shutdown,
                    )
                    .await;
                    info!(%kind, slot, "worker stopped");
                }));
            }
        }
        handles
    }
}

async fn worker_loop(
    kind: JobKind,
    studio: Arc<VideoStudio>,
    engine: Arc<EncoderEngine>,
    transcriber: Arc<Transcriber>,
    registry: CancelRegistry,
    poll_interval: Duration,
    shutdown: CancelFlag,
) {
    while !shutdown.is_cancelled() {
        match studio.jobs().claim_next(kind) {
            Ok(Some(job)) => {
                execute(&studio, &engine, &transcriber, &registry, job).await;
            }
            Ok(None) => sleep(poll_interval).await,
            Err(err) => {
                warn!(%kind, error = %err, "claim failed, backing off");
                sleep(poll_interval).await;
            }
        }
    }
}

async fn execute(
    studio: &Arc<VideoStudio>,
    engine: &Arc<EncoderEngine>,
    transcriber: &Arc<Transcriber>,
    registry: &CancelRegistry,
    job: ProcessingJob,
) {
    let cancel = registry.register(&job.job_id);
    let outcome = run_job(studio, engine, transcriber, &job, &cancel).await;
    registry.remove(&job.job_id);

    if cancel.is_cancelled() {
        debug!(job_id = %job.job_id, "job cancelled, discarding result");
        return;
    }
    match outcome {
        Ok(artifacts) => {
            if let Err(err) = studio.complete_job(&job, artifacts) {
                warn!(job_id = %job.job_id, error = %err, "failed to record completion");
            }
        }
        Err((message, kind)) => {
            if let Err(err) = studio.fail_job(&job, &message, kind) {
                warn!(job_id = %job.job_id, error = %err, "failed to record failure");
            }
        }
    }
}

async fn run_job(
    studio: &Arc<VideoStudio>,
    engine: &Arc<EncoderEngine>,
    transcriber: &Arc<Transcriber>,
    job: &ProcessingJob,
    cancel: &CancelFlag,
) -> Result<JobArtifacts, (String, FailureKind)> {
    let video = studio
        .get_video(&job.video_id)
        .map_err(|err| (err.to_string(), err.kind()))?;
    let source = video
        .source_path
        .as_deref()
        .ok_or_else(|| {
            (
                "video has no local source file".to_string(),
                FailureKind::Permanent,
            )
        })?
        .to_string();
    let input = std::path::Path::new(&source);

    let progress_studio = Arc::clone(studio);
    let progress_job = job.clone();
    let on_progress = move |progress: f64| {
        progress_studio.report_progress(&progress_job, progress);
    };
    let on_progress: &ProgressFn = &on_progress;

    match &job.payload {
        JobPayload::Export(options) => {
            let output_path = engine
                .export(input, options, cancel, Some(on_progress))
                .await
                .map_err(encoder_failure)?;
            Ok(JobArtifacts::Export { output_path })
        }
        JobPayload::Thumbnail {
            sizes,
            time_offsets,
        } => {
            let artifacts = engine
                .generate_thumbnails(input, sizes, time_offsets, cancel)
                .await
                .map_err(encoder_failure)?;
            Ok(JobArtifacts::Thumbnails { artifacts })
        }
        JobPayload::Compress {
            target_bitrate_kbps,
        } => {
            let output_path = engine
                .compress(input, *target_bitrate_kbps, cancel, Some(on_progress))
                .await
                .map_err(encoder_failure)?;
            let size_bytes = std::fs::metadata(&output_path)
                .map(|meta| meta.len())
                .map_err(|err| (err.to_string(), FailureKind::Transient))?;
            Ok(JobArtifacts::Compress {
                output_path,
                size_bytes,
            })
        }
        JobPayload::Transcribe { language } => {
            let resolved = language
                .clone()
                .unwrap_or_else(|| studio.config().transcription.default_language.clone());
            let segments = transcriber
                .transcribe(input, Some(&resolved), cancel)
                .await
                .map_err(|err| (err.to_string(), err.kind()))?;
            Ok(JobArtifacts::Transcript {
                language: resolved,
                segments,
            })
        }
    }
}

fn encoder_failure(err: EncoderError) -> (String, FailureKind) {
    (err.to_string(), err.kind())
}
