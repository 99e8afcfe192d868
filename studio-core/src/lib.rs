pub mod config;
pub mod encoder;
pub mod error;
pub mod jobs;
pub mod platform;
pub mod retry;
pub mod sqlite;
pub mod studio;
pub mod transcribe;
pub mod worker;

pub use config::{load_studio_config, StudioConfig};
pub use encoder::{
    CancelFlag, EncoderEngine, EncoderError, EncoderResult, ExportOptions, MediaMetadata,
    ThumbnailArtifact, ThumbnailSize,
};
pub use error::{ConfigError, FailureKind, Result};
pub use jobs::{
    JobError, JobFilter, JobKind, JobPayload, JobResult, JobStatus, JobStore, JobStoreBuilder,
    ProcessingJob,
};
pub use platform::{
    interpret_event, parse_event, sign_payload, verify_signature, AssetOptions, AssetSource,
    DirectUpload, FitMode, GifParams, MediaPlatform, PlatformClient, PlatformError,
    PlatformResult, RemoteAsset, ThumbnailParams, WebhookAction, WebhookEvent,
};
pub use retry::BackoffPolicy;
pub use studio::{
    AiStatus, AnalyticsSummary, ArtifactFlag, EventDisposition, IngestOutcome, JobArtifacts,
    MediaFacts, NewVideo, SharingSettings, StoredTranscript, StudioError, StudioResult,
    TranscriptFormat, Video, VideoCreation, VideoFilter, VideoStatus, VideoStore, VideoStudio,
};
pub use transcribe::{
    normalize_segments, HttpSpeechClient, ProviderSegment, ProviderTranscript, SpeechToText,
    TranscribeError, TranscribeResult, Transcriber, TranscriptionSegment,
};
pub use worker::{CancelRegistry, WorkerPool};
