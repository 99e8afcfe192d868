use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use studio_core::{
    load_studio_config, AiStatus, BackoffPolicy, ExportOptions, IngestOutcome, JobFilter,
    JobKind, JobStatus, JobStore, NewVideo, PlatformClient, ProcessingJob, SharingSettings,
    StudioConfig, ThumbnailSize, TranscriptFormat, Video, VideoFilter, VideoStatus, VideoStore,
    VideoStudio,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] studio_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("studio error: {0}")]
    Studio(#[from] studio_core::StudioError),
    #[error("job error: {0}")]
    Jobs(#[from] studio_core::JobError),
    #[error("platform error: {0}")]
    Platform(#[from] studio_core::PlatformError),
    #[error("authentication failed")]
    Authentication,
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Video studio command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to the studio.toml config
    #[arg(long, default_value = "configs/studio.toml")]
    pub config: PathBuf,
    /// Override for the data directory (replaces paths.data_dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Alternate path for videos.sqlite
    #[arg(long)]
    pub videos_db: Option<PathBuf>,
    /// Alternate path for jobs.sqlite
    #[arg(long)]
    pub jobs_db: Option<PathBuf>,
    /// Local authentication token (required when STUDIOCTL_TOKEN is set)
    #[arg(long)]
    pub token: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarized operational status
    Status,
    /// Video lifecycle operations
    #[command(subcommand)]
    Video(VideoCommands),
    /// Processing job operations
    #[command(subcommand)]
    Job(JobCommands),
    /// Webhook handling
    #[command(subcommand)]
    Webhook(WebhookCommands),
    /// Fetch a stored transcript
    Transcript(TranscriptArgs),
    /// Per-video analytics rollup
    Analytics(AnalyticsArgs),
    /// Snapshot both databases into a directory
    Backup(BackupArgs),
    /// Integrity checks
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
    /// Emit shell completion definitions
    Completions { shell: Shell },
}

#[derive(Subcommand, Debug)]
pub enum VideoCommands {
    /// Register a new video
    Create(VideoCreateArgs),
    /// Show one video
    Show { video_id: String },
    /// List videos
    List(VideoListArgs),
    /// Update sharing controls on a video link
    Share(VideoShareArgs),
    /// Delete a video and its remote asset
    Delete { video_id: String },
}

#[derive(Args, Debug)]
pub struct VideoCreateArgs {
    /// Owner identifier
    #[arg(long)]
    pub owner: String,
    /// Optional title
    #[arg(long)]
    pub title: Option<String>,
    /// Optional project identifier
    #[arg(long)]
    pub project: Option<String>,
    /// Local source file for encoder jobs
    #[arg(long)]
    pub source: Option<PathBuf>,
    /// Declared size in bytes, checked against limits
    #[arg(long)]
    pub size_bytes: Option<u64>,
    /// Provision a direct upload on the remote platform
    #[arg(long, default_value_t = false)]
    pub upload: bool,
}

#[derive(Args, Debug)]
pub struct VideoListArgs {
    /// Filter by owner
    #[arg(long)]
    pub owner: Option<String>,
    /// Filter by status
    #[arg(long)]
    pub status: Option<String>,
    /// Filter by AI enrichment status
    #[arg(long)]
    pub ai_status: Option<String>,
    /// Substring match on the title
    #[arg(long)]
    pub query: Option<String>,
    /// Maximum rows returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct VideoShareArgs {
    pub video_id: String,
    /// Make the link publicly viewable
    #[arg(long, default_value_t = false)]
    pub public: bool,
    /// Password hash required to view
    #[arg(long)]
    pub password_hash: Option<String>,
    /// Hours until the link expires
    #[arg(long)]
    pub expires_in_hours: Option<i64>,
    /// Maximum number of admitted views
    #[arg(long)]
    pub max_views: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// Queue new work for a video
    #[command(subcommand)]
    Request(RequestCommands),
    /// Show one job
    Show { job_id: String },
    /// List jobs
    List(JobListArgs),
    /// Cancel a queued or running job
    Cancel { job_id: String },
}

#[derive(Subcommand, Debug)]
pub enum RequestCommands {
    /// Re-encode into a target codec and resolution
    Export(ExportArgs),
    /// Generate still thumbnails
    Thumbnails(ThumbnailsArgs),
    /// Re-encode towards a target bitrate
    Compress(CompressArgs),
    /// Transcribe the audio track
    Transcribe(TranscribeArgs),
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    pub video_id: String,
    #[arg(long, default_value = "h264")]
    pub codec: String,
    #[arg(long, default_value_t = 1920)]
    pub width: u32,
    #[arg(long, default_value_t = 1080)]
    pub height: u32,
    #[arg(long, default_value_t = 4000)]
    pub bitrate_kbps: u64,
    #[arg(long, default_value = "mp4")]
    pub container: String,
}

#[derive(Args, Debug)]
pub struct ThumbnailsArgs {
    pub video_id: String,
    /// Sizes: small, medium, large
    #[arg(long, value_delimiter = ',')]
    pub sizes: Vec<String>,
    /// Capture offsets in seconds
    #[arg(long, value_delimiter = ',')]
    pub offsets: Vec<f64>,
}

#[derive(Args, Debug)]
pub struct CompressArgs {
    pub video_id: String,
    #[arg(long)]
    pub bitrate_kbps: u64,
}

#[derive(Args, Debug)]
pub struct TranscribeArgs {
    pub video_id: String,
    #[arg(long)]
    pub language: Option<String>,
}

#[derive(Args, Debug)]
pub struct JobListArgs {
    #[arg(long)]
    pub kind: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub video: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum WebhookCommands {
    /// Verify and apply a webhook delivery read from a file
    Ingest(WebhookIngestArgs),
}

#[derive(Args, Debug)]
pub struct WebhookIngestArgs {
    /// File holding the raw request body
    #[arg(long)]
    pub payload: PathBuf,
    /// Signature header value (t=...,v1=...)
    #[arg(long)]
    pub signature: String,
}

#[derive(Args, Debug)]
pub struct TranscriptArgs {
    pub video_id: String,
    #[arg(long, value_enum, default_value_t = TranscriptFormatArg::Srt)]
    pub format: TranscriptFormatArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TranscriptFormatArg {
    Srt,
    Vtt,
    Json,
}

impl From<TranscriptFormatArg> for TranscriptFormat {
    fn from(value: TranscriptFormatArg) -> Self {
        match value {
            TranscriptFormatArg::Srt => TranscriptFormat::Srt,
            TranscriptFormatArg::Vtt => TranscriptFormat::Vtt,
            TranscriptFormatArg::Json => TranscriptFormat::Json,
        }
    }
}

#[derive(Args, Debug)]
pub struct AnalyticsArgs {
    pub video_id: String,
    /// Rollup window in days
    #[arg(long, default_value_t = 7)]
    pub window_days: i64,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Destination directory for the snapshots
    pub destination: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Basic filesystem and database checks
    Check,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "studioctl", &mut std::io::stdout());
        return Ok(());
    }

    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Video(VideoCommands::Create(args)) => {
            let view = context.video_create(args)?;
            render(&view, cli.format)?;
        }
        Commands::Video(VideoCommands::Show { video_id }) => {
            let view = VideoView::from(context.studio.get_video(video_id)?);
            render(&view, cli.format)?;
        }
        Commands::Video(VideoCommands::List(args)) => {
            let list = context.video_list(args)?;
            render(&list, cli.format)?;
        }
        Commands::Video(VideoCommands::Share(args)) => {
            let sharing = SharingSettings {
                is_public: args.public,
                password_hash: args.password_hash.clone(),
                link_expires_at: args.expires_in_hours.map(|hours| Utc::now() + Duration::hours(hours)),
                max_views: args.max_views,
            };
            context.studio.update_sharing(&args.video_id, &sharing)?;
            render(
                &Message {
                    message: format!("sharing updated for {}", args.video_id),
                },
                cli.format,
            )?;
        }
        Commands::Video(VideoCommands::Delete { video_id }) => {
            context.block_on(context.studio.delete_video(video_id))??;
            render(
                &Message {
                    message: format!("video {video_id} deleted"),
                },
                cli.format,
            )?;
        }
        Commands::Job(JobCommands::Request(request)) => {
            let job = context.job_request(request)?;
            render(&JobEntry::from(&job), cli.format)?;
        }
        Commands::Job(JobCommands::Show { job_id }) => {
            let job = context.studio.jobs().get(job_id)?;
            render(&JobEntry::from(&job), cli.format)?;
        }
        Commands::Job(JobCommands::List(args)) => {
            let list = context.job_list(args)?;
            render(&list, cli.format)?;
        }
        Commands::Job(JobCommands::Cancel { job_id }) => {
            context.studio.cancel_job(job_id)?;
            render(
                &Message {
                    message: format!("job {job_id} cancelled"),
                },
                cli.format,
            )?;
        }
        Commands::Webhook(WebhookCommands::Ingest(args)) => {
            let report = context.webhook_ingest(args)?;
            render(&report, cli.format)?;
        }
        Commands::Transcript(args) => {
            let document = context
                .studio
                .transcript_document(&args.video_id, args.format.into())?;
            let out = TranscriptOutput {
                video_id: args.video_id.clone(),
                document,
            };
            render(&out, cli.format)?;
        }
        Commands::Analytics(args) => {
            let summary = context.studio.analytics_summary(
                &args.video_id,
                Duration::days(args.window_days),
                Utc::now(),
            )?;
            render(&AnalyticsView::from(summary), cli.format)?;
        }
        Commands::Backup(args) => {
            let result = context.backup(args)?;
            render(&result, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
        // Handled before the context is built.
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("STUDIOCTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

pub struct AppContext {
    config: StudioConfig,
    config_path: PathBuf,
    videos_db: PathBuf,
    jobs_db: PathBuf,
    studio: VideoStudio,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_studio_config(&config_path)?;

        let data_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(|| config.resolve_path(&config.paths.data_dir));
        fs::create_dir_all(&data_dir)?;

        let videos_db = cli
            .videos_db
            .clone()
            .unwrap_or_else(|| data_dir.join("videos.sqlite"));
        let jobs_db = cli
            .jobs_db
            .clone()
            .unwrap_or_else(|| data_dir.join("jobs.sqlite"));

        let store = VideoStore::builder().path(&videos_db).build()?;
        store.initialize()?;
        let jobs = JobStore::builder()
            .path(&jobs_db)
            .capacity(config.limits.max_queued_jobs)
            .build()?;
        jobs.initialize()?;

        let backoff = BackoffPolicy::from_config(&config.retry);
        let platform = Arc::new(PlatformClient::new(&config.platform, backoff)?);
        let studio = VideoStudio::new(store, jobs, platform, config.clone());

        Ok(Self {
            config,
            config_path,
            videos_db,
            jobs_db,
            studio,
        })
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> Result<F::Output> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(future))
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let video_counts = self.video_counts().unwrap_or_default();
        let job_counts = self
            .studio
            .jobs()
            .counts()
            .map(|counts| {
                counts
                    .into_iter()
                    .map(|(status, count)| (status.to_string(), count))
                    .collect()
            })
            .unwrap_or_default();
        Ok(StatusReport {
            config: self.config_path.display().to_string(),
            video_counts,
            job_counts,
        })
    }

    fn video_counts(&self) -> Option<HashMap<String, i64>> {
        let conn =
            Connection::open_with_flags(&self.videos_db, OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM videos GROUP BY status")
            .ok()?;
        let mut map = HashMap::new();
        for row in stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .ok()?
        {
            if let Ok((status, count)) = row {
                map.insert(status, count);
            }
        }
        Some(map)
    }

    fn video_create(&self, args: &VideoCreateArgs) -> Result<VideoCreateView> {
        let new = NewVideo {
            owner_id: args.owner.clone(),
            project_id: args.project.clone(),
            title: args.title.clone(),
            source_path: args
                .source
                .as_ref()
                .map(|path| path.display().to_string()),
            size_bytes: args.size_bytes,
        };
        let creation = self.block_on(self.studio.create_video(new, args.upload))??;
        Ok(VideoCreateView {
            video: VideoView::from(creation.video),
            upload_id: creation.upload.as_ref().map(|u| u.upload_id.clone()),
            upload_url: creation.upload.map(|u| u.upload_url),
        })
    }

    fn video_list(&self, args: &VideoListArgs) -> Result<VideoList> {
        let status = args
            .status
            .as_deref()
            .map(|value| value.parse::<VideoStatus>())
            .transpose()?;
        let ai_status = args
            .ai_status
            .as_deref()
            .map(|value| value.parse::<AiStatus>())
            .transpose()?;
        let filter = VideoFilter {
            owner_id: args.owner.clone(),
            project_id: None,
            status,
            ai_status,
            title_query: args.query.clone(),
            limit: Some(args.limit),
        };
        let rows = self
            .studio
            .search_videos(&filter)?
            .into_iter()
            .map(VideoView::from)
            .collect();
        Ok(VideoList { rows })
    }

    fn job_request(&self, request: &RequestCommands) -> Result<ProcessingJob> {
        match request {
            RequestCommands::Export(args) => Ok(self.studio.request_export(
                &args.video_id,
                ExportOptions {
                    codec: args.codec.clone(),
                    width: args.width,
                    height: args.height,
                    bitrate_kbps: args.bitrate_kbps,
                    container: args.container.clone(),
                },
            )?),
            RequestCommands::Thumbnails(args) => {
                let sizes = args
                    .sizes
                    .iter()
                    .map(|value| value.parse::<ThumbnailSize>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(AppError::InvalidArgument)?;
                Ok(self
                    .studio
                    .request_thumbnails(&args.video_id, sizes, args.offsets.clone())?)
            }
            RequestCommands::Compress(args) => Ok(self
                .studio
                .request_compression(&args.video_id, args.bitrate_kbps)?),
            RequestCommands::Transcribe(args) => Ok(self
                .studio
                .request_transcription(&args.video_id, args.language.clone())?),
        }
    }

    fn job_list(&self, args: &JobListArgs) -> Result<JobList> {
        let kind = args
            .kind
            .as_deref()
            .map(|value| value.parse::<JobKind>())
            .transpose()?;
        let status = args
            .status
            .as_deref()
            .map(|value| value.parse::<JobStatus>())
            .transpose()?;
        let filter = JobFilter {
            kind,
            status,
            video_id: args.video.clone(),
            limit: Some(args.limit),
        };
        let rows = self
            .studio
            .jobs()
            .list(&filter)?
            .iter()
            .map(JobEntry::from)
            .collect();
        Ok(JobList { rows })
    }

    fn webhook_ingest(&self, args: &WebhookIngestArgs) -> Result<IngestReport> {
        let payload = fs::read(&args.payload)?;
        let outcome = self
            .studio
            .ingest_webhook(&payload, &args.signature, Utc::now())?;
        Ok(IngestReport {
            outcome: describe_outcome(&outcome),
        })
    }

    fn backup(&self, args: &BackupArgs) -> Result<BackupResult> {
        fs::create_dir_all(&args.destination)?;
        let videos = args.destination.join("videos.sqlite");
        let jobs = args.destination.join("jobs.sqlite");
        self.studio.store().backup_to(&videos)?;
        self.studio.jobs().backup_to(&jobs)?;
        Ok(BackupResult {
            videos: videos.display().to_string(),
            jobs: jobs.display().to_string(),
        })
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(check_path("studio.toml", &self.config_path));
        results.push(check_path(
            "ffmpeg",
            Path::new(&self.config.encoder.ffmpeg_path),
        ));
        results.push(check_path(
            "ffprobe",
            Path::new(&self.config.encoder.ffprobe_path),
        ));
        results.push(check_database("videos.sqlite", &self.videos_db));
        results.push(check_database("jobs.sqlite", &self.jobs_db));
        results.push(check_directory(
            "scratch",
            &self.config.resolve_path(&self.config.paths.scratch_dir),
        ));
        results.push(check_directory(
            "output",
            &self.config.resolve_path(&self.config.paths.output_dir),
        ));
        results
    }
}

fn describe_outcome(outcome: &IngestOutcome) -> String {
    match outcome {
        IngestOutcome::Applied(action) => format!("applied: {action:?}"),
        IngestOutcome::Buffered { asset_id } => format!("buffered for asset {asset_id}"),
        IngestOutcome::Duplicate => "duplicate, ignored".to_string(),
        IngestOutcome::Ignored { event_type } => format!("ignored event type {event_type}"),
    }
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{} missing", path.display()))
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::warn(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(name, format!("{} not found", path.display())),
    }
}

fn check_database(name: &str, path: &Path) -> HealthEntry {
    if !path.exists() {
        return HealthEntry::warn(name, format!("{} not found", path.display()));
    }
    match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => {
            let pragma: rusqlite::Result<String> =
                conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0));
            match pragma {
                Ok(result) if result.to_lowercase() == "ok" => {
                    HealthEntry::ok(name, "integrity ok".to_string())
                }
                Ok(result) => HealthEntry::warn(name, format!("integrity_check: {result}")),
                Err(err) => HealthEntry::warn(name, format!("error: {err}")),
            }
        }
        Err(err) => HealthEntry::error(name, format!("failed to open: {err}")),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub config: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub video_counts: HashMap<String, i64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub job_counts: HashMap<String, i64>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Config: {}", self.config)];
        if !self.video_counts.is_empty() {
            lines.push("Videos:".to_string());
            for (status, count) in self.video_counts.iter() {
                lines.push(format!("  - {status}: {count}"));
            }
        }
        if !self.job_counts.is_empty() {
            lines.push("Jobs:".to_string());
            for (status, count) in self.job_counts.iter() {
                lines.push(format!("  - {status}: {count}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct VideoView {
    pub video_id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub status: String,
    pub ai_status: String,
    pub asset_id: Option<String>,
    pub playback_id: Option<String>,
    pub duration_seconds: Option<f64>,
    /// Percent, 0 to 100. Stored internally as a fraction.
    pub processing_progress: f64,
    pub error_message: Option<String>,
}

impl From<Video> for VideoView {
    fn from(video: Video) -> Self {
        Self {
            video_id: video.video_id,
            owner_id: video.owner_id,
            title: video.title,
            status: video.status.to_string(),
            ai_status: video.ai_status.to_string(),
            asset_id: video.asset_id,
            playback_id: video.playback_id,
            duration_seconds: video.duration_seconds,
            processing_progress: video.processing_progress * 100.0,
            error_message: video.error_message,
        }
    }
}

impl DisplayFallback for VideoView {
    fn display(&self) -> String {
        let duration = self
            .duration_seconds
            .map(|v| format!("{v:.1}s"))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} | {} | status={} ai={} dur={} progress={:.0}%",
            self.video_id,
            self.title.as_deref().unwrap_or("<untitled>"),
            self.status,
            self.ai_status,
            duration,
            self.processing_progress
        )
    }
}

#[derive(Debug, Serialize)]
pub struct VideoCreateView {
    pub video: VideoView,
    pub upload_id: Option<String>,
    pub upload_url: Option<String>,
}

impl DisplayFallback for VideoCreateView {
    fn display(&self) -> String {
        match &self.upload_url {
            Some(url) => format!("{}\nupload url: {url}", self.video.display()),
            None => self.video.display(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VideoList {
    pub rows: Vec<VideoView>,
}

impl DisplayFallback for VideoList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No videos found".to_string();
        }
        self.rows
            .iter()
            .map(VideoView::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct JobEntry {
    pub job_id: String,
    pub kind: String,
    pub video_id: String,
    pub status: String,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Percent, 0 to 100. Stored internally as a fraction.
    pub progress: f64,
    pub error: Option<String>,
}

impl From<&ProcessingJob> for JobEntry {
    fn from(job: &ProcessingJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            kind: job.kind.to_string(),
            video_id: job.video_id.clone(),
            status: job.status.to_string(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            progress: job.progress * 100.0,
            error: job.error.clone(),
        }
    }
}

impl DisplayFallback for JobEntry {
    fn display(&self) -> String {
        format!(
            "{} | {} | video={} status={} attempts={}/{} progress={:.0}%",
            self.job_id,
            self.kind,
            self.video_id,
            self.status,
            self.attempts,
            self.max_attempts,
            self.progress
        )
    }
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub rows: Vec<JobEntry>,
}

impl DisplayFallback for JobList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No jobs found".to_string();
        }
        self.rows
            .iter()
            .map(JobEntry::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub outcome: String,
}

impl DisplayFallback for IngestReport {
    fn display(&self) -> String {
        self.outcome.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct TranscriptOutput {
    pub video_id: String,
    pub document: String,
}

impl DisplayFallback for TranscriptOutput {
    fn display(&self) -> String {
        self.document.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyticsView {
    pub video_id: String,
    pub view_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub events_in_window: Vec<(String, i64)>,
    pub views_by_day: Vec<(String, i64)>,
}

impl From<studio_core::AnalyticsSummary> for AnalyticsView {
    fn from(summary: studio_core::AnalyticsSummary) -> Self {
        Self {
            video_id: summary.video_id,
            view_count: summary.view_count,
            comment_count: summary.comment_count,
            share_count: summary.share_count,
            events_in_window: summary.events_in_window,
            views_by_day: summary.views_by_day,
        }
    }
}

impl DisplayFallback for AnalyticsView {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "{} | views={} comments={} shares={}",
            self.video_id, self.view_count, self.comment_count, self.share_count
        )];
        for (kind, count) in &self.events_in_window {
            lines.push(format!("  - {kind}: {count}"));
        }
        if !self.views_by_day.is_empty() {
            lines.push("Views by day:".to_string());
            for (day, count) in &self.views_by_day {
                lines.push(format!("  - {day}: {count}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct BackupResult {
    pub videos: String,
    pub jobs: String,
}

impl DisplayFallback for BackupResult {
    fn display(&self) -> String {
        format!("videos -> {}\njobs -> {}", self.videos, self.jobs)
    }
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

impl DisplayFallback for Message {
    fn display(&self) -> String {
        self.message.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| {
                format!(
                    "[{status}] {name}: {detail}",
                    status = entry.status,
                    name = entry.name,
                    detail = entry.detail
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_view_reports_progress_as_percent() {
        let video = Video {
            video_id: "vid-1".to_string(),
            owner_id: "alice".to_string(),
            project_id: None,
            title: None,
            source_path: None,
            asset_id: None,
            playback_id: None,
            upload_id: None,
            duration_seconds: None,
            aspect_ratio: None,
            resolution: None,
            size_bytes: None,
            thumbnail_url: None,
            preview_gif_url: None,
            status: VideoStatus::Processing,
            processing_progress: 0.45,
            error_message: None,
            ai_status: AiStatus::Pending,
            has_transcript: false,
            has_analysis: false,
            has_tags: false,
            has_chapters: false,
            view_count: 0,
            comment_count: 0,
            share_count: 0,
            is_public: false,
            link_expires_at: None,
            max_views: None,
            version: 0,
            created_at: None,
            updated_at: None,
        };
        let view = VideoView::from(video);
        assert_eq!(view.processing_progress, 45.0);
        assert!(view.display().contains("progress=45%"));
    }

    #[test]
    fn token_is_required_when_env_set() {
        let cli = Cli {
            config: PathBuf::from("configs/studio.toml"),
            data_dir: None,
            videos_db: None,
            jobs_db: None,
            token: None,
            format: OutputFormat::Text,
            command: Commands::Status,
        };
        std::env::set_var("STUDIOCTL_TOKEN", "sekrit");
        assert!(matches!(
            enforce_token(&cli),
            Err(AppError::Authentication)
        ));

        let cli = Cli {
            token: Some("sekrit".to_string()),
            ..cli
        };
        assert!(enforce_token(&cli).is_ok());
        std::env::remove_var("STUDIOCTL_TOKEN");
    }
}
