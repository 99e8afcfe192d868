mod error;

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::EncoderSection;

pub use error::{EncoderError, EncoderResult};

/// Cooperative cancellation handle. The encoder checks it between stderr
/// reads; a flagged invocation is killed and cleaned up exactly as a
/// timeout would be.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub type ProgressFn = dyn Fn(f64) + Send + Sync;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaMetadata {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: String,
    pub bitrate_kbps: u64,
    pub size_bytes: u64,
}

// ffprobe -print_format json. Numeric fields arrive as strings.
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailSize {
    Small,
    Medium,
    Large,
}

impl ThumbnailSize {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            ThumbnailSize::Small => (320, 180),
            ThumbnailSize::Medium => (640, 360),
            ThumbnailSize::Large => (1280, 720),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailSize::Small => "small",
            ThumbnailSize::Medium => "medium",
            ThumbnailSize::Large => "large",
        }
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThumbnailSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(ThumbnailSize::Small),
            "medium" => Ok(ThumbnailSize::Medium),
            "large" => Ok(ThumbnailSize::Large),
            other => Err(format!("unknown thumbnail size: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailArtifact {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub time_offset: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportOptions {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u64,
    pub container: String,
}

/// Stateless wrapper around an external command-line encoder. Every call
/// spawns one child process inside a scratch directory that is removed on
/// success, timeout, crash and cancel alike.
pub struct EncoderEngine {
    config: EncoderSection,
    scratch_root: PathBuf,
    output_root: PathBuf,
    budget: Duration,
    progress_re: Regex,
}

impl EncoderEngine {
    pub fn new(
        config: EncoderSection,
        scratch_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> EncoderResult<Self> {
        let scratch_root = scratch_root.into();
        let output_root = output_root.into();
        std::fs::create_dir_all(&scratch_root).map_err(|source| EncoderError::Io {
            path: scratch_root.clone(),
            source,
        })?;
        std::fs::create_dir_all(&output_root).map_err(|source| EncoderError::Io {
            path: output_root.clone(),
            source,
        })?;
        let budget = Duration::from_secs(config.timeout_seconds.max(1));
        let progress_re = Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)")
            .map_err(|err| EncoderError::Parse(err.to_string()))?;
        Ok(Self {
            config,
            scratch_root,
            output_root,
            budget,
            progress_re,
        })
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub async fn extract_metadata(&self, input: &Path) -> EncoderResult<MediaMetadata> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            input.to_string_lossy().to_string(),
        ];
        let output = self.probe_output(&args).await?;
        parse_probe(&output)
    }

    pub async fn generate_thumbnails(
        &self,
        input: &Path,
        sizes: &[ThumbnailSize],
        time_offsets: &[f64],
        cancel: &CancelFlag,
    ) -> EncoderResult<Vec<ThumbnailArtifact>> {
        let scratch = self.scratch_dir()?;
        let out_dir = self.output_root.join(file_stem(input)).join("thumbs");
        std::fs::create_dir_all(&out_dir).map_err(|source| EncoderError::Io {
            path: out_dir.clone(),
            source,
        })?;

        let mut artifacts = Vec::with_capacity(sizes.len() * time_offsets.len());
        for size in sizes {
            let (width, height) = size.dimensions();
            for offset in time_offsets {
                if cancel.is_cancelled() {
                    return Err(EncoderError::Cancelled);
                }
                let name = format!(
                    "{}_{}ms.{}",
                    size.as_str(),
                    (offset * 1000.0).round() as u64,
                    self.config.thumbnail_format
                );
                let tmp = scratch.path().join(&name);
                let args = vec![
                    "-ss".to_string(),
                    format!("{offset:.3}"),
                    "-i".to_string(),
                    input.to_string_lossy().to_string(),
                    "-frames:v".to_string(),
                    "1".to_string(),
                    "-vf".to_string(),
                    format!("scale={width}:{height}"),
                    "-y".to_string(),
                    tmp.to_string_lossy().to_string(),
                ];
                self.invoke(&self.config.ffmpeg_path, &args, None, cancel, None)
                    .await?;
                let (actual_w, actual_h) = image::image_dimensions(&tmp)
                    .map_err(|err| EncoderError::Parse(format!("unreadable thumbnail: {err}")))?;
                let final_path = out_dir.join(&name);
                promote(&tmp, &final_path)?;
                artifacts.push(ThumbnailArtifact {
                    path: final_path,
                    width: actual_w,
                    height: actual_h,
                    time_offset: *offset,
                });
            }
        }
        debug!(count = artifacts.len(), input = %input.display(), "thumbnails generated");
        Ok(artifacts)
    }

    pub async fn export(
        &self,
        input: &Path,
        options: &ExportOptions,
        cancel: &CancelFlag,
        on_progress: Option<&ProgressFn>,
    ) -> EncoderResult<PathBuf> {
        let total_duration = match on_progress {
            Some(_) => self
                .extract_metadata(input)
                .await
                .ok()
                .map(|meta| meta.duration_seconds),
            None => None,
        };
        let scratch = self.scratch_dir()?;
        let tmp = scratch.path().join(format!("export.{}", options.container));
        let args = vec![
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            ffmpeg_codec(&options.codec).to_string(),
            "-b:v".to_string(),
            format!("{}k", options.bitrate_kbps),
            "-s".to_string(),
            format!("{}x{}", options.width, options.height),
            "-y".to_string(),
            tmp.to_string_lossy().to_string(),
        ];
        self.invoke(
            &self.config.ffmpeg_path,
            &args,
            total_duration,
            cancel,
            on_progress,
        )
        .await?;
        let final_path = self.output_root.join(format!(
            "{}_{}p_{}.{}",
            file_stem(input),
            options.height,
            options.codec,
            options.container
        ));
        promote(&tmp, &final_path)?;
        Ok(final_path)
    }

    /// Re-encodes at `target_bitrate_kbps`. The output is never larger than
    /// the input: when the re-encode grows the file the original bytes are
    /// kept instead.
    pub async fn compress(
        &self,
        input: &Path,
        target_bitrate_kbps: u64,
        cancel: &CancelFlag,
        on_progress: Option<&ProgressFn>,
    ) -> EncoderResult<PathBuf> {
        let input_size = std::fs::metadata(input)
            .map_err(|source| EncoderError::Io {
                path: input.to_path_buf(),
                source,
            })?
            .len();
        let scratch = self.scratch_dir()?;
        let extension = input
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_else(|| "mp4".to_string());
        let tmp = scratch.path().join(format!("compressed.{extension}"));
        let args = vec![
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-b:v".to_string(),
            format!("{target_bitrate_kbps}k"),
            "-y".to_string(),
            tmp.to_string_lossy().to_string(),
        ];
        self.invoke(&self.config.ffmpeg_path, &args, None, cancel, on_progress)
            .await?;

        let final_path = self
            .output_root
            .join(format!("{}_compressed.{extension}", file_stem(input)));
        let tmp_size = std::fs::metadata(&tmp)
            .map_err(|source| EncoderError::Io {
                path: tmp.clone(),
                source,
            })?
            .len();
        if tmp_size > input_size {
            warn!(
                input = %input.display(),
                input_size,
                encoded_size = tmp_size,
                "re-encode grew the file, keeping original bytes"
            );
            if let Some(parent) = final_path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| EncoderError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::copy(input, &final_path).map_err(|source| EncoderError::Io {
                path: final_path.clone(),
                source,
            })?;
        } else {
            promote(&tmp, &final_path)?;
        }
        Ok(final_path)
    }

    pub async fn extract_audio(&self, input: &Path, cancel: &CancelFlag) -> EncoderResult<PathBuf> {
        let scratch = self.scratch_dir()?;
        let tmp = scratch.path().join("audio.wav");
        let args = vec![
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-acodec".to_string(),
            self.config.audio_codec.clone(),
            "-y".to_string(),
            tmp.to_string_lossy().to_string(),
        ];
        self.invoke(&self.config.ffmpeg_path, &args, None, cancel, None)
            .await?;
        let final_path = self
            .output_root
            .join(format!("{}_audio.wav", file_stem(input)));
        promote(&tmp, &final_path)?;
        Ok(final_path)
    }

    fn scratch_dir(&self) -> EncoderResult<tempfile::TempDir> {
        tempfile::TempDir::new_in(&self.scratch_root).map_err(|source| EncoderError::Io {
            path: self.scratch_root.clone(),
            source,
        })
    }

    async fn probe_output(&self, args: &[String]) -> EncoderResult<Vec<u8>> {
        let binary = &self.config.ffprobe_path;
        let future = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .output();
        let output = timeout(self.budget, future)
            .await
            .map_err(|_| EncoderError::Timeout {
                budget: self.budget,
            })?
            .map_err(|source| spawn_error(binary, source))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_exit(&stderr));
        }
        Ok(output.stdout)
    }

    async fn invoke(
        &self,
        binary: &str,
        args: &[String],
        total_duration: Option<f64>,
        cancel: &CancelFlag,
        on_progress: Option<&ProgressFn>,
    ) -> EncoderResult<()> {
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| spawn_error(binary, source))?;

        let driven = timeout(
            self.budget,
            drive(
                &mut child,
                cancel,
                total_duration,
                on_progress,
                &self.progress_re,
            ),
        )
        .await;

        match driven {
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(EncoderError::Timeout {
                    budget: self.budget,
                })
            }
            Ok(Err(EncoderError::Cancelled)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(EncoderError::Cancelled)
            }
            Ok(Err(err)) => Err(err),
            Ok(Ok((status, stderr_tail))) => {
                if status.success() {
                    Ok(())
                } else {
                    Err(classify_exit(&stderr_tail))
                }
            }
        }
    }
}

async fn drive(
    child: &mut Child,
    cancel: &CancelFlag,
    total_duration: Option<f64>,
    on_progress: Option<&ProgressFn>,
    progress_re: &Regex,
) -> EncoderResult<(ExitStatus, String)> {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(16);
    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            if cancel.is_cancelled() {
                return Err(EncoderError::Cancelled);
            }
            match lines.next_line().await? {
                Some(line) => {
                    if let (Some(total), Some(callback)) = (total_duration, on_progress) {
                        if let Some(done) = parse_progress_seconds(progress_re, &line) {
                            if total > 0.0 {
                                callback((done / total).clamp(0.0, 1.0));
                            }
                        }
                    }
                    if tail.len() == 16 {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                None => break,
            }
        }
    }
    let status = child.wait().await?;
    Ok((status, tail.into_iter().collect::<Vec<_>>().join("\n")))
}

fn parse_probe(output: &[u8]) -> EncoderResult<MediaMetadata> {
    let probe: ProbeOutput = serde_json::from_slice(output)
        .map_err(|err| EncoderError::Parse(format!("invalid probe output: {err}")))?;
    let stream = probe
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| EncoderError::UnsupportedInput {
            reason: "input has no video stream".to_string(),
        })?;
    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    let duration_seconds = probe
        .format
        .duration
        .as_deref()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(0.0);
    let bitrate_kbps = probe
        .format
        .bit_rate
        .as_deref()
        .and_then(|value| value.parse::<u64>().ok())
        .map(|bps| bps / 1000)
        .unwrap_or(0);
    let size_bytes = probe
        .format
        .size
        .as_deref()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);
    Ok(MediaMetadata {
        duration_seconds,
        width,
        height,
        aspect_ratio: aspect_ratio_label(width, height),
        bitrate_kbps,
        size_bytes,
    })
}

fn parse_progress_seconds(progress_re: &Regex, line: &str) -> Option<f64> {
    let captures = progress_re.captures(line)?;
    let hours: f64 = captures.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = captures.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = captures.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn spawn_error(binary: &str, source: io::Error) -> EncoderError {
    if source.kind() == io::ErrorKind::NotFound {
        EncoderError::Unavailable(format!("{binary} not found"))
    } else {
        EncoderError::Io {
            path: PathBuf::from(binary),
            source,
        }
    }
}

const PERMANENT_MARKERS: &[&str] = &[
    "invalid data",
    "moov atom not found",
    "unknown encoder",
    "unsupported codec",
    "invalid argument",
    "error while decoding",
    "does not contain any stream",
];

fn classify_exit(stderr_tail: &str) -> EncoderError {
    let lowered = stderr_tail.to_lowercase();
    if PERMANENT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        EncoderError::UnsupportedInput {
            reason: last_line(stderr_tail),
        }
    } else {
        EncoderError::Unavailable(last_line(stderr_tail))
    }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("encoder exited with failure")
        .trim()
        .to_string()
}

fn ffmpeg_codec(codec: &str) -> &str {
    match codec {
        "h264" => "libx264",
        "h265" => "libx265",
        "vp9" => "libvpx-vp9",
        "av1" => "libaom-av1",
        other => other,
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "media".to_string())
}

fn promote(from: &Path, to: &Path) -> EncoderResult<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|source| EncoderError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|source| EncoderError::Io {
        path: to.to_path_buf(),
        source,
    })?;
    let _ = std::fs::remove_file(from);
    Ok(())
}

fn aspect_ratio_label(width: u32, height: u32) -> String {
    if width == 0 || height == 0 {
        return "unknown".to_string();
    }
    let divisor = gcd(width, height);
    format!("{}:{}", width / divisor, height / divisor)
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a.max(1)
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_line_parses_to_seconds() {
        let re = Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap();
        let line = "frame= 100 fps= 25 time=00:01:30.50 bitrate=900kbits/s";
        assert_eq!(parse_progress_seconds(&re, line), Some(90.5));
        assert_eq!(parse_progress_seconds(&re, "no timing here"), None);
    }

    #[test]
    fn probe_json_parses_to_metadata() {
        let raw = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "width": 1920, "height": 1080}
            ],
            "format": {"duration": "12.480000", "bit_rate": "2500000", "size": "3900000"}
        }"#;
        let meta = parse_probe(raw).unwrap();
        assert_eq!(meta.width, 1920);
        assert_eq!(meta.height, 1080);
        assert_eq!(meta.aspect_ratio, "16:9");
        assert_eq!(meta.duration_seconds, 12.48);
        assert_eq!(meta.bitrate_kbps, 2500);
        assert_eq!(meta.size_bytes, 3_900_000);
    }

    #[test]
    fn probe_without_video_stream_is_unsupported() {
        let raw = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(matches!(
            parse_probe(raw),
            Err(EncoderError::UnsupportedInput { .. })
        ));
    }

    #[test]
    fn stderr_classification() {
        assert!(matches!(
            classify_exit("x.mp4: Invalid data found when processing input"),
            EncoderError::UnsupportedInput { .. }
        ));
        assert!(matches!(
            classify_exit("Cannot allocate memory"),
            EncoderError::Unavailable(_)
        ));
    }

    #[test]
    fn aspect_ratio_reduces() {
        assert_eq!(aspect_ratio_label(1920, 1080), "16:9");
        assert_eq!(aspect_ratio_label(640, 480), "4:3");
        assert_eq!(aspect_ratio_label(0, 480), "unknown");
    }
}
