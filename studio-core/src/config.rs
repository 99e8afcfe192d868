use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StudioConfig {
    pub paths: PathsSection,
    pub limits: LimitsSection,
    pub encoder: EncoderSection,
    pub workers: WorkersSection,
    pub platform: PlatformSection,
    pub webhook: WebhookSection,
    pub transcription: TranscriptionSection,
    pub retry: RetrySection,
}

impl StudioConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub scratch_dir: String,
    pub output_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    pub max_upload_bytes: u64,
    pub max_queued_jobs: usize,
    pub supported_containers: Vec<String>,
    pub supported_codecs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderSection {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub timeout_seconds: u64,
    pub audio_codec: String,
    pub thumbnail_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkersSection {
    pub export: usize,
    pub thumbnail: usize,
    pub compress: usize,
    pub transcribe: usize,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSection {
    pub base_url: String,
    pub playback_base_url: String,
    pub token_id: String,
    pub token_secret: String,
    pub upload_timeout_seconds: u64,
    pub cors_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSection {
    pub secret: String,
    pub tolerance_seconds: i64,
    pub orphan_window_seconds: i64,
    pub event_retention_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionSection {
    pub endpoint: String,
    pub api_key: String,
    pub default_language: String,
    pub merge_gap_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

pub fn load_studio_config<P: AsRef<Path>>(path: P) -> Result<StudioConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/studio.toml");
        let config = load_studio_config(path).expect("config should parse");
        assert_eq!(config.workers.export, 2);
        assert!(config.limits.supported_codecs.contains(&"h264".to_string()));
        assert!(config.webhook.tolerance_seconds > 0);
        assert_eq!(config.transcription.default_language, "en");
    }
}
