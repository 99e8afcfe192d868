mod error;
mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::sleep;
use tracing::warn;
use url::Url;

use crate::config::PlatformSection;
use crate::retry::BackoffPolicy;

pub use error::{PlatformError, PlatformResult};
pub use webhook::{
    interpret_event, parse_event, sign_payload, verify_signature, WebhookAction, WebhookEvent,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectUpload {
    pub upload_id: String,
    pub upload_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetSource {
    Url(String),
    Upload(String),
}

#[derive(Debug, Clone, Default)]
pub struct AssetOptions {
    pub playback_policy: Vec<String>,
    pub passthrough: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub asset_id: String,
    pub playback_id: Option<String>,
    pub status: String,
    pub duration_seconds: Option<f64>,
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    Preserve,
    Crop,
    Pad,
}

impl FitMode {
    fn as_str(&self) -> &'static str {
        match self {
            FitMode::Preserve => "preserve",
            FitMode::Crop => "crop",
            FitMode::Pad => "pad",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailParams {
    pub width: u32,
    pub height: u32,
    pub fit_mode: FitMode,
    pub time: f64,
}

#[derive(Debug, Clone)]
pub struct GifParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub start: f64,
    pub end: f64,
}

/// Lifecycle operations against the hosted video platform. The orchestrator
/// depends on this trait so tests can substitute a fake.
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    async fn create_direct_upload(
        &self,
        timeout_seconds: u64,
        cors_origin: &str,
    ) -> PlatformResult<DirectUpload>;

    async fn create_asset(
        &self,
        source: AssetSource,
        options: &AssetOptions,
    ) -> PlatformResult<RemoteAsset>;

    async fn get_asset(&self, asset_id: &str) -> PlatformResult<RemoteAsset>;

    async fn delete_asset(&self, asset_id: &str) -> PlatformResult<()>;

    fn thumbnail_url(&self, playback_id: &str, params: &ThumbnailParams) -> PlatformResult<Url>;

    fn gif_url(&self, playback_id: &str, params: &GifParams) -> PlatformResult<Url>;
}

/// HTTP client for the remote media platform. Constructed once and passed
/// by reference; 5xx and timeouts retry with exponential backoff, 4xx
/// surface unmodified.
pub struct PlatformClient {
    http: Client,
    base_url: Url,
    playback_base: Url,
    token_id: String,
    token_secret: String,
    backoff: BackoffPolicy,
}

impl PlatformClient {
    pub fn new(config: &PlatformSection, backoff: BackoffPolicy) -> PlatformResult<Self> {
        let http = Client::builder()
            .user_agent("studio-core/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PlatformError::Network(err.to_string()))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|err| PlatformError::InvalidUrl(err.to_string()))?;
        let playback_base = Url::parse(&config.playback_base_url)
            .map_err(|err| PlatformError::InvalidUrl(err.to_string()))?;
        Ok(Self {
            http,
            base_url,
            playback_base,
            token_id: config.token_id.clone(),
            token_secret: config.token_secret.clone(),
            backoff,
        })
    }

    fn endpoint(&self, path: &str) -> PlatformResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| PlatformError::InvalidUrl("base url cannot be a base".to_string()))?;
            for part in path.split('/').filter(|part| !part.is_empty()) {
                segments.push(part);
            }
        }
        Ok(url)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> PlatformResult<T> {
        let url = self.endpoint(path)?;
        let mut attempt = 0u32;
        loop {
            match self.request_once(method.clone(), url.clone(), body.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind().retryable() && attempt + 1 < self.backoff.max_attempts() => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        wait = ?delay,
                        path,
                        error = %err,
                        "retrying platform request"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn request_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> PlatformResult<T> {
        let mut builder = self
            .http
            .request(method, url)
            .basic_auth(&self.token_id, Some(&self.token_secret));
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return serde_json::from_value(serde_json::Value::Null)
                    .map_err(|err| PlatformError::InvalidPayload(err.to_string()));
            }
            return response
                .json::<T>()
                .await
                .map_err(|err| PlatformError::InvalidPayload(err.to_string()));
        }
        let message = response.text().await.unwrap_or_default();
        Err(PlatformError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct WireUpload {
    id: String,
    url: Option<String>,
    asset_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAsset {
    id: String,
    status: String,
    duration: Option<f64>,
    aspect_ratio: Option<String>,
    #[serde(default)]
    playback_ids: Vec<WirePlayback>,
}

#[derive(Debug, Deserialize)]
struct WirePlayback {
    id: String,
}

impl From<WireAsset> for RemoteAsset {
    fn from(wire: WireAsset) -> Self {
        RemoteAsset {
            asset_id: wire.id,
            playback_id: wire.playback_ids.first().map(|p| p.id.clone()),
            status: wire.status,
            duration_seconds: wire.duration,
            aspect_ratio: wire.aspect_ratio,
        }
    }
}

#[async_trait]
impl MediaPlatform for PlatformClient {
    async fn create_direct_upload(
        &self,
        timeout_seconds: u64,
        cors_origin: &str,
    ) -> PlatformResult<DirectUpload> {
        let body = json!({
            "timeout": timeout_seconds,
            "cors_origin": cors_origin,
            "new_asset_settings": { "playback_policy": ["public"] },
        });
        let envelope: Envelope<WireUpload> =
            self.request(Method::POST, "uploads", Some(body)).await?;
        let upload_url = envelope.data.url.ok_or_else(|| {
            PlatformError::InvalidPayload("upload response missing url".to_string())
        })?;
        Ok(DirectUpload {
            upload_id: envelope.data.id,
            upload_url,
        })
    }

    async fn create_asset(
        &self,
        source: AssetSource,
        options: &AssetOptions,
    ) -> PlatformResult<RemoteAsset> {
        match source {
            AssetSource::Url(input_url) => {
                let mut body = json!({
                    "input": input_url,
                    "playback_policy": if options.playback_policy.is_empty() {
                        vec!["public".to_string()]
                    } else {
                        options.playback_policy.clone()
                    },
                });
                if let Some(passthrough) = &options.passthrough {
                    body["passthrough"] = json!(passthrough);
                }
                let envelope: Envelope<WireAsset> =
                    self.request(Method::POST, "assets", Some(body)).await?;
                Ok(envelope.data.into())
            }
            AssetSource::Upload(upload_id) => {
                // Upload-created assets are announced by webhook; this poll
                // covers callers that need the asset id synchronously.
                let envelope: Envelope<WireUpload> = self
                    .request(Method::GET, &format!("uploads/{upload_id}"), None)
                    .await?;
                let asset_id = envelope.data.asset_id.ok_or_else(|| {
                    PlatformError::InvalidPayload(
                        "upload has no asset yet; wait for the webhook".to_string(),
                    )
                })?;
                self.get_asset(&asset_id).await
            }
        }
    }

    async fn get_asset(&self, asset_id: &str) -> PlatformResult<RemoteAsset> {
        let envelope: Envelope<WireAsset> = self
            .request(Method::GET, &format!("assets/{asset_id}"), None)
            .await?;
        Ok(envelope.data.into())
    }

    async fn delete_asset(&self, asset_id: &str) -> PlatformResult<()> {
        let _: serde_json::Value = self
            .request(Method::DELETE, &format!("assets/{asset_id}"), None)
            .await?;
        Ok(())
    }

    fn thumbnail_url(&self, playback_id: &str, params: &ThumbnailParams) -> PlatformResult<Url> {
        let mut url = self
            .playback_base
            .join(&format!("{playback_id}/thumbnail.png"))
            .map_err(|err| PlatformError::InvalidUrl(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("width", &params.width.to_string())
            .append_pair("height", &params.height.to_string())
            .append_pair("fit_mode", params.fit_mode.as_str())
            .append_pair("time", &format!("{:.2}", params.time));
        Ok(url)
    }

    fn gif_url(&self, playback_id: &str, params: &GifParams) -> PlatformResult<Url> {
        let mut url = self
            .playback_base
            .join(&format!("{playback_id}/animated.gif"))
            .map_err(|err| PlatformError::InvalidUrl(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("width", &params.width.to_string())
            .append_pair("height", &params.height.to_string())
            .append_pair("fps", &params.fps.to_string())
            .append_pair("start", &format!("{:.2}", params.start))
            .append_pair("end", &format!("{:.2}", params.end));
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformSection;

    fn test_client() -> PlatformClient {
        let config = PlatformSection {
            base_url: "https://api.mediaplatform.example/video/v1".to_string(),
            playback_base_url: "https://image.mediaplatform.example".to_string(),
            token_id: "id".to_string(),
            token_secret: "secret".to_string(),
            upload_timeout_seconds: 3600,
            cors_origin: "https://studio.example".to_string(),
        };
        let backoff = BackoffPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10));
        PlatformClient::new(&config, backoff).expect("client")
    }

    #[test]
    fn thumbnail_url_is_pure_construction() {
        let client = test_client();
        let url = client
            .thumbnail_url(
                "pb-123",
                &ThumbnailParams {
                    width: 640,
                    height: 360,
                    fit_mode: FitMode::Crop,
                    time: 4.5,
                },
            )
            .unwrap();
        assert_eq!(url.host_str(), Some("image.mediaplatform.example"));
        assert!(url.path().ends_with("pb-123/thumbnail.png"));
        assert!(url.query().unwrap().contains("fit_mode=crop"));
        assert!(url.query().unwrap().contains("time=4.50"));
    }

    #[test]
    fn gif_url_carries_window() {
        let client = test_client();
        let url = client
            .gif_url(
                "pb-123",
                &GifParams {
                    width: 320,
                    height: 180,
                    fps: 15,
                    start: 1.0,
                    end: 4.0,
                },
            )
            .unwrap();
        assert!(url.path().ends_with("pb-123/animated.gif"));
        assert!(url.query().unwrap().contains("fps=15"));
        assert!(url.query().unwrap().contains("end=4.00"));
    }
}
