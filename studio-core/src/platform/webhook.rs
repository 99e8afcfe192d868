use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::error::{PlatformError, PlatformResult};

type HmacSha256 = Hmac<Sha256>;

/// An inbound notification from the remote platform, decoded but not yet
/// interpreted. `event_id` is platform-assigned and drives deduplication.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub asset_id: Option<String>,
    pub upload_id: Option<String>,
    pub playback_id: Option<String>,
    pub duration_seconds: Option<f64>,
    pub aspect_ratio: Option<String>,
    pub error_message: Option<String>,
    pub received_at: DateTime<Utc>,
    pub raw: serde_json::Value,
}

/// Normalized action the orchestrator understands. Unrecognized provider
/// event types map to `Unknown` rather than failing.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAction {
    UploadCompleted {
        upload_id: String,
        asset_id: String,
    },
    AssetReady {
        asset_id: String,
        playback_id: Option<String>,
        duration_seconds: Option<f64>,
        aspect_ratio: Option<String>,
    },
    AssetErrored {
        asset_id: String,
        message: String,
    },
    StreamConnected,
    RecordingReady {
        asset_id: String,
    },
    Unknown {
        event_type: String,
    },
}

/// Verifies the `t=<unix>,v1=<hex>` signature header against the payload
/// using HMAC-SHA256 over `"{t}.{payload}"`. Comparison is constant-time
/// via the hmac crate; stale timestamps outside `tolerance` are rejected.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> PlatformResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signature_hex: Option<&str> = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = value.parse().ok();
            }
            Some(("v1", value)) => {
                signature_hex = Some(value);
            }
            _ => {}
        }
    }
    let timestamp = timestamp
        .ok_or_else(|| PlatformError::SignatureRejected("missing timestamp".to_string()))?;
    let signature_hex = signature_hex
        .ok_or_else(|| PlatformError::SignatureRejected("missing v1 signature".to_string()))?;

    let age = now.timestamp() - timestamp;
    if age.abs() > tolerance.num_seconds() {
        return Err(PlatformError::SignatureRejected(format!(
            "timestamp outside tolerance ({age}s)"
        )));
    }

    let signature = hex::decode(signature_hex)
        .map_err(|_| PlatformError::SignatureRejected("signature is not hex".to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PlatformError::SignatureRejected("invalid secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&signature)
        .map_err(|_| PlatformError::SignatureRejected("signature mismatch".to_string()))
}

pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: WireData,
}

#[derive(Debug, Default, Deserialize)]
struct WireData {
    id: Option<String>,
    upload_id: Option<String>,
    #[serde(default)]
    playback_ids: Vec<WirePlaybackId>,
    duration: Option<f64>,
    aspect_ratio: Option<String>,
    #[serde(default)]
    errors: WireErrors,
}

#[derive(Debug, Deserialize)]
struct WirePlaybackId {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireErrors {
    #[serde(default)]
    messages: Vec<String>,
}

pub fn parse_event(payload: &[u8], now: DateTime<Utc>) -> PlatformResult<WebhookEvent> {
    let raw: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|err| PlatformError::InvalidPayload(err.to_string()))?;
    let wire: WirePayload = serde_json::from_value(raw.clone())
        .map_err(|err| PlatformError::InvalidPayload(err.to_string()))?;
    Ok(WebhookEvent {
        event_id: wire.id,
        event_type: wire.event_type,
        asset_id: wire.data.id,
        upload_id: wire.data.upload_id,
        playback_id: wire.data.playback_ids.first().map(|p| p.id.clone()),
        duration_seconds: wire.data.duration,
        aspect_ratio: wire.data.aspect_ratio,
        error_message: wire.data.errors.messages.first().cloned(),
        received_at: now,
        raw,
    })
}

pub fn interpret_event(event: &WebhookEvent) -> WebhookAction {
    match event.event_type.as_str() {
        "video.upload.asset_created" => match (&event.upload_id, &event.asset_id) {
            (Some(upload_id), Some(asset_id)) => WebhookAction::UploadCompleted {
                upload_id: upload_id.clone(),
                asset_id: asset_id.clone(),
            },
            _ => WebhookAction::Unknown {
                event_type: event.event_type.clone(),
            },
        },
        "video.asset.ready" => match &event.asset_id {
            Some(asset_id) => WebhookAction::AssetReady {
                asset_id: asset_id.clone(),
                playback_id: event.playback_id.clone(),
                duration_seconds: event.duration_seconds,
                aspect_ratio: event.aspect_ratio.clone(),
            },
            None => WebhookAction::Unknown {
                event_type: event.event_type.clone(),
            },
        },
        "video.asset.errored" => match &event.asset_id {
            Some(asset_id) => WebhookAction::AssetErrored {
                asset_id: asset_id.clone(),
                message: event
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "asset errored without detail".to_string()),
            },
            None => WebhookAction::Unknown {
                event_type: event.event_type.clone(),
            },
        },
        "video.live_stream.connected" => WebhookAction::StreamConnected,
        "video.asset.live_stream_completed" => match &event.asset_id {
            Some(asset_id) => WebhookAction::RecordingReady {
                asset_id: asset_id.clone(),
            },
            None => WebhookAction::Unknown {
                event_type: event.event_type.clone(),
            },
        },
        other => WebhookAction::Unknown {
            event_type: other.to_string(),
        },
    }
}
