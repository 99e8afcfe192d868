use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use studio_core::config::{EncoderSection, TranscriptionSection};
use studio_core::{
    normalize_segments, BackoffPolicy, CancelFlag, EncoderEngine, ProviderSegment,
    ProviderTranscript, SpeechToText, TranscribeError, TranscribeResult, Transcriber,
};
use tempfile::TempDir;

struct FakeSpeech {
    calls: AtomicUsize,
    fail_first: usize,
    segments: Vec<ProviderSegment>,
}

impl FakeSpeech {
    fn new(fail_first: usize, segments: Vec<ProviderSegment>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first,
            segments,
        }
    }
}

#[async_trait]
impl SpeechToText for FakeSpeech {
    async fn transcribe(
        &self,
        audio_path: &Path,
        _language: &str,
    ) -> TranscribeResult<ProviderTranscript> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(TranscribeError::Provider {
                status: Some(503),
                message: "overloaded".to_string(),
            });
        }
        assert!(audio_path.exists(), "audio must exist while submitting");
        Ok(ProviderTranscript {
            segments: self.segments.clone(),
        })
    }
}

fn segment(start: f64, end: f64, text: &str, speaker: Option<&str>) -> ProviderSegment {
    ProviderSegment {
        start,
        end,
        text: text.to_string(),
        confidence: Some(0.9),
        speaker: speaker.map(str::to_string),
        keywords: vec![],
    }
}

struct Harness {
    _temp: TempDir,
    engine: Arc<EncoderEngine>,
    output: PathBuf,
    input: PathBuf,
    config: TranscriptionSection,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let scratch = temp.path().join("scratch");
        let output = temp.path().join("output");
        fs::create_dir_all(&scratch).unwrap();
        fs::create_dir_all(&output).unwrap();

        // ffmpeg stand-in that writes a wav wherever it is told to.
        let ffmpeg = temp.path().join("ffmpeg");
        fs::write(
            &ffmpeg,
            "#!/bin/sh\nfor last; do :; done\nhead -c 256 /dev/zero > \"$last\"\n",
        )
        .unwrap();
        let mut perms = fs::metadata(&ffmpeg).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&ffmpeg, perms).unwrap();

        let input = temp.path().join("clip.mp4");
        fs::write(&input, vec![1u8; 512]).unwrap();

        let engine = Arc::new(
            EncoderEngine::new(
                EncoderSection {
                    ffmpeg_path: ffmpeg.display().to_string(),
                    ffprobe_path: "/usr/bin/ffprobe".to_string(),
                    timeout_seconds: 10,
                    audio_codec: "pcm_s16le".to_string(),
                    thumbnail_format: "png".to_string(),
                },
                &scratch,
                &output,
            )
            .unwrap(),
        );
        let config = TranscriptionSection {
            endpoint: "https://speech.test/v1".to_string(),
            api_key: "key".to_string(),
            default_language: "en".to_string(),
            merge_gap_ms: 300,
        };
        Self {
            _temp: temp,
            engine,
            output,
            input,
            config,
        }
    }

    fn transcriber(&self, provider: Arc<dyn SpeechToText>) -> Transcriber {
        Transcriber::new(
            Arc::clone(&self.engine),
            provider,
            &self.config,
            BackoffPolicy::new(3, Duration::ZERO, Duration::ZERO),
        )
    }
}

#[tokio::test]
async fn segments_are_ordered_merged_and_cleaned_up() {
    let harness = Harness::new();
    let provider = Arc::new(FakeSpeech::new(
        0,
        vec![
            // Out of order, same speaker, gap below 300ms: should merge.
            segment(2.1, 3.0, "world", Some("A")),
            segment(0.0, 2.0, "hello", Some("A")),
            segment(5.0, 6.0, "later", Some("B")),
            segment(4.0, 4.5, "   ", Some("B")),
        ],
    ));
    let transcriber = harness.transcriber(provider);
    let cancel = CancelFlag::new();

    let segments = transcriber
        .transcribe(&harness.input, None, &cancel)
        .await
        .unwrap();

    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].text, "hello world");
    assert_eq!(segments[0].start, 0.0);
    assert_eq!(segments[0].end, 3.0);
    assert_eq!(segments[1].text, "later");

    // The extracted audio intermediate is removed after submission.
    assert!(!harness.output.join("clip_audio.wav").exists());
}

#[tokio::test]
async fn transient_provider_errors_retry_then_succeed() {
    let harness = Harness::new();
    let provider = Arc::new(FakeSpeech::new(2, vec![segment(0.0, 1.0, "ok", None)]));
    let transcriber = harness.transcriber(Arc::clone(&provider) as Arc<dyn SpeechToText>);
    let cancel = CancelFlag::new();

    let segments = transcriber
        .transcribe(&harness.input, Some("pt"), &cancel)
        .await
        .unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn attempts_exhausted_surfaces_provider_error() {
    let harness = Harness::new();
    let provider = Arc::new(FakeSpeech::new(10, vec![]));
    let transcriber = harness.transcriber(Arc::clone(&provider) as Arc<dyn SpeechToText>);
    let cancel = CancelFlag::new();

    let err = transcriber
        .transcribe(&harness.input, None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, TranscribeError::Provider { .. }));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn broken_timing_rejects_whole_transcript() {
    let harness = Harness::new();
    let provider = Arc::new(FakeSpeech::new(
        0,
        vec![
            segment(0.0, 1.0, "fine", None),
            segment(3.0, 2.0, "ends before start", None),
        ],
    ));
    let transcriber = harness.transcriber(provider);
    let cancel = CancelFlag::new();

    let err = transcriber
        .transcribe(&harness.input, None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, TranscribeError::InvalidTranscript(_)));
    assert!(!err.kind().retryable());
}

#[test]
fn confidence_is_clamped_into_unit_range() {
    let raw = vec![
        ProviderSegment {
            confidence: Some(1.7),
            ..segment(0.0, 1.0, "loud", None)
        },
        ProviderSegment {
            confidence: Some(-0.2),
            ..segment(2.0, 3.0, "quiet", None)
        },
        ProviderSegment {
            confidence: None,
            ..segment(4.0, 5.0, "unknown", None)
        },
    ];
    let segments = normalize_segments(raw, 0.1).unwrap();
    assert_eq!(segments[0].confidence, 1.0);
    assert_eq!(segments[1].confidence, 0.0);
    assert_eq!(segments[2].confidence, 0.0);
}

#[test]
fn overlapping_distinct_speakers_are_clamped() {
    let raw = vec![
        segment(0.0, 2.0, "first", Some("A")),
        segment(1.5, 3.0, "second", Some("B")),
    ];
    let segments = normalize_segments(raw, 0.1).unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[1].start, 2.0);
    assert_eq!(segments[1].end, 3.0);

    // A segment swallowed whole by its predecessor is irreparable.
    let raw = vec![
        segment(0.0, 5.0, "outer", Some("A")),
        segment(1.0, 2.0, "inner", Some("B")),
    ];
    assert!(matches!(
        normalize_segments(raw, 0.1),
        Err(TranscribeError::InvalidTranscript(_))
    ));
}
