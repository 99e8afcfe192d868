use super::{TranscribeResult, TranscriptionSegment};

pub fn to_srt(segments: &[TranscriptionSegment]) -> String {
    let mut out = String::new();
    for (index, segment) in segments.iter().enumerate() {
        out.push_str(&format!("{}\n", index + 1));
        out.push_str(&format!(
            "{} --> {}\n",
            format_timestamp(segment.start, ','),
            format_timestamp(segment.end, ',')
        ));
        out.push_str(&segment.text);
        out.push_str("\n\n");
    }
    out
}

pub fn to_vtt(segments: &[TranscriptionSegment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in segments {
        out.push_str(&format!(
            "{} --> {}\n",
            format_timestamp(segment.start, '.'),
            format_timestamp(segment.end, '.')
        ));
        if let Some(speaker) = &segment.speaker {
            out.push_str(&format!("<v {speaker}>{}\n\n", segment.text));
        } else {
            out.push_str(&segment.text);
            out.push_str("\n\n");
        }
    }
    out
}

pub fn to_json(segments: &[TranscriptionSegment]) -> TranscribeResult<String> {
    Ok(serde_json::to_string_pretty(segments)?)
}

fn format_timestamp(seconds: f64, millis_separator: char) -> String {
    let total_millis = (seconds * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}{millis_separator}{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<TranscriptionSegment> {
        vec![
            TranscriptionSegment {
                start: 0.0,
                end: 1.5,
                text: "hello there".to_string(),
                confidence: 0.92,
                speaker: Some("A".to_string()),
                keywords: vec![],
            },
            TranscriptionSegment {
                start: 2.0,
                end: 3.25,
                text: "general".to_string(),
                confidence: 0.88,
                speaker: None,
                keywords: vec!["general".to_string()],
            },
        ]
    }

    #[test]
    fn srt_uses_comma_millis_and_indices() {
        let srt = to_srt(&sample());
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nhello there\n"));
        assert!(srt.contains("2\n00:00:02,000 --> 00:00:03,250\ngeneral\n"));
    }

    #[test]
    fn vtt_has_header_and_speaker_tags() {
        let vtt = to_vtt(&sample());
        assert!(vtt.starts_with("WEBVTT\n"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:01.500\n<v A>hello there"));
    }
}
