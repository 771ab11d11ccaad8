//! Artifact export
//!
//! Writes the fused transcript as structured JSON and as a subtitle file,
//! and parses subtitle cues back (used to verify the export round-trips).

use crate::merge::types::{ExportError, MergedTranscription, SpeakerStatistics};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// A parsed subtitle cue.
#[derive(Debug, Clone, PartialEq)]
pub struct SrtCue {
    pub index: usize,
    pub start: f32,
    pub end: f32,
    pub speaker_id: String,
    pub text: String,
}

/// `HH:MM:SS,mmm` with millisecond precision.
pub fn format_timestamp(seconds: f32) -> String {
    let total_ms = (seconds.max(0.0) as f64 * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse `HH:MM:SS,mmm` back into seconds.
pub fn parse_timestamp(value: &str) -> Option<f32> {
    let (clock, millis) = value.split_once(',')?;
    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let secs: u64 = parts.next()?.parse().ok()?;
    let millis: u64 = millis.parse().ok()?;
    let total_ms = ((hours * 60 + minutes) * 60 + secs) * 1000 + millis;
    Some(total_ms as f32 / 1000.0)
}

/// Render the transcription as subtitle cues.
pub fn to_srt(transcription: &MergedTranscription) -> String {
    let mut output = String::new();
    for (i, segment) in transcription.segments.iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_timestamp(segment.start_time),
            format_timestamp(segment.end_time)
        ));
        output.push_str(&format!("[{}] {}\n\n", segment.speaker_id, segment.text));
    }
    output
}

/// Parse subtitle text back into cues. Malformed blocks are skipped.
pub fn parse_srt(content: &str) -> Vec<SrtCue> {
    let mut cues = Vec::new();

    for block in content.split("\n\n") {
        let lines: Vec<&str> = block.lines().collect();
        if lines.len() < 3 {
            continue;
        }
        let Ok(index) = lines[0].trim().parse::<usize>() else {
            continue;
        };
        let Some((start_raw, end_raw)) = lines[1].split_once(" --> ") else {
            continue;
        };
        let (Some(start), Some(end)) = (
            parse_timestamp(start_raw.trim()),
            parse_timestamp(end_raw.trim()),
        ) else {
            continue;
        };

        let body = lines[2..].join("\n");
        let (speaker_id, text) = match body.strip_prefix('[').and_then(|r| r.split_once("] ")) {
            Some((speaker, text)) => (speaker.to_string(), text.to_string()),
            None => (String::new(), body),
        };

        cues.push(SrtCue {
            index,
            start,
            end,
            speaker_id,
            text,
        });
    }

    cues
}

/// Write `transcription.srt`.
pub fn export_srt(transcription: &MergedTranscription, path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ExportError::WriteFailed {
            message: e.to_string(),
        })?;
    }
    std::fs::write(path, to_srt(transcription)).map_err(|e| ExportError::WriteFailed {
        message: e.to_string(),
    })?;
    info!("Exported subtitles to {}", path.display());
    Ok(())
}

/// Write `final_transcription.json`.
pub fn save_transcription(
    transcription: &MergedTranscription,
    path: &Path,
) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(transcription).map_err(|e| {
        ExportError::SerializeFailed {
            message: e.to_string(),
        }
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ExportError::WriteFailed {
            message: e.to_string(),
        })?;
    }
    std::fs::write(path, json).map_err(|e| ExportError::WriteFailed {
        message: e.to_string(),
    })?;
    info!("Saved transcription to {}", path.display());
    Ok(())
}

/// Aggregate per-speaker statistics over the final timeline.
pub fn speaker_statistics(
    transcription: &MergedTranscription,
) -> BTreeMap<String, SpeakerStatistics> {
    let mut stats: BTreeMap<String, SpeakerStatistics> = BTreeMap::new();

    for segment in &transcription.segments {
        let entry = stats.entry(segment.speaker_id.clone()).or_default();
        entry.total_segments += 1;
        entry.total_duration += segment.duration();
        entry.total_words += segment.text.split_whitespace().count();
        entry.avg_confidence += segment.confidence;
    }

    for entry in stats.values_mut() {
        if entry.total_segments > 0 {
            entry.avg_confidence /= entry.total_segments as f32;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::types::{MergedSegment, ProcessingStats};

    fn transcription() -> MergedTranscription {
        MergedTranscription {
            file_path: "audio.wav".to_string(),
            total_duration: 12.0,
            language: "en".to_string(),
            speakers: vec!["speaker_00".to_string(), "speaker_01".to_string()],
            segments: vec![
                MergedSegment {
                    speaker_id: "speaker_00".to_string(),
                    start_time: 0.25,
                    end_time: 5.5,
                    text: "Hello there".to_string(),
                    confidence: 0.9,
                    chunk_id: "job_chunk_0000".to_string(),
                    segment_index: 0,
                    is_overlap: false,
                    overlap_speakers: vec![],
                },
                MergedSegment {
                    speaker_id: "speaker_01".to_string(),
                    start_time: 6.0,
                    end_time: 12.0,
                    text: "General Kenobi".to_string(),
                    confidence: 0.8,
                    chunk_id: "job_chunk_0000".to_string(),
                    segment_index: 1,
                    is_overlap: false,
                    overlap_speakers: vec![],
                },
            ],
            processing_stats: ProcessingStats::default(),
        }
    }

    #[test]
    fn timestamp_format_uses_comma_milliseconds() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(5.25), "00:00:05,250");
        assert_eq!(format_timestamp(3661.5), "01:01:01,500");
    }

    #[test]
    fn srt_round_trips_to_millisecond_precision() {
        let transcription = transcription();
        let srt = to_srt(&transcription);
        let cues = parse_srt(&srt);

        assert_eq!(cues.len(), transcription.segments.len());
        for (cue, segment) in cues.iter().zip(transcription.segments.iter()) {
            assert!((cue.start - segment.start_time).abs() < 0.001);
            assert!((cue.end - segment.end_time).abs() < 0.001);
            assert_eq!(cue.speaker_id, segment.speaker_id);
            assert_eq!(cue.text, segment.text);
        }
    }

    #[test]
    fn cue_numbering_starts_at_one() {
        let srt = to_srt(&transcription());
        assert!(srt.starts_with("1\n"));
        let cues = parse_srt(&srt);
        assert_eq!(cues[0].index, 1);
        assert_eq!(cues[1].index, 2);
    }

    #[test]
    fn speaker_statistics_aggregate() {
        let stats = speaker_statistics(&transcription());
        assert_eq!(stats.len(), 2);
        let first = &stats["speaker_00"];
        assert_eq!(first.total_segments, 1);
        assert_eq!(first.total_words, 2);
        assert!((first.total_duration - 5.25).abs() < 1e-5);
    }
}
