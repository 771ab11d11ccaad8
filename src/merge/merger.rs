//! Timeline fusion
//!
//! Combines per-chunk recognizer sub-segments with globally-mapped
//! speaker turns into one ordered, speaker-attributed timeline. Chunks
//! with a failed stage contribute nothing; the merger works with whatever
//! succeeded.

use crate::asr::types::{SubSegment, TranscribedChunk};
use crate::diarization::types::{DiarizedChunk, SpeakerTurn};
use crate::merge::text::clean_text;
use crate::merge::types::{
    MergedSegment, MergedTranscription, MergerConfig, ProcessingStats, UNKNOWN_SPEAKER,
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// Working representation before index assignment.
#[derive(Debug, Clone)]
struct Candidate {
    speaker_id: String,
    start: f32,
    end: f32,
    text: String,
    confidence: f32,
    chunk_id: String,
    is_overlap: bool,
    overlap_speakers: Vec<String>,
}

/// Fuses transcriber and diarizer outputs into a `MergedTranscription`.
pub struct TranscriptionMerger {
    config: MergerConfig,
}

impl TranscriptionMerger {
    pub fn new(config: MergerConfig) -> Self {
        Self { config }
    }

    /// Merge all per-chunk results for one job.
    ///
    /// Deterministic: identical inputs produce an identical timeline,
    /// byte-for-byte after serialization.
    pub fn merge(
        &self,
        transcriptions: &[TranscribedChunk],
        diarizations: &[DiarizedChunk],
        file_path: &str,
    ) -> MergedTranscription {
        let started = Instant::now();

        let mut transcriptions: Vec<&TranscribedChunk> = transcriptions.iter().collect();
        transcriptions.sort_by_key(|t| t.chunk_index);

        let turns_by_chunk: HashMap<&str, &DiarizedChunk> = diarizations
            .iter()
            .map(|d| (d.chunk_id.as_str(), d))
            .collect();

        let mut dropped = 0usize;
        let mut candidates: Vec<Candidate> = Vec::new();

        for transcription in &transcriptions {
            let Some(diarization) = turns_by_chunk.get(transcription.chunk_id.as_str()) else {
                debug!(
                    "Chunk {} missing diarization output, skipping",
                    transcription.chunk_id
                );
                continue;
            };

            for sub in Self::sub_segments(transcription) {
                let global_start = transcription.start_time + sub.start;
                let global_end = transcription.start_time + sub.end;
                let (speaker_id, confidence) =
                    self.assign_speaker(global_start, global_end, &diarization.turns);

                let cleaned = clean_text(&sub.text);
                let duration = global_end - global_start;
                if cleaned.is_empty()
                    || duration < self.config.min_segment_duration
                    || confidence < self.config.confidence_threshold
                {
                    dropped += 1;
                    continue;
                }

                candidates.push(Candidate {
                    speaker_id,
                    start: global_start,
                    end: global_end,
                    text: cleaned,
                    confidence,
                    chunk_id: transcription.chunk_id.clone(),
                    is_overlap: false,
                    overlap_speakers: Vec::new(),
                });
            }
        }

        candidates.sort_by(|a, b| {
            a.start
                .partial_cmp(&b.start)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        let merged = self.merge_adjacent(candidates);
        let resolved = self.resolve_overlaps(merged);

        let mut segments: Vec<MergedSegment> = Vec::with_capacity(resolved.len());
        let mut speakers: Vec<String> = Vec::new();
        for (index, candidate) in resolved.into_iter().enumerate() {
            if !speakers.contains(&candidate.speaker_id) {
                speakers.push(candidate.speaker_id.clone());
            }
            segments.push(MergedSegment {
                speaker_id: candidate.speaker_id,
                start_time: candidate.start,
                end_time: candidate.end,
                text: candidate.text,
                confidence: candidate.confidence,
                chunk_id: candidate.chunk_id,
                segment_index: index,
                is_overlap: candidate.is_overlap,
                overlap_speakers: candidate.overlap_speakers,
            });
        }
        speakers.sort();

        let total_duration = segments.last().map(|s| s.end_time).unwrap_or(0.0);
        let language = Self::dominant_language(&transcriptions);
        let stats = ProcessingStats {
            total_segments_merged: segments.len(),
            overlap_segments: segments.iter().filter(|s| s.is_overlap).count(),
            dropped_segments: dropped,
            processing_time: started.elapsed().as_secs_f32(),
        };

        info!(
            "Merged {} segments across {} speakers ({:.2}s of audio)",
            segments.len(),
            speakers.len(),
            total_duration
        );

        MergedTranscription {
            file_path: file_path.to_string(),
            total_duration,
            language,
            speakers,
            segments,
            processing_stats: stats,
        }
    }

    /// Most frequent detected language; lexicographic tie-break keeps the
    /// result deterministic.
    fn dominant_language(transcriptions: &[&TranscribedChunk]) -> String {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for transcription in transcriptions {
            if transcription.language != "unknown" && !transcription.language.is_empty() {
                *counts.entry(transcription.language.as_str()).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(language, _)| language.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Recognizer sub-segments, synthesizing a whole-chunk one when the
    /// recognizer returned text without timings.
    fn sub_segments(transcription: &TranscribedChunk) -> Vec<SubSegment> {
        if !transcription.segments.is_empty() {
            return transcription.segments.clone();
        }
        if transcription.text.trim().is_empty() {
            return Vec::new();
        }
        vec![SubSegment {
            start: 0.0,
            end: transcription.end_time - transcription.start_time,
            text: transcription.text.clone(),
        }]
    }

    /// Speaker of the turn with the greatest overlap ratio, provided the
    /// overlap covers at least `min_overlap_ratio` of the sub-segment.
    fn assign_speaker(&self, start: f32, end: f32, turns: &[SpeakerTurn]) -> (String, f32) {
        let duration = end - start;
        if duration <= 0.0 {
            return (UNKNOWN_SPEAKER.to_string(), 0.0);
        }

        let mut best: Option<(&SpeakerTurn, f32)> = None;
        for turn in turns {
            let overlap = (end.min(turn.end) - start.max(turn.start)).max(0.0);
            let ratio = overlap / duration;
            if ratio > best.map(|(_, r)| r).unwrap_or(0.0) {
                best = Some((turn, ratio));
            }
        }

        match best {
            Some((turn, ratio)) if ratio >= self.config.min_overlap_ratio => {
                (turn.speaker_id.clone(), turn.confidence)
            }
            _ => (UNKNOWN_SPEAKER.to_string(), 0.0),
        }
    }

    /// Merge adjacent same-speaker segments separated by a small gap.
    fn merge_adjacent(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match merged.last_mut() {
                Some(last)
                    if last.speaker_id == candidate.speaker_id
                        && candidate.start - last.end <= self.config.max_gap_between_segments =>
                {
                    last.end = last.end.max(candidate.end);
                    last.text.push(' ');
                    last.text.push_str(&candidate.text);
                    last.confidence = (last.confidence + candidate.confidence) / 2.0;
                }
                _ => merged.push(candidate),
            }
        }

        merged
    }

    /// Resolve residual overlaps between different speakers.
    ///
    /// A large overlap marks both segments and splits them at the
    /// midpoint; a small one shifts the later segment forward.
    fn resolve_overlaps(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut resolved: Vec<Candidate> = Vec::with_capacity(candidates.len());

        for mut candidate in candidates.drain(..) {
            if let Some(previous) = resolved.last_mut() {
                let overlap = previous.end - candidate.start;
                if overlap > 0.0 {
                    if overlap > self.config.overlap_threshold {
                        let midpoint = (previous.end + candidate.start) / 2.0;
                        previous.is_overlap = true;
                        candidate.is_overlap = true;
                        if !previous.overlap_speakers.contains(&candidate.speaker_id) {
                            previous.overlap_speakers.push(candidate.speaker_id.clone());
                        }
                        if !candidate.overlap_speakers.contains(&previous.speaker_id) {
                            candidate.overlap_speakers.push(previous.speaker_id.clone());
                        }
                        previous.end = midpoint;
                        candidate.start = midpoint;
                    } else {
                        candidate.start = previous.end;
                    }
                }
            }
            if candidate.end > candidate.start {
                resolved.push(candidate);
            }
        }

        resolved
    }
}

impl Default for TranscriptionMerger {
    fn default() -> Self {
        Self::new(MergerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcribed(
        chunk_index: usize,
        start: f32,
        end: f32,
        segments: Vec<(f32, f32, &str)>,
    ) -> TranscribedChunk {
        TranscribedChunk {
            chunk_id: format!("job_chunk_{:04}", chunk_index),
            chunk_index,
            start_time: start,
            end_time: end,
            text: segments.iter().map(|s| s.2).collect::<Vec<_>>().join(" "),
            language: "en".to_string(),
            confidence: -0.2,
            segments: segments
                .into_iter()
                .map(|(s, e, t)| SubSegment {
                    start: s,
                    end: e,
                    text: t.to_string(),
                })
                .collect(),
            processing_time: 0.1,
            error: None,
        }
    }

    fn diarized(
        chunk_index: usize,
        start: f32,
        end: f32,
        turns: Vec<(&str, f32, f32)>,
    ) -> DiarizedChunk {
        let mut speakers: Vec<String> = turns.iter().map(|t| t.0.to_string()).collect();
        speakers.sort();
        speakers.dedup();
        DiarizedChunk {
            chunk_id: format!("job_chunk_{:04}", chunk_index),
            chunk_index,
            start_time: start,
            end_time: end,
            speakers,
            turns: turns
                .into_iter()
                .map(|(id, s, e)| SpeakerTurn {
                    speaker_id: id.to_string(),
                    start: s,
                    end: e,
                    confidence: 0.9,
                })
                .collect(),
            processing_time: 0.1,
            error: None,
        }
    }

    #[test]
    fn assigns_speaker_with_best_overlap() {
        let merger = TranscriptionMerger::default();
        let transcriptions =
            vec![transcribed(0, 0.0, 10.0, vec![(0.0, 4.0, "hello there everyone")])];
        let diarizations = vec![diarized(
            0,
            0.0,
            10.0,
            vec![("speaker_00", 0.0, 5.0), ("speaker_01", 5.0, 10.0)],
        )];

        let result = merger.merge(&transcriptions, &diarizations, "audio.wav");
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].speaker_id, "speaker_00");
        assert_eq!(result.speakers, vec!["speaker_00".to_string()]);
    }

    #[test]
    fn merges_adjacent_same_speaker_segments() {
        let merger = TranscriptionMerger::default();
        let transcriptions = vec![transcribed(
            0,
            0.0,
            30.0,
            vec![(0.0, 4.0, "first part"), (5.0, 9.0, "second part")],
        )];
        let diarizations = vec![diarized(0, 0.0, 30.0, vec![("speaker_00", 0.0, 30.0)])];

        let result = merger.merge(&transcriptions, &diarizations, "audio.wav");
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].text, "First part Second part");
        assert!((result.segments[0].end_time - 9.0).abs() < 1e-5);
    }

    #[test]
    fn distant_segments_stay_separate() {
        let merger = TranscriptionMerger::default();
        let transcriptions = vec![transcribed(
            0,
            0.0,
            30.0,
            vec![(0.0, 4.0, "first part"), (10.0, 14.0, "second part")],
        )];
        let diarizations = vec![diarized(0, 0.0, 30.0, vec![("speaker_00", 0.0, 30.0)])];

        let result = merger.merge(&transcriptions, &diarizations, "audio.wav");
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].segment_index, 1);
    }

    #[test]
    fn unclaimed_text_is_dropped_by_confidence_filter() {
        let merger = TranscriptionMerger::default();
        let transcriptions =
            vec![transcribed(0, 0.0, 10.0, vec![(0.0, 2.0, "orphaned words")])];
        // Diarizer only covers the tail of the chunk.
        let diarizations = vec![diarized(0, 0.0, 10.0, vec![("speaker_00", 8.0, 10.0)])];

        let result = merger.merge(&transcriptions, &diarizations, "audio.wav");
        assert!(result.segments.is_empty());
        assert_eq!(result.processing_stats.dropped_segments, 1);
    }

    #[test]
    fn large_overlap_splits_at_midpoint() {
        let merger = TranscriptionMerger::default();
        let transcriptions = vec![transcribed(
            0,
            0.0,
            30.0,
            vec![(0.0, 6.0, "speaker one talking"), (4.0, 10.0, "speaker two talking")],
        )];
        let diarizations = vec![diarized(
            0,
            0.0,
            30.0,
            vec![("speaker_00", 0.0, 6.0), ("speaker_01", 4.0, 10.0)],
        )];

        let result = merger.merge(&transcriptions, &diarizations, "audio.wav");
        assert_eq!(result.segments.len(), 2);
        assert!(result.segments[0].is_overlap);
        assert!(result.segments[1].is_overlap);
        assert!((result.segments[0].end_time - 5.0).abs() < 1e-5);
        assert!((result.segments[1].start_time - 5.0).abs() < 1e-5);
        assert_eq!(
            result.segments[0].overlap_speakers,
            vec!["speaker_01".to_string()]
        );
    }

    #[test]
    fn small_overlap_shifts_later_segment() {
        let merger = TranscriptionMerger::default();
        let transcriptions = vec![transcribed(
            0,
            0.0,
            30.0,
            vec![(0.0, 5.2, "speaker one talking"), (5.0, 10.0, "speaker two talking")],
        )];
        let diarizations = vec![diarized(
            0,
            0.0,
            30.0,
            vec![("speaker_00", 0.0, 5.2), ("speaker_01", 5.0, 10.0)],
        )];

        let result = merger.merge(&transcriptions, &diarizations, "audio.wav");
        assert_eq!(result.segments.len(), 2);
        assert!(!result.segments[0].is_overlap);
        assert!((result.segments[1].start_time - 5.2).abs() < 1e-5);
    }

    #[test]
    fn merge_is_deterministic() {
        let merger = TranscriptionMerger::default();
        let transcriptions = vec![
            transcribed(0, 0.0, 30.0, vec![(0.0, 4.0, "alpha"), (6.0, 12.0, "beta")]),
            transcribed(1, 25.0, 55.0, vec![(1.0, 6.0, "gamma")]),
        ];
        let diarizations = vec![
            diarized(0, 0.0, 30.0, vec![("speaker_00", 0.0, 30.0)]),
            diarized(1, 25.0, 55.0, vec![("speaker_01", 25.0, 55.0)]),
        ];

        let a = merger.merge(&transcriptions, &diarizations, "audio.wav");
        let b = merger.merge(&transcriptions, &diarizations, "audio.wav");
        assert_eq!(
            serde_json::to_string(&a.segments).unwrap(),
            serde_json::to_string(&b.segments).unwrap()
        );
    }

    #[test]
    fn empty_inputs_produce_empty_transcription() {
        let merger = TranscriptionMerger::default();
        let result = merger.merge(&[], &[], "audio.wav");
        assert!(result.segments.is_empty());
        assert_eq!(result.total_duration, 0.0);
    }
}
