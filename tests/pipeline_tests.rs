//! End-to-end pipeline scenarios
//!
//! Each test runs the full engine (real loader, chunker, stages, merger,
//! orchestrator) against synthetic WAV files, with scripted recognizer
//! and diarizer engines behind the external contracts.

mod common;

use batchscribe::audio::loader::WavLoader;
use batchscribe::merge::export;
use batchscribe::merge::types::MergedTranscription;
use batchscribe::orchestrator::types::JobState;
use batchscribe::{JobPriority, Orchestrator};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn read_final(output_dir: &std::path::Path) -> MergedTranscription {
    let json = std::fs::read_to_string(output_dir.join("final_transcription.json"))
        .expect("final_transcription.json present");
    serde_json::from_str(&json).expect("valid transcription json")
}

fn chunk_count(output_dir: &std::path::Path) -> usize {
    let json = std::fs::read_to_string(output_dir.join("chunks_metadata.json"))
        .expect("chunks_metadata.json present");
    let metadata: serde_json::Value = serde_json::from_str(&json).expect("valid metadata json");
    metadata["total_chunks"].as_u64().expect("total_chunks") as usize
}

/// S1: short single-speaker audio with a silence at t=6; the cut snaps to
/// the silence and the merger emits one segment for one speaker.
#[tokio::test]
async fn single_speaker_with_silence_snap() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("meeting.wav");
    let output = dir.path().join("out");

    let mut samples = tone(SPEAKER_A_HZ, 6.0, 0.5);
    samples.extend(silence(2.0));
    samples.extend(tone(SPEAKER_A_HZ, 4.0, 0.5));
    write_wav(&input, &samples);

    let mut config = test_config();
    config.chunker.chunk_duration = 10.0;
    config.chunker.overlap_duration = 2.0;

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(WavLoader::new()),
        Arc::new(ScriptedTranscriber::whole_chunk("hello from the meeting")),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let job_id = orchestrator
        .submit(&input, &output, JobPriority::Normal)
        .unwrap();
    let status = orchestrator.wait_for(job_id).await.unwrap();
    assert_eq!(status.state, JobState::Completed, "error: {:?}", status.error);

    assert_eq!(chunk_count(&output), 2);

    let transcription = read_final(&output);
    assert_eq!(transcription.segments.len(), 1);
    assert_eq!(transcription.speakers, vec!["speaker_00".to_string()]);
    assert!((transcription.total_duration - 12.0).abs() < 0.5);
    assert_eq!(transcription.language, "en");
}

/// S2: 90s two-speaker interview alternating every 30s; two stable global
/// ids, each with at least one segment, timeline ordered and bounded.
#[tokio::test]
async fn two_speaker_interview() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("interview.wav");
    let output = dir.path().join("out");

    let mut samples = tone(SPEAKER_A_HZ, 30.0, 0.5);
    samples.extend(tone(SPEAKER_B_HZ, 30.0, 0.5));
    samples.extend(tone(SPEAKER_A_HZ, 30.0, 0.5));
    write_wav(&input, &samples);

    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::new(WavLoader::new()),
        Arc::new(ScriptedTranscriber::windows("some interview words", 5.0)),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let job_id = orchestrator
        .submit(&input, &output, JobPriority::Normal)
        .unwrap();
    let status = orchestrator.wait_for(job_id).await.unwrap();
    assert_eq!(status.state, JobState::Completed, "error: {:?}", status.error);

    assert!(chunk_count(&output) >= 3);

    let transcription = read_final(&output);
    assert_eq!(transcription.speakers.len(), 2);
    for speaker in &transcription.speakers {
        assert!(
            transcription
                .segments
                .iter()
                .any(|s| &s.speaker_id == speaker),
            "speaker {} has no segments",
            speaker
        );
    }

    // Ordered timeline, every segment within [0, duration + 2s].
    for window in transcription.segments.windows(2) {
        assert!(window[0].start_time <= window[1].start_time);
    }
    for segment in &transcription.segments {
        assert!(segment.start_time >= 0.0);
        assert!(segment.end_time <= 90.0 + 2.0);
        assert!(!segment.text.is_empty());
    }
}

/// S3: with one concurrency slot, the High-priority job starts before the
/// Normal one submitted earlier; both complete.
#[tokio::test]
async fn priority_order_with_single_slot() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("audio.wav");
    write_wav(&input, &tone(SPEAKER_A_HZ, 5.0, 0.5));

    let mut config = test_config();
    config.limits.max_concurrent_jobs = 1;

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(WavLoader::new()),
        Arc::new(ScriptedTranscriber::whole_chunk("queued speech")),
        Arc::new(ToneDiarizer),
    );

    // Submit both before dispatch starts so ordering is purely priority.
    let normal = orchestrator
        .submit(&input, &dir.path().join("normal"), JobPriority::Normal)
        .unwrap();
    let high = orchestrator
        .submit(&input, &dir.path().join("high"), JobPriority::High)
        .unwrap();
    orchestrator.start();

    let normal_status = orchestrator.wait_for(normal).await.unwrap();
    let high_status = orchestrator.wait_for(high).await.unwrap();

    assert_eq!(high_status.state, JobState::Completed);
    assert_eq!(normal_status.state, JobState::Completed);
    assert!(
        high_status.started_at.unwrap() < normal_status.started_at.unwrap(),
        "high-priority job must start first"
    );
}

/// S4: a job whose estimate exceeds the memory ceiling is rejected
/// synchronously and leaves no job record.
#[tokio::test]
async fn oversized_job_rejected_at_submit() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("audio.wav");
    write_wav(&input, &tone(SPEAKER_A_HZ, 5.0, 0.5));

    let mut config = test_config();
    config.limits.max_memory_gb = 5.0; // below the ~6GB base estimate

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(WavLoader::new()),
        Arc::new(ScriptedTranscriber::whole_chunk("never runs")),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let result = orchestrator.submit(&input, &dir.path().join("out"), JobPriority::Normal);
    let error = result.expect_err("submission must fail");
    assert!(error.to_string().contains("insufficient capacity"));
    assert_eq!(orchestrator.governor().running_count(), 0);
}

/// S5: all-zero audio fails fast with "unusable audio"; no chunks are
/// written and the running count returns to zero.
#[tokio::test]
async fn zero_audio_fails_fast() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("zeros.wav");
    let output = dir.path().join("out");
    write_wav(&input, &silence(2.0));

    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::new(WavLoader::new()),
        Arc::new(ScriptedTranscriber::whole_chunk("never used")),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let job_id = orchestrator
        .submit(&input, &output, JobPriority::Normal)
        .unwrap();
    let status = orchestrator.wait_for(job_id).await.unwrap();

    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("unusable audio"));
    assert!(!output.join("chunks").exists());
    assert_eq!(orchestrator.governor().running_count(), 0);
}

/// S6: cancelling after chunking leaves partial artifacts on disk but no
/// final transcription.
#[tokio::test]
async fn cancel_mid_job_keeps_partial_artifacts() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("long.wav");
    let output = dir.path().join("out");
    write_wav(&input, &tone(SPEAKER_A_HZ, 35.0, 0.5));

    let mut config = test_config();
    config.transcriber.workers = 1;

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(WavLoader::new()),
        Arc::new(
            ScriptedTranscriber::whole_chunk("slow speech")
                .with_delay(Duration::from_millis(500)),
        ),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let job_id = orchestrator
        .submit(&input, &output, JobPriority::Normal)
        .unwrap();

    // Wait until the first chunk transcription lands, then cancel while
    // the rest are still in flight.
    loop {
        let status = orchestrator.status(job_id).unwrap();
        if status.progress.percent >= 40 || status.state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(orchestrator.cancel(job_id));

    let status = orchestrator.wait_for(job_id).await.unwrap();
    assert_eq!(status.state, JobState::Cancelled);

    let chunk_wavs = std::fs::read_dir(output.join("chunks"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert!(chunk_wavs > 0, "chunk files must remain on disk");
    assert!(
        output.join("whisper_results.json").exists(),
        "completed per-chunk outputs must remain on disk"
    );
    assert!(!output.join("final_transcription.json").exists());
}

/// Boundary: audio shorter than one window yields exactly one chunk
/// covering the whole file.
#[tokio::test]
async fn short_audio_single_chunk() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("short.wav");
    let output = dir.path().join("out");
    write_wav(&input, &tone(SPEAKER_A_HZ, 12.0, 0.5));

    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::new(WavLoader::new()),
        Arc::new(ScriptedTranscriber::whole_chunk("short audio")),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let job_id = orchestrator
        .submit(&input, &output, JobPriority::Normal)
        .unwrap();
    let status = orchestrator.wait_for(job_id).await.unwrap();

    assert_eq!(status.state, JobState::Completed);
    assert_eq!(chunk_count(&output), 1);
}

/// Boundary: all-silent (but non-zero) audio completes successfully with
/// an empty timeline.
#[tokio::test]
async fn silent_audio_completes_empty() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("quiet.wav");
    let output = dir.path().join("out");
    // Far below the -40dB silence threshold, but not literally zero.
    write_wav(&input, &tone(SPEAKER_A_HZ, 10.0, 0.0001));

    let transcriber = Arc::new(ScriptedTranscriber::whole_chunk("never spoken"));
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::new(WavLoader::new()),
        transcriber.clone(),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let job_id = orchestrator
        .submit(&input, &output, JobPriority::Normal)
        .unwrap();
    let status = orchestrator.wait_for(job_id).await.unwrap();

    assert_eq!(status.state, JobState::Completed, "error: {:?}", status.error);
    let transcription = read_final(&output);
    assert!(transcription.segments.is_empty());
    assert_eq!(transcriber.call_count(), 0, "silent chunks skip the recognizer");
}

/// S9: a recognizer that always fails exhausts retries and the job fails
/// with "no segments"; a second queued job is unaffected.
#[tokio::test]
async fn failing_recognizer_fails_one_job_not_the_engine() {
    let dir = tempdir().unwrap();
    let voiced = dir.path().join("voiced.wav");
    let quiet = dir.path().join("quiet.wav");
    write_wav(&voiced, &tone(SPEAKER_A_HZ, 5.0, 0.5));
    write_wav(&quiet, &tone(SPEAKER_A_HZ, 5.0, 0.0001));

    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::new(WavLoader::new()),
        Arc::new(FailingTranscriber),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let failing = orchestrator
        .submit(&voiced, &dir.path().join("fail_out"), JobPriority::Normal)
        .unwrap();
    let succeeding = orchestrator
        .submit(&quiet, &dir.path().join("ok_out"), JobPriority::Normal)
        .unwrap();

    let failing_status = orchestrator.wait_for(failing).await.unwrap();
    let succeeding_status = orchestrator.wait_for(succeeding).await.unwrap();

    assert_eq!(failing_status.state, JobState::Failed);
    assert!(failing_status.error.unwrap().contains("no segments"));
    assert_eq!(succeeding_status.state, JobState::Completed);
    assert_eq!(orchestrator.governor().running_count(), 0);
}

/// Property 6: the subtitle export reproduces segment timing to the
/// millisecond and text verbatim.
#[tokio::test]
async fn srt_export_round_trips() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("audio.wav");
    let output = dir.path().join("out");

    let mut samples = tone(SPEAKER_A_HZ, 30.0, 0.5);
    samples.extend(tone(SPEAKER_B_HZ, 30.0, 0.5));
    write_wav(&input, &samples);

    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::new(WavLoader::new()),
        Arc::new(ScriptedTranscriber::windows("round trip text", 5.0)),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let job_id = orchestrator
        .submit(&input, &output, JobPriority::Normal)
        .unwrap();
    let status = orchestrator.wait_for(job_id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);

    let transcription = read_final(&output);
    let srt = std::fs::read_to_string(output.join("transcription.srt")).unwrap();
    let cues = export::parse_srt(&srt);

    assert_eq!(cues.len(), transcription.segments.len());
    for (cue, segment) in cues.iter().zip(transcription.segments.iter()) {
        assert!((cue.start - segment.start_time).abs() < 0.001);
        assert!((cue.end - segment.end_time).abs() < 0.001);
        assert_eq!(cue.speaker_id, segment.speaker_id);
        assert_eq!(cue.text, segment.text);
    }
}

/// Property 4: identical audio and identical engine outputs produce an
/// identical timeline, run to run.
#[tokio::test]
async fn merge_output_is_deterministic_across_runs() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("audio.wav");

    let mut samples = tone(SPEAKER_A_HZ, 20.0, 0.5);
    samples.extend(tone(SPEAKER_B_HZ, 20.0, 0.5));
    write_wav(&input, &samples);

    let mut timelines = Vec::new();
    for run in 0..2 {
        let output = dir.path().join(format!("out_{}", run));
        let orchestrator = Orchestrator::new(
            test_config(),
            Arc::new(WavLoader::new()),
            Arc::new(ScriptedTranscriber::windows("repeatable words", 5.0)),
            Arc::new(ToneDiarizer),
        );
        orchestrator.start();

        let job_id = orchestrator
            .submit(&input, &output, JobPriority::Normal)
            .unwrap();
        let status = orchestrator.wait_for(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);

        let transcription = read_final(&output);
        // Chunk ids embed the job id, so compare everything else.
        let timeline: Vec<_> = transcription
            .segments
            .iter()
            .map(|s| {
                (
                    s.speaker_id.clone(),
                    format!("{:.3}-{:.3}", s.start_time, s.end_time),
                    s.text.clone(),
                    s.is_overlap,
                )
            })
            .collect();
        timelines.push((
            timeline,
            transcription.speakers.clone(),
            transcription.language.clone(),
        ));
    }

    assert_eq!(timelines[0], timelines[1]);
}

/// Identical audio under identical settings is served from the
/// process-wide result cache on the second job.
#[tokio::test]
async fn identical_audio_hits_result_cache() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("audio.wav");
    write_wav(&input, &tone(SPEAKER_A_HZ, 5.0, 0.5));

    let transcriber = Arc::new(ScriptedTranscriber::whole_chunk("cached speech"));
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::new(WavLoader::new()),
        transcriber.clone(),
        Arc::new(ToneDiarizer),
    );
    orchestrator.start();

    let first = orchestrator
        .submit(&input, &dir.path().join("out_a"), JobPriority::Normal)
        .unwrap();
    assert_eq!(
        orchestrator.wait_for(first).await.unwrap().state,
        JobState::Completed
    );
    let calls_after_first = transcriber.call_count();
    assert!(calls_after_first > 0);

    let second = orchestrator
        .submit(&input, &dir.path().join("out_b"), JobPriority::Normal)
        .unwrap();
    assert_eq!(
        orchestrator.wait_for(second).await.unwrap().state,
        JobState::Completed
    );
    assert_eq!(
        transcriber.call_count(),
        calls_after_first,
        "second job must be served from cache"
    );
}
